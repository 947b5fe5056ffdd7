//! Read-only commands: `version`, `targets`, `plan`.

use anyhow::{Context, Result};
use runner_release::dag::{DagScheduler, Stage};
use runner_release::pipeline::{PipelineOptions, plan_stages};

use super::super::{Cli, TriggerArgs};
use super::{load_config, resolve_trigger};
use std::path::Path;

/// Print the resolved version and nothing else, for use in scripts.
pub fn cmd_version(cli: &Cli, project_dir: &Path, trigger: &TriggerArgs) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let trigger = resolve_trigger(trigger, &config.project_dir)?;
    let options = PipelineOptions::from_config(&config)?;
    let version = options.resolver.resolve(&trigger)?;
    println!("{}", version);
    Ok(())
}

pub fn cmd_targets(cli: &Cli, project_dir: &Path) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let reference = config.toml.reference_target()?;
    let name = &config.toml.project.artifact_name;

    for (target, required) in config.toml.targets()? {
        let mut notes = vec![if required { "required" } else { "optional" }];
        if target == reference {
            notes.push("reference");
        }
        println!(
            "{:<16} {:<40} {}",
            target.to_string(),
            target.file_name(name),
            notes.join(", ")
        );
    }
    Ok(())
}

pub fn cmd_plan(cli: &Cli, project_dir: &Path, skip_bake: bool) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let mut options = PipelineOptions::from_config(&config)?;
    if skip_bake {
        options.variants.clear();
    }

    let stages = plan_stages(&options.targets, &options.variants, &options.steps);
    let scheduler =
        DagScheduler::from_stages(&stages, options.dag.clone()).context("Invalid release graph")?;

    println!(
        "{} stages, max_parallel = {}, fail_fast = {}",
        scheduler.stage_count(),
        options.dag.max_parallel,
        options.dag.fail_fast
    );
    for (i, wave) in scheduler.compute_waves().iter().enumerate() {
        println!();
        println!("Wave {}:", i);
        for id in wave {
            if let Some(stage) = stages.iter().find(|s| &s.id == id) {
                println!("  {}", describe(stage));
            }
        }
    }
    Ok(())
}

fn describe(stage: &Stage) -> String {
    if stage.needs.is_empty() {
        return stage.id.clone();
    }
    let arrow = if stage.is_join() { "<= all settled" } else { "<=" };
    format!("{} {} {}", stage.id, arrow, stage.needs.join(", "))
}
