//! Release execution commands: `runner-release run` and `runner-release build`.

use anyhow::{Context, Result, bail};
use runner_release::build::BuildMatrixCoordinator;
use runner_release::config::CliOverrides;
use runner_release::pipeline::{PipelineOptions, ReleasePipeline};
use runner_release::store::{DistributionStore, FileStore, MemoryStore};
use runner_release::ui::progress::matrix_lines;
use runner_release::ui::{DagUI, OutcomePrinter, Spinner, UiMode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::super::{Cli, TriggerArgs};
use super::{compiler_from_config, image_builder_from_config, load_config, resolve_trigger};

/// Options of `runner-release run` beyond the trigger.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub overrides: CliOverrides,
    pub ui: UiMode,
    pub report: Option<PathBuf>,
    pub dry_run: bool,
}

pub async fn cmd_run(
    cli: &Cli,
    project_dir: &Path,
    trigger: &TriggerArgs,
    options: RunOptions,
) -> Result<()> {
    let config = load_config(cli, project_dir)?.with_overrides(options.overrides.clone());
    for warning in config.validate() {
        warn!(%warning, "configuration warning");
    }

    let trigger = resolve_trigger(trigger, &config.project_dir)?;
    let pipeline_options = PipelineOptions::from_config(&config)?;
    config.ensure_directories()?;

    let store: Arc<dyn DistributionStore> = if options.dry_run {
        info!("dry run: publishing to an in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(FileStore::new(config.store_root()))
    };

    let mut pipeline = ReleasePipeline::new(compiler_from_config(&config), store, pipeline_options);
    if config.bake_enabled() {
        pipeline = pipeline.with_image_builder(image_builder_from_config(&config)?);
    }
    let stage_count = pipeline.plan()?.len();

    let (tx, mut rx) = mpsc::channel(256);
    let ui = DagUI::new(stage_count, options.ui, config.verbose);
    let ui_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            ui.handle_event(&event);
        }
    });

    let pipeline = pipeline.with_event_channel(tx);
    let result = pipeline.run(&trigger).await;
    // Closing the channel lets the UI task drain and exit.
    drop(pipeline);
    if let Err(e) = ui_task.await {
        warn!(error = %e, "progress UI task failed");
    }
    let outcome = result?;

    let report_path = options
        .report
        .clone()
        .unwrap_or_else(|| outcome.report_path(&config.runs_dir()));
    outcome.write_report(&report_path)?;
    info!(report = %report_path.display(), "run report written");

    OutcomePrinter::new(options.ui).print(&outcome);
    outcome.into_result()?;
    Ok(())
}

pub async fn cmd_build(
    cli: &Cli,
    project_dir: &Path,
    trigger: &TriggerArgs,
    out_dir: &Path,
) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let trigger = resolve_trigger(trigger, &config.project_dir)?;
    let options = PipelineOptions::from_config(&config)?;
    let version = options.resolver.resolve(&trigger)?;
    config.ensure_directories()?;

    let coordinator = BuildMatrixCoordinator::new(
        compiler_from_config(&config),
        &options.build_dir,
        &options.artifact_name,
    )
    .with_max_parallel(options.dag.max_parallel);

    let spinner = Spinner::start(format!(
        "Building {} targets for version {}",
        options.targets.len(),
        version
    ));
    let report = coordinator
        .build_all(&options.targets, &version, options.flags)
        .await;
    spinner.finish();

    let out_dir = config.resolve(out_dir);
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    for artifact in report.artifacts() {
        let path = out_dir.join(artifact.file_name(&options.artifact_name));
        std::fs::write(&path, artifact.content())
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    for line in matrix_lines(&report, &options.artifact_name) {
        println!("{}", line);
    }

    report.ensure_reference(options.reference)?;
    let required = options.barrier_set();
    let (blocking, optional): (Vec<_>, Vec<_>) = report
        .failures()
        .partition(|e| required.contains(&e.target));
    for err in &optional {
        warn!(build_target = %err.target, cause = %err.cause, "optional target failed to build");
    }
    if !blocking.is_empty() {
        bail!(
            "{} of {} required targets failed to build",
            blocking.len(),
            required.len()
        );
    }
    Ok(())
}
