//! CLI command implementations.
//!
//! | Module    | Commands handled                 |
//! |-----------|----------------------------------|
//! | `run`     | `Run`, `Build`                   |
//! | `inspect` | `Version`, `Targets`, `Plan`     |
//! | `config`  | `Config`                         |

pub mod config;
pub mod inspect;
pub mod run;

pub use config::cmd_config;
pub use inspect::{cmd_plan, cmd_targets, cmd_version};
pub use run::{RunOptions, cmd_build, cmd_run};

use anyhow::{Context, Result};
use runner_release::bake::{CommandImageBuilder, ImageBuilder};
use runner_release::build::{CommandCompiler, Compiler};
use runner_release::config::Config;
use runner_release::git::GitTagSource;
use runner_release::version::Trigger;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{Cli, TriggerArgs};

/// Load configuration for the project named on the command line.
pub fn load_config(cli: &Cli, project_dir: &Path) -> Result<Config> {
    Config::new(project_dir, cli.config.clone(), cli.verbose)
}

/// Turn the trigger flags into a trigger. `--tag-from-head` reads the tag
/// from the repository containing the project.
pub fn resolve_trigger(args: &TriggerArgs, project_dir: &Path) -> Result<Trigger> {
    let tag = if args.tag_from_head {
        Some(GitTagSource::new(project_dir)?.release_tag()?)
    } else {
        args.tag.clone()
    };
    Ok(Trigger::from_parts(args.build_number, tag)?)
}

pub fn compiler_from_config(config: &Config) -> Arc<dyn Compiler> {
    Arc::new(CommandCompiler::new(
        &config.toml.build.command,
        config.source_dir(),
        Duration::from_secs(config.toml.build.timeout_secs),
    ))
}

pub fn image_builder_from_config(config: &Config) -> Result<Arc<dyn ImageBuilder>> {
    let bakery = &config.toml.bakery;
    let builder = CommandImageBuilder::new(
        &bakery.command,
        &bakery.image_id_pattern,
        &config.project_dir,
        Duration::from_secs(bakery.timeout_secs),
    )
    .context("Failed to configure image builder")?;
    Ok(Arc::new(builder))
}
