//! Configuration view and validation commands (`runner-release config`).

use anyhow::{Context, Result, bail};
use runner_release::release_config::ReleaseToml;
use std::path::Path;

use super::super::{Cli, ConfigCommands};
use super::load_config;

pub fn cmd_config(cli: &Cli, project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config = load_config(cli, project_dir)?;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Release Configuration");
            println!("=====================");
            println!();

            if config.config_file.exists() {
                println!("Config file: {}", config.config_file.display());
            } else {
                println!(
                    "No release.toml found at {}; using defaults.",
                    config.config_file.display()
                );
            }
            println!();

            let rendered =
                toml::to_string_pretty(&config.toml).context("Failed to render configuration")?;
            println!("{}", rendered.trim_end());
            println!();

            println!("Effective values (with env/CLI overrides):");
            println!("  store root   = {}", config.store_root().display());
            println!("  image prefix = \"{}\"", config.image_prefix());
            println!("  source dir   = {}", config.source_dir().display());
            println!("  build dir    = {}", config.build_dir().display());
            println!("  recipes dir  = {}", config.recipes_dir().display());
            println!("  runs dir     = {}", config.runs_dir().display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config.config_file.exists() {
                println!("No release.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
                println!();
                bail!("{} configuration warning(s)", warnings.len());
            }
            println!();
        }
        Some(ConfigCommands::Init { force }) => {
            if config.config_file.exists() && !force {
                println!(
                    "release.toml already exists at {}",
                    config.config_file.display()
                );
                println!("Pass --force to overwrite it.");
                return Ok(());
            }

            ReleaseToml::default().save(&config.config_file)?;

            println!("Created release.toml at {}", config.config_file.display());
            println!();
            println!("You can now customize:");
            println!("  - [project] artifact_name, image_prefix, source_dir");
            println!("  - [build] command, reference");
            println!("  - [[matrix.targets]] required flags");
            println!("  - [[bakery.variants]] and [[steps]]");
            println!();
        }
    }

    Ok(())
}
