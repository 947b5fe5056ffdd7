use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use runner_release::logging::{self, LogFormat};
use runner_release::ui::UiMode;
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "runner-release")]
#[command(version, about = "Version, build, promote and bake runner artifacts")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to release.toml (defaults to <project-dir>/release.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log output format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// What started the release. Exactly one source must be given.
#[derive(Args, Clone, Debug)]
pub struct TriggerArgs {
    /// CI build counter (continuous track)
    #[arg(long, env = "RELEASE_BUILD_NUMBER")]
    pub build_number: Option<u64>,

    /// Release tag (release track)
    #[arg(long, env = "RELEASE_TAG", conflicts_with = "tag_from_head")]
    pub tag: Option<String>,

    /// Use the single tag pointing at HEAD as the release tag
    #[arg(long)]
    pub tag_from_head: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a full release: build, promote, barrier, bake
    Run {
        #[command(flatten)]
        trigger: TriggerArgs,

        /// Maximum concurrent stages
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Abort remaining stages on the first failure
        #[arg(long)]
        fail_fast: bool,

        /// Do not bake images
        #[arg(long)]
        skip_bake: bool,

        /// Root of the distribution store (env RELEASE_STORE_ROOT)
        #[arg(long)]
        store_root: Option<PathBuf>,

        /// Image name prefix (env RELEASE_IMAGE_PREFIX)
        #[arg(long)]
        image_prefix: Option<String>,

        /// UI output mode
        #[arg(long, value_enum, default_value_t = UiMode::Full)]
        ui: UiMode,

        /// Where to write the JSON run report
        #[arg(long)]
        report: Option<PathBuf>,

        /// Run against an in-memory store; nothing is published
        #[arg(long)]
        dry_run: bool,
    },
    /// Compile the build matrix into a local directory without promoting
    Build {
        #[command(flatten)]
        trigger: TriggerArgs,

        /// Output directory for the binaries
        #[arg(short, long, default_value = "dist")]
        out_dir: PathBuf,
    },
    /// Print the version a trigger resolves to
    Version {
        #[command(flatten)]
        trigger: TriggerArgs,
    },
    /// List build targets and their distribution file names
    Targets,
    /// Show the release stage graph
    Plan {
        /// Plan as if baking were disabled
        #[arg(long)]
        skip_bake: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default release.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_format)?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run {
            trigger,
            max_parallel,
            fail_fast,
            skip_bake,
            store_root,
            image_prefix,
            ui,
            report,
            dry_run,
        } => {
            let options = cmd::RunOptions {
                overrides: runner_release::config::CliOverrides {
                    store_root: store_root.clone(),
                    image_prefix: image_prefix.clone(),
                    max_parallel: *max_parallel,
                    fail_fast: *fail_fast,
                    skip_bake: *skip_bake,
                },
                ui: *ui,
                report: report.clone(),
                dry_run: *dry_run,
            };
            cmd::cmd_run(&cli, &project_dir, trigger, options).await?;
        }
        Commands::Build { trigger, out_dir } => {
            cmd::cmd_build(&cli, &project_dir, trigger, out_dir).await?;
        }
        Commands::Version { trigger } => cmd::cmd_version(&cli, &project_dir, trigger)?,
        Commands::Targets => cmd::cmd_targets(&cli, &project_dir)?,
        Commands::Plan { skip_bake } => cmd::cmd_plan(&cli, &project_dir, *skip_bake)?,
        Commands::Config { command } => {
            cmd::cmd_config(&cli, &project_dir, command.clone())?
        }
    }

    Ok(())
}
