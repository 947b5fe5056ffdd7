use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::dag::DagConfig;
use crate::release_config::{CONFIG_FILE, ReleaseToml};

/// Environment variable overriding `[store] root`.
pub const ENV_STORE_ROOT: &str = "RELEASE_STORE_ROOT";
/// Environment variable overriding `[project] image_prefix`.
pub const ENV_IMAGE_PREFIX: &str = "RELEASE_IMAGE_PREFIX";

/// Values given on the command line; they win over env and file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub store_root: Option<PathBuf>,
    pub image_prefix: Option<String>,
    pub max_parallel: Option<usize>,
    pub fail_fast: bool,
    pub skip_bake: bool,
}

/// Runtime configuration for a release run.
///
/// Merges settings from:
/// 1. release.toml
/// 2. Environment variables
/// 3. CLI arguments
///
/// Relative paths in the file resolve against the project directory.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub config_file: PathBuf,
    pub toml: ReleaseToml,
    pub verbose: bool,
    overrides: CliOverrides,
}

impl Config {
    /// Load configuration for a project. `config_file` defaults to
    /// `release.toml` in the project directory and may be absent.
    pub fn new(project_dir: &Path, config_file: Option<PathBuf>, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_file = match config_file {
            Some(path) if path.is_absolute() => path,
            Some(path) => project_dir.join(path),
            None => project_dir.join(CONFIG_FILE),
        };
        let toml = ReleaseToml::load_or_default(&config_file)?;

        Ok(Self {
            project_dir,
            config_file,
            toml,
            verbose,
            overrides: CliOverrides::default(),
        })
    }

    pub fn with_overrides(mut self, overrides: CliOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Resolve a configured path against the project directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    /// Root of the file-backed distribution store (CLI → env → file).
    pub fn store_root(&self) -> PathBuf {
        let path = layered(
            self.overrides.store_root.clone(),
            std::env::var(ENV_STORE_ROOT).ok().map(PathBuf::from),
            self.toml.store.root.clone(),
        );
        self.resolve(&path)
    }

    /// Image name prefix (CLI → env → file).
    pub fn image_prefix(&self) -> String {
        layered(
            self.overrides.image_prefix.clone(),
            std::env::var(ENV_IMAGE_PREFIX).ok(),
            self.toml.project.image_prefix.clone(),
        )
    }

    /// Scheduler settings with CLI overrides applied.
    pub fn dag_config(&self) -> DagConfig {
        let mut dag = self.toml.dag.clone();
        if let Some(max) = self.overrides.max_parallel {
            dag.max_parallel = max;
        }
        if self.overrides.fail_fast {
            dag.fail_fast = true;
        }
        dag
    }

    pub fn bake_enabled(&self) -> bool {
        self.toml.bakery.enabled && !self.overrides.skip_bake
    }

    /// Directory the build command runs in.
    pub fn source_dir(&self) -> PathBuf {
        match &self.toml.project.source_dir {
            Some(dir) => self.resolve(dir),
            None => self.project_dir.clone(),
        }
    }

    pub fn build_dir(&self) -> PathBuf {
        self.resolve(&self.toml.build.work_dir)
    }

    pub fn recipes_dir(&self) -> PathBuf {
        self.resolve(&self.toml.bakery.recipes_dir)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.resolve(&self.toml.bakery.staging_dir)
    }

    /// Where run reports are written.
    pub fn runs_dir(&self) -> PathBuf {
        self.project_dir.join(".release").join("runs")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(self.runs_dir()).context("Failed to create runs directory")?;
        std::fs::create_dir_all(self.build_dir()).context("Failed to create build directory")?;
        Ok(())
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

/// First value present among CLI, environment and file.
fn layered<T>(cli: Option<T>, env: Option<T>, file: T) -> T {
    cli.or(env).unwrap_or(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layered_precedence() {
        assert_eq!(layered(Some(1), Some(2), 3), 1);
        assert_eq!(layered(None, Some(2), 3), 2);
        assert_eq!(layered(None::<i32>, None, 3), 3);
    }

    #[test]
    fn test_defaults_without_file() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path(), None, false).unwrap();
        let root = dir.path().canonicalize().unwrap();

        assert_eq!(config.config_file, root.join("release.toml"));
        assert_eq!(config.build_dir(), root.join(".release/build"));
        assert_eq!(config.recipes_dir(), root.join("packer"));
        assert_eq!(config.source_dir(), root);
        assert_eq!(config.runs_dir(), root.join(".release/runs"));
        assert!(config.bake_enabled());
        assert_eq!(config.dag_config(), DagConfig::default());
    }

    #[test]
    fn test_loads_file_and_resolves_paths() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("custom.toml"),
            "[project]\nsource_dir = \"runner\"\n[store]\nroot = \"/srv/dist\"\n",
        )
        .unwrap();
        let config = Config::new(dir.path(), Some(PathBuf::from("custom.toml")), true).unwrap();
        let root = dir.path().canonicalize().unwrap();

        assert_eq!(config.source_dir(), root.join("runner"));
        assert_eq!(config.resolve(Path::new("/srv/dist")), PathBuf::from("/srv/dist"));
        assert!(config.verbose);
    }

    #[test]
    fn test_cli_overrides() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path(), None, false)
            .unwrap()
            .with_overrides(CliOverrides {
                store_root: Some(PathBuf::from("out/store")),
                image_prefix: Some("[dev] ".to_string()),
                max_parallel: Some(1),
                fail_fast: true,
                skip_bake: true,
            });
        let root = dir.path().canonicalize().unwrap();

        assert_eq!(config.store_root(), root.join("out/store"));
        assert_eq!(config.image_prefix(), "[dev] ");
        assert_eq!(config.dag_config().max_parallel, 1);
        assert!(config.dag_config().fail_fast);
        assert!(!config.bake_enabled());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("release.toml"), "[dag]\nmax_parallel = -1\n").unwrap();
        assert!(Config::new(dir.path(), None, false).is_err());
    }

    #[test]
    fn test_missing_project_dir() {
        assert!(Config::new(Path::new("/nonexistent/project"), None, false).is_err());
    }
}
