//! Release configuration file.
//!
//! Reads `release.toml` from the project root. Every field has a default, so
//! an empty (or missing) file describes the standard five-target release with
//! two image variants.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! artifact_name = "dstack-runner"
//! image_prefix = "[stgn] "
//! source_dir = "runner"
//!
//! [version]
//! offset = 150
//!
//! [build]
//! command = "go build -ldflags '-X main.Version={version}' -o {output} ./cmd/runner"
//! timeout_secs = 900
//! accelerator_log = true
//! reference = "linux/amd64"
//!
//! [[matrix.targets]]
//! os = "linux"
//! arch = "amd64"
//!
//! [[matrix.targets]]
//! os = "darwin"
//! arch = "arm64"
//! required = false
//!
//! [store]
//! root = ".release/store"
//! latest_policy = "monotonic"
//!
//! [bakery]
//! recipes_dir = "packer"
//! image_id_pattern = "(ami-[0-9a-f]+)"
//!
//! [[bakery.variants]]
//! name = "cpu"
//! base_image = "ubuntu-22.04"
//! image_base = "dstack"
//!
//! [dag]
//! max_parallel = 4
//! fail_fast = false
//!
//! [[steps]]
//! name = "notify"
//! command = "echo released {version}"
//! needs = ["barrier"]
//! ```

use crate::bake::{DEFAULT_BAKE_COMMAND, DEFAULT_IMAGE_ID_PATTERN, ImageVariant};
use crate::dag::DagConfig;
use crate::promote::LatestPolicy;
use crate::target::BuildTarget;
use crate::version::CONTINUOUS_VERSION_OFFSET;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Default file name at the project root.
pub const CONFIG_FILE: &str = "release.toml";

pub const DEFAULT_BUILD_COMMAND: &str = "go build -ldflags \"-X main.Version={version} -X main.AcceleratorLog={accelerator}\" -o {output} .";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Base name of every distributed binary
    #[serde(default = "default_artifact_name")]
    pub artifact_name: String,
    /// Environment-specific prefix for image names (e.g. "[stgn] ")
    #[serde(default)]
    pub image_prefix: String,
    /// Directory the build command runs in, relative to the project root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_dir: Option<PathBuf>,
}

fn default_artifact_name() -> String {
    "dstack-runner".to_string()
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            artifact_name: default_artifact_name(),
            image_prefix: String::new(),
            source_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSection {
    /// Added to the build counter on the continuous track
    #[serde(default = "default_offset")]
    pub offset: u64,
}

fn default_offset() -> u64 {
    CONTINUOUS_VERSION_OFFSET
}

impl Default for VersionSection {
    fn default() -> Self {
        Self {
            offset: default_offset(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSection {
    /// Shell command template compiling one target
    #[serde(default = "default_build_command")]
    pub command: String,
    #[serde(default = "default_build_timeout")]
    pub timeout_secs: u64,
    /// Compile accelerator logging into the binaries
    #[serde(default = "default_true")]
    pub accelerator_log: bool,
    /// Target whose build must succeed, as "os/arch"
    #[serde(default = "default_reference")]
    pub reference: String,
    /// Root of the per-target working directories
    #[serde(default = "default_build_dir")]
    pub work_dir: PathBuf,
}

fn default_build_command() -> String {
    DEFAULT_BUILD_COMMAND.to_string()
}

fn default_build_timeout() -> u64 {
    900
}

fn default_true() -> bool {
    true
}

fn default_reference() -> String {
    BuildTarget::REFERENCE.to_string()
}

fn default_build_dir() -> PathBuf {
    PathBuf::from(".release/build")
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            command: default_build_command(),
            timeout_secs: default_build_timeout(),
            accelerator_log: true,
            reference: default_reference(),
            work_dir: default_build_dir(),
        }
    }
}

/// One entry of the build matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEntry {
    pub os: String,
    pub arch: String,
    /// Whether the release barrier waits for this target
    #[serde(default = "default_true")]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixSection {
    #[serde(default = "default_targets")]
    pub targets: Vec<TargetEntry>,
}

fn default_targets() -> Vec<TargetEntry> {
    BuildTarget::ALL
        .iter()
        .map(|t| TargetEntry {
            os: t.os().to_string(),
            arch: t.arch().to_string(),
            required: true,
        })
        .collect()
}

impl Default for MatrixSection {
    fn default() -> Self {
        Self {
            targets: default_targets(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSection {
    /// Root directory of the file-backed distribution store
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub latest_policy: LatestPolicy,
}

fn default_store_root() -> PathBuf {
    PathBuf::from(".release/store")
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            root: default_store_root(),
            latest_policy: LatestPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BakerySection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_recipes_dir")]
    pub recipes_dir: PathBuf,
    /// Shell command template baking one image
    #[serde(default = "default_bake_command")]
    pub command: String,
    /// Regex locating the image id in the command's stdout
    #[serde(default = "default_image_id_pattern")]
    pub image_id_pattern: String,
    #[serde(default = "default_bake_timeout")]
    pub timeout_secs: u64,
    /// Where the reference artifact is staged for the bake command
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    #[serde(default = "ImageVariant::defaults")]
    pub variants: Vec<ImageVariant>,
}

fn default_recipes_dir() -> PathBuf {
    PathBuf::from("packer")
}

fn default_bake_command() -> String {
    DEFAULT_BAKE_COMMAND.to_string()
}

fn default_image_id_pattern() -> String {
    DEFAULT_IMAGE_ID_PATTERN.to_string()
}

fn default_bake_timeout() -> u64 {
    3600
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from(".release/staging")
}

impl Default for BakerySection {
    fn default() -> Self {
        Self {
            enabled: true,
            recipes_dir: default_recipes_dir(),
            command: default_bake_command(),
            image_id_pattern: default_image_id_pattern(),
            timeout_secs: default_bake_timeout(),
            staging_dir: default_staging_dir(),
            variants: ImageVariant::defaults(),
        }
    }
}

/// A user-defined shell step added to the release graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    /// Shell command; `{version}` is substituted
    pub command: String,
    /// Stage ids this step waits for
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// The complete release.toml structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReleaseToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub version: VersionSection,
    #[serde(default)]
    pub build: BuildSection,
    #[serde(default)]
    pub matrix: MatrixSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub bakery: BakerySection,
    #[serde(default)]
    pub dag: DagConfig,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

impl ReleaseToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse release.toml")
    }

    /// Load the file if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize release.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// The build matrix with each target's required flag.
    pub fn targets(&self) -> Result<Vec<(BuildTarget, bool)>> {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for entry in &self.matrix.targets {
            let Some(target) = BuildTarget::from_parts(&entry.os, &entry.arch) else {
                bail!(
                    "Unsupported build target '{}/{}' in [[matrix.targets]]",
                    entry.os,
                    entry.arch
                );
            };
            if seen.insert(target) {
                targets.push((target, entry.required));
            }
        }
        Ok(targets)
    }

    /// Targets the release barrier waits for.
    pub fn required_targets(&self) -> Result<Vec<BuildTarget>> {
        Ok(self
            .targets()?
            .into_iter()
            .filter(|(_, required)| *required)
            .map(|(t, _)| t)
            .collect())
    }

    pub fn reference_target(&self) -> Result<BuildTarget> {
        self.build
            .reference
            .parse::<BuildTarget>()
            .map_err(|e| anyhow::anyhow!("Invalid [build] reference: {}", e))
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.project.artifact_name.trim().is_empty() {
            warnings.push("[project] artifact_name is empty".to_string());
        }

        for entry in &self.matrix.targets {
            if BuildTarget::from_parts(&entry.os, &entry.arch).is_none() {
                warnings.push(format!(
                    "Unsupported build target '{}/{}'",
                    entry.os, entry.arch
                ));
            }
        }
        if self.matrix.targets.is_empty() {
            warnings.push("Build matrix is empty".to_string());
        }

        match self.reference_target() {
            Ok(reference) => {
                let in_matrix = self.matrix.targets.iter().any(|e| {
                    BuildTarget::from_parts(&e.os, &e.arch) == Some(reference)
                });
                if !in_matrix {
                    warnings.push(format!(
                        "Reference target {} is not in the build matrix",
                        reference
                    ));
                }
            }
            Err(e) => warnings.push(e.to_string()),
        }

        let mut variant_names = HashSet::new();
        for variant in &self.bakery.variants {
            if !variant_names.insert(variant.name.as_str()) {
                warnings.push(format!("Duplicate image variant '{}'", variant.name));
            }
        }
        if let Err(e) = regex::Regex::new(&self.bakery.image_id_pattern) {
            warnings.push(format!(
                "Invalid image_id_pattern '{}': {}",
                self.bakery.image_id_pattern, e
            ));
        }

        if self.dag.max_parallel == 0 {
            warnings.push("[dag] max_parallel is 0; at least one stage always runs".to_string());
        }
        if self.build.timeout_secs == 0 {
            warnings.push("[build] timeout_secs is 0".to_string());
        }

        let mut step_names = HashSet::new();
        for step in &self.steps {
            if !step_names.insert(step.name.as_str()) {
                warnings.push(format!("Duplicate step '{}'", step.name));
            }
            if step.command.trim().is_empty() {
                warnings.push(format!("Step '{}' has an empty command", step.name));
            }
        }

        warnings
    }
}
