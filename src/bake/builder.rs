//! Image builder backends.

use super::variant::ImageVariant;
use crate::version::Version;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

pub const DEFAULT_BAKE_COMMAND: &str = "packer build -var build_id={version} -var 'image_name={image_name}' -var base_image={base_image} -var runner_binary={artifact} {recipe}";
pub const DEFAULT_IMAGE_ID_PATTERN: &str = r"(ami-[0-9a-f]+)";

/// Inputs for baking one image.
#[derive(Debug, Clone)]
pub struct BakeRequest {
    pub variant: ImageVariant,
    pub version: Version,
    /// Environment-specific image name prefix
    pub prefix: String,
    pub image_name: String,
    pub recipe: PathBuf,
    /// Locally staged copy of the reference artifact
    pub artifact: PathBuf,
}

/// Produces a machine image and returns its identifier.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build_image(&self, request: &BakeRequest) -> Result<String>;
}

/// Bakes by running a shell command template and scraping the image id from
/// its stdout.
#[derive(Debug, Clone)]
pub struct CommandImageBuilder {
    command: String,
    image_id: Regex,
    working_dir: PathBuf,
    timeout: Duration,
}

impl CommandImageBuilder {
    pub fn new(
        command: impl Into<String>,
        image_id_pattern: &str,
        working_dir: impl AsRef<Path>,
        timeout: Duration,
    ) -> Result<Self> {
        let image_id = Regex::new(image_id_pattern)
            .with_context(|| format!("Invalid image id pattern: {}", image_id_pattern))?;
        Ok(Self {
            command: command.into(),
            image_id,
            working_dir: working_dir.as_ref().to_path_buf(),
            timeout,
        })
    }

    pub fn render(&self, request: &BakeRequest) -> String {
        self.command
            .replace("{recipe}", &request.recipe.to_string_lossy())
            .replace("{variant}", &request.variant.name)
            .replace("{version}", request.version.as_str())
            .replace("{prefix}", &request.prefix)
            .replace("{base_image}", &request.variant.base_image)
            .replace("{artifact}", &request.artifact.to_string_lossy())
            .replace("{image_name}", &request.image_name)
    }

    /// Last image id printed on stdout. Uses the first capture group when the
    /// pattern has one.
    pub fn extract_image_id(&self, stdout: &str) -> Option<String> {
        self.image_id
            .captures_iter(stdout)
            .last()
            .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
            .map(|m| m.as_str().to_string())
    }
}

#[async_trait]
impl ImageBuilder for CommandImageBuilder {
    async fn build_image(&self, request: &BakeRequest) -> Result<String> {
        let command = self.render(request);
        debug!(variant = %request.variant.name, %command, "baking image");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("RELEASE_VERSION", request.version.as_str())
            .env("RELEASE_VARIANT", &request.variant.name)
            .env("RELEASE_IMAGE_NAME", &request.image_name)
            .env("RELEASE_ARTIFACT", &request.artifact)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn bake command: {}", command))?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.context("Failed to wait for bake command")?,
            Err(_) => bail!("Bake command timed out after {}s", self.timeout.as_secs()),
        };

        if !output.status.success() {
            bail!(
                "Bake command exited with {}: {}",
                output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match self.extract_image_id(&stdout) {
            Some(id) => Ok(id),
            None => bail!(
                "Bake command succeeded but printed no image id matching '{}'",
                self.image_id.as_str()
            ),
        }
    }
}
