//! Compilation backends.

use crate::target::BuildTarget;
use crate::version::Version;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Capability flags compiled into the binary's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlatformFlags {
    /// Enable accelerator (GPU) logging in the compiled runner
    pub accelerator_log: bool,
}

/// Everything a compiler needs for one target.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub target: BuildTarget,
    pub version: Version,
    pub flags: PlatformFlags,
    /// Private working directory for this target
    pub work_dir: PathBuf,
    /// Where the compiled binary must be written
    pub output: PathBuf,
}

/// Produces the bytes of one compiled binary.
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(&self, request: &CompileRequest) -> Result<Vec<u8>>;
}

/// Compiles by running a shell command template.
///
/// Placeholders: `{version}`, `{os}`, `{arch}`, `{output}`, `{accelerator}`.
/// The same values are exported as `RELEASE_*` environment variables, along
/// with `GOOS`/`GOARCH`.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    command: String,
    source_dir: PathBuf,
    timeout: Duration,
}

impl CommandCompiler {
    pub fn new(command: impl Into<String>, source_dir: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            source_dir: source_dir.as_ref().to_path_buf(),
            timeout,
        }
    }

    /// Substitute request values into the command template.
    pub fn render(&self, request: &CompileRequest) -> String {
        self.command
            .replace("{version}", request.version.as_str())
            .replace("{os}", request.target.os())
            .replace("{arch}", request.target.arch())
            .replace("{output}", &request.output.to_string_lossy())
            .replace("{accelerator}", bool_flag(request.flags.accelerator_log))
    }
}

fn bool_flag(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

#[async_trait]
impl Compiler for CommandCompiler {
    async fn compile(&self, request: &CompileRequest) -> Result<Vec<u8>> {
        let command = self.render(request);
        debug!(build_target = %request.target, %command, "compiling");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&self.source_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("GOOS", request.target.os())
            .env("GOARCH", request.target.arch())
            .env("RELEASE_VERSION", request.version.as_str())
            .env("RELEASE_OS", request.target.os())
            .env("RELEASE_ARCH", request.target.arch())
            .env(
                "RELEASE_ACCELERATOR",
                bool_flag(request.flags.accelerator_log),
            )
            .env("RELEASE_OUTPUT", &request.output)
            .env("RELEASE_WORK_DIR", &request.work_dir)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn build command: {}", command))?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.context("Failed to wait for build command")?,
            Err(_) => bail!("Build command timed out after {}s", self.timeout.as_secs()),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Build command exited with {}: {}",
                output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                stderr.trim()
            );
        }

        tokio::fs::read(&request.output).await.with_context(|| {
            format!(
                "Build command succeeded but produced no binary at {}",
                request.output.display()
            )
        })
    }
}
