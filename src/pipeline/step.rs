//! User-defined shell steps.

use crate::release_config::StepConfig;
use crate::version::Version;
use anyhow::{Context, Result, bail};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(600);

/// Run one step's command in `working_dir`. `{version}` is substituted and
/// also exported as `RELEASE_VERSION`.
pub async fn run_step(step: &StepConfig, version: &Version, working_dir: &Path) -> Result<()> {
    let command = step.command.replace("{version}", version.as_str());
    let limit = step
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_STEP_TIMEOUT);
    debug!(step = %step.name, %command, "running step");

    let child = Command::new("sh")
        .arg("-c")
        .arg(&command)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("RELEASE_VERSION", version.as_str())
        .env("RELEASE_STEP", &step.name)
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn step '{}'", step.name))?;

    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(result) => result.with_context(|| format!("Failed to wait for step '{}'", step.name))?,
        Err(_) => bail!("Step '{}' timed out after {}s", step.name, limit.as_secs()),
    };

    if !output.status.success() {
        bail!(
            "Step '{}' exited with {}: {}",
            step.name,
            output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string()),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}
