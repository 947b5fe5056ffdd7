//! Result of a release run and its JSON report.

use super::plan::{BARRIER_STAGE, build_stage, upload_stage};
use super::runner::RunFailures;
use crate::bake::BakedImage;
use crate::dag::{DagState, DagSummary, StageOutcome};
use crate::errors::PipelineError;
use crate::target::BuildTarget;
use crate::version::{Trigger, Version};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// A successfully built artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub target: BuildTarget,
    pub file_name: String,
    pub sha256: String,
    pub size: u64,
}

/// Where an artifact was promoted to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionRecord {
    pub target: BuildTarget,
    pub versioned_key: String,
    pub latest_key: String,
    /// Why the `latest` alias was not updated, if it was not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_error: Option<String>,
}

/// Everything a release run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseOutcome {
    pub run_id: String,
    pub trigger: Trigger,
    pub version: Version,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub state: DagState,
    pub store: String,
    pub reference: BuildTarget,
    pub required: BTreeSet<BuildTarget>,
    pub summary: DagSummary,
    pub artifacts: Vec<ArtifactRecord>,
    pub promotions: Vec<PromotionRecord>,
    pub images: Vec<BakedImage>,
    #[serde(skip)]
    pub failures: RunFailures,
}

impl ReleaseOutcome {
    pub fn barrier_open(&self) -> bool {
        self.summary
            .stage_results
            .get(BARRIER_STAGE)
            .is_some_and(|r| r.is_success())
    }

    /// Stages that failed, ignoring builds and uploads of optional targets.
    pub fn blocking_failures(&self) -> Vec<String> {
        let optional: BTreeSet<String> = BuildTarget::ALL
            .iter()
            .filter(|t| !self.required.contains(t) && **t != self.reference)
            .flat_map(|t| [build_stage(*t), upload_stage(*t)])
            .collect();
        self.summary
            .stage_results
            .values()
            .filter(|r| r.outcome == StageOutcome::Failed && !optional.contains(&r.stage))
            .map(|r| r.stage.clone())
            .collect()
    }

    /// Collapse the run into success or the most significant failure.
    ///
    /// Checked in order: reference build, barrier, bakes, then any other
    /// failed stage.
    pub fn into_result(self) -> Result<Self, PipelineError> {
        if let Some(err) = self
            .failures
            .builds
            .iter()
            .find(|e| e.target == self.reference)
        {
            return Err(PipelineError::ReferenceBuildFailed(err.clone()));
        }
        if let Some(err) = &self.failures.barrier {
            return Err(PipelineError::Barrier(err.clone()));
        }
        if !self.failures.bakes.is_empty() {
            return Err(PipelineError::BakeFailed(self.failures.bakes.clone()));
        }
        let failed = self.blocking_failures();
        if !failed.is_empty() {
            return Err(PipelineError::StagesFailed(failed));
        }
        Ok(self)
    }

    /// Default report location under a runs directory.
    pub fn report_path(&self, runs_dir: &Path) -> PathBuf {
        runs_dir.join(format!("{}.json", self.run_id))
    }

    pub fn write_report(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run report: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::StageResult;
    use crate::errors::{BakeError, BarrierError, BuildError};
    use std::time::Duration;
    use tempfile::tempdir;

    fn outcome(results: Vec<StageResult>) -> ReleaseOutcome {
        let mut summary = DagSummary::new(results.len());
        for r in results {
            summary.add_result(r);
        }
        ReleaseOutcome {
            run_id: "run-1".to_string(),
            trigger: Trigger::Continuous { counter: 10 },
            version: Version::new("160"),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            state: DagState::Completed,
            store: "memory".to_string(),
            reference: BuildTarget::LinuxAmd64,
            required: [BuildTarget::LinuxAmd64, BuildTarget::Linux386].into(),
            summary,
            artifacts: vec![],
            promotions: vec![],
            images: vec![],
            failures: RunFailures::default(),
        }
    }

    fn ok(id: &str) -> StageResult {
        StageResult::success(id, Duration::from_millis(5))
    }

    fn failed(id: &str) -> StageResult {
        StageResult::failure(id, "boom", Duration::from_millis(5))
    }

    #[test]
    fn test_success() {
        let outcome = outcome(vec![ok("version"), ok("barrier")]);
        assert!(outcome.barrier_open());
        assert!(outcome.into_result().is_ok());
    }

    #[test]
    fn test_optional_target_failures_ignored() {
        let outcome = outcome(vec![
            ok("barrier"),
            failed("build:darwin-arm64"),
            failed("upload:windows-amd64"),
        ]);
        assert!(outcome.blocking_failures().is_empty());
        assert!(outcome.into_result().is_ok());
    }

    #[test]
    fn test_failure_precedence() {
        let mut run = outcome(vec![failed("build:linux-amd64"), failed("barrier")]);
        run.failures.builds.push(BuildError::new(BuildTarget::LinuxAmd64, "cc"));
        run.failures.barrier = Some(BarrierError {
            missing: vec![BuildTarget::LinuxAmd64],
            failed: vec![],
        });
        assert!(matches!(
            run.clone().into_result(),
            Err(PipelineError::ReferenceBuildFailed(_))
        ));

        run.failures.builds.clear();
        assert!(matches!(run.clone().into_result(), Err(PipelineError::Barrier(_))));

        run.failures.barrier = None;
        run.failures.bakes.push(BakeError::new("cuda", "quota"));
        assert!(matches!(run.clone().into_result(), Err(PipelineError::BakeFailed(_))));

        run.failures.bakes.clear();
        match run.into_result() {
            Err(PipelineError::StagesFailed(stages)) => {
                assert_eq!(stages, vec!["barrier", "build:linux-amd64"]);
            }
            other => panic!("unexpected {:?}", other.map(|o| o.run_id)),
        }
    }

    #[test]
    fn test_required_build_failure_blocks() {
        let outcome = outcome(vec![failed("build:linux-386"), failed("step:notify")]);
        assert_eq!(
            outcome.blocking_failures(),
            vec!["build:linux-386", "step:notify"]
        );
    }

    #[test]
    fn test_write_report() {
        let dir = tempdir().unwrap();
        let outcome = outcome(vec![ok("version")]);
        let path = outcome.report_path(&dir.path().join("runs"));
        outcome.write_report(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["run_id"], "run-1");
        assert_eq!(json["version"], "160");
        assert_eq!(json["trigger"]["track"], "continuous");
        assert_eq!(json["reference"], "linux/amd64");
        assert!(json.get("failures").is_none());
        assert!(path.ends_with("runs/run-1.json"));
    }
}
