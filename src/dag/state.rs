//! Execution state tracking for the DAG executor.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Overall state of DAG execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DagState {
    #[default]
    Idle,
    Running,
    /// Every stage completed successfully
    Completed,
    /// One or more stages failed or were skipped
    Failed,
    /// Aborted by fail-fast
    Cancelled,
}

impl DagState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Terminal outcome of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    Failed,
    Skipped,
}

/// Result of executing a single stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: String,
    pub outcome: StageOutcome,
    /// Failure cause or skip reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl StageResult {
    pub fn success(stage: &str, duration: Duration) -> Self {
        Self {
            stage: stage.to_string(),
            outcome: StageOutcome::Succeeded,
            error: None,
            duration,
        }
    }

    pub fn failure(stage: &str, error: &str, duration: Duration) -> Self {
        Self {
            stage: stage.to_string(),
            outcome: StageOutcome::Failed,
            error: Some(error.to_string()),
            duration,
        }
    }

    pub fn skipped(stage: &str, reason: &str) -> Self {
        Self {
            stage: stage.to_string(),
            outcome: StageOutcome::Skipped,
            error: Some(reason.to_string()),
            duration: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == StageOutcome::Succeeded
    }
}

/// Summary of DAG execution results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagSummary {
    pub total_stages: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Total execution time in milliseconds
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    #[serde(default)]
    pub stage_results: BTreeMap<String, StageResult>,
}

impl DagSummary {
    pub fn new(total_stages: usize) -> Self {
        Self {
            total_stages,
            ..Default::default()
        }
    }

    pub fn add_result(&mut self, result: StageResult) {
        match result.outcome {
            StageOutcome::Succeeded => self.completed += 1,
            StageOutcome::Failed => self.failed += 1,
            StageOutcome::Skipped => self.skipped += 1,
        }
        self.stage_results.insert(result.stage.clone(), result);
    }

    pub fn all_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && self.completed == self.total_stages
    }

    /// Ids of failed stages, sorted.
    pub fn failed_stages(&self) -> Vec<String> {
        self.stage_results
            .values()
            .filter(|r| r.outcome == StageOutcome::Failed)
            .map(|r| r.stage.clone())
            .collect()
    }

    pub fn completion_percentage(&self) -> f64 {
        if self.total_stages == 0 {
            return 100.0;
        }
        (self.completed as f64 / self.total_stages as f64) * 100.0
    }
}

/// Tracks execution timing.
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Serde helpers for Duration serialization.
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
