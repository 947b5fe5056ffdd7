//! DAG executor for parallel stage execution.
//!
//! The executor runs ready stages concurrently up to `max_parallel`, feeds
//! each stage the outcomes of its dependencies and reports progress as
//! [`StageEvent`]s on an optional channel.

use crate::dag::scheduler::{DagConfig, DagScheduler, StageStatus};
use crate::dag::stage::Stage;
use crate::dag::state::{DagState, DagSummary, ExecutionTimer, StageResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Events emitted during DAG execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageEvent {
    /// The graph was validated; stages grouped by wave.
    Planned { waves: Vec<Vec<String>> },
    /// A stage has started execution.
    Started { stage: String, wave: usize },
    /// A stage finished (success, failure or skip).
    Finished { result: StageResult },
    /// DAG execution completed.
    DagCompleted { success: bool, summary: DagSummary },
}

/// What a stage learns about one of its dependencies.
#[derive(Debug, Clone, PartialEq)]
pub enum DependencyOutcome<O> {
    Completed(O),
    Failed(String),
    Skipped(String),
}

impl<O> DependencyOutcome<O> {
    pub fn output(&self) -> Option<&O> {
        match self {
            Self::Completed(output) => Some(output),
            _ => None,
        }
    }
}

/// Outcomes of a stage's dependencies, keyed by stage id.
#[derive(Debug, Clone)]
pub struct StageInputs<O> {
    dependencies: BTreeMap<String, DependencyOutcome<O>>,
}

impl<O> StageInputs<O> {
    pub fn new(dependencies: BTreeMap<String, DependencyOutcome<O>>) -> Self {
        Self { dependencies }
    }

    pub fn get(&self, id: &str) -> Option<&DependencyOutcome<O>> {
        self.dependencies.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DependencyOutcome<O>)> {
        self.dependencies.iter()
    }

    /// Outputs of dependencies that completed.
    pub fn outputs(&self) -> impl Iterator<Item = (&String, &O)> {
        self.dependencies
            .iter()
            .filter_map(|(id, outcome)| outcome.output().map(|o| (id, o)))
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}

/// Executes the work behind each stage.
#[async_trait]
pub trait StageRunner: Send + Sync + 'static {
    type Output: Clone + Send + Sync + 'static;

    async fn run(&self, stage: &Stage, inputs: StageInputs<Self::Output>) -> Result<Self::Output>;
}

/// Result of DAG execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult<O> {
    pub success: bool,
    pub summary: DagSummary,
    pub duration: Duration,
    pub state: DagState,
    /// Outputs of every stage that completed
    pub outputs: BTreeMap<String, O>,
}

/// Runs stages in parallel while respecting dependencies.
pub struct DagExecutor<R: StageRunner> {
    runner: Arc<R>,
    config: DagConfig,
    event_tx: Option<mpsc::Sender<StageEvent>>,
}

impl<R: StageRunner> DagExecutor<R> {
    pub fn new(runner: Arc<R>, config: DagConfig) -> Self {
        Self {
            runner,
            config,
            event_tx: None,
        }
    }

    /// Set the event channel for progress updates.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<StageEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Execute all stages in the DAG.
    ///
    /// Errors only when the graph itself is invalid; stage failures are
    /// reported through the returned summary.
    pub async fn execute(&self, stages: &[Stage]) -> Result<ExecutionResult<R::Output>> {
        let timer = ExecutionTimer::start();

        let mut scheduler = DagScheduler::from_stages(stages, self.config.clone())
            .context("Failed to build stage graph")?;

        let mut summary = DagSummary::new(scheduler.stage_count());
        let mut outputs: BTreeMap<String, R::Output> = BTreeMap::new();

        let waves = scheduler.compute_waves();
        let wave_of: HashMap<String, usize> = waves
            .iter()
            .enumerate()
            .flat_map(|(i, wave)| wave.iter().map(move |id| (id.clone(), i)))
            .collect();
        info!(stages = stages.len(), waves = waves.len(), "executing stage graph");
        self.emit_event(StageEvent::Planned { waves }).await;

        let max_parallel = self.config.max_parallel.max(1);
        let (result_tx, mut result_rx) =
            mpsc::channel::<(String, Result<R::Output, String>, Duration)>(100);
        let mut active_tasks: HashMap<String, JoinHandle<()>> = HashMap::new();
        let mut cancelled = false;

        loop {
            // Start as many ready stages as capacity allows.
            let ready: Vec<Stage> = scheduler
                .get_ready_stages()
                .iter()
                .map(|n| n.stage.clone())
                .collect();

            for stage in ready {
                if active_tasks.len() >= max_parallel {
                    break;
                }

                let inputs = self.collect_inputs(&scheduler, &outputs, &stage.id);
                scheduler.mark_running(&stage.id);
                let wave = wave_of.get(&stage.id).copied().unwrap_or_default();
                debug!(stage = %stage.id, wave, "stage started");
                self.emit_event(StageEvent::Started {
                    stage: stage.id.clone(),
                    wave,
                })
                .await;

                let runner = Arc::clone(&self.runner);
                let result_tx = result_tx.clone();
                let stage_id = stage.id.clone();

                let handle = tokio::spawn(async move {
                    let timer = ExecutionTimer::start();
                    let result = match AssertUnwindSafe(runner.run(&stage, inputs))
                        .catch_unwind()
                        .await
                    {
                        Ok(Ok(output)) => Ok(output),
                        Ok(Err(e)) => Err(format!("{:#}", e)),
                        Err(_) => Err("stage panicked".to_string()),
                    };
                    result_tx
                        .send((stage.id.clone(), result, timer.elapsed()))
                        .await
                        .ok();
                });

                active_tasks.insert(stage_id, handle);
            }

            if active_tasks.is_empty() {
                break;
            }

            let Some((stage_id, result, duration)) = result_rx.recv().await else {
                break;
            };
            if let Some(handle) = active_tasks.remove(&stage_id) {
                handle.await.ok();
            }

            match result {
                Ok(output) => {
                    scheduler.mark_completed(&stage_id);
                    outputs.insert(stage_id.clone(), output);
                    self.record(&mut summary, StageResult::success(&stage_id, duration))
                        .await;
                }
                Err(error) => {
                    warn!(stage = %stage_id, %error, "stage failed");
                    let skipped = scheduler.mark_failed(&stage_id, &error);
                    self.record(
                        &mut summary,
                        StageResult::failure(&stage_id, &error, duration),
                    )
                    .await;
                    for (id, reason) in skipped {
                        self.record(&mut summary, StageResult::skipped(&id, &reason))
                            .await;
                    }

                    if self.config.fail_fast {
                        for (_, handle) in active_tasks.drain() {
                            handle.abort();
                        }
                        let reason = format!("aborted after '{}' failed", stage_id);
                        for id in scheduler.abort_remaining(&reason) {
                            self.record(&mut summary, StageResult::skipped(&id, &reason))
                                .await;
                        }
                        cancelled = true;
                        break;
                    }
                }
            }
        }

        // Anything left pending could never become ready.
        for id in scheduler.abort_remaining("never became ready") {
            self.record(
                &mut summary,
                StageResult::skipped(&id, "never became ready"),
            )
            .await;
        }

        summary.duration = timer.elapsed();
        let success = summary.all_success();
        let state = if cancelled {
            DagState::Cancelled
        } else if success {
            DagState::Completed
        } else {
            DagState::Failed
        };

        info!(
            success,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            "stage graph finished"
        );
        self.emit_event(StageEvent::DagCompleted {
            success,
            summary: summary.clone(),
        })
        .await;

        Ok(ExecutionResult {
            success,
            summary,
            duration: timer.elapsed(),
            state,
            outputs,
        })
    }

    fn collect_inputs(
        &self,
        scheduler: &DagScheduler,
        outputs: &BTreeMap<String, R::Output>,
        id: &str,
    ) -> StageInputs<R::Output> {
        let dependencies = scheduler
            .dependency_ids(id)
            .into_iter()
            .map(|dep| {
                let outcome = match (outputs.get(&dep), scheduler.get_node(&dep).map(|n| &n.status)) {
                    (Some(output), _) => DependencyOutcome::Completed(output.clone()),
                    (None, Some(StageStatus::Failed { error })) => {
                        DependencyOutcome::Failed(error.clone())
                    }
                    (None, Some(StageStatus::Skipped { reason })) => {
                        DependencyOutcome::Skipped(reason.clone())
                    }
                    (None, _) => DependencyOutcome::Skipped("no result".to_string()),
                };
                (dep, outcome)
            })
            .collect();
        StageInputs::new(dependencies)
    }

    async fn record(&self, summary: &mut DagSummary, result: StageResult) {
        summary.add_result(result.clone());
        self.emit_event(StageEvent::Finished { result }).await;
    }

    /// Emit an event to the event channel if configured.
    async fn emit_event(&self, event: StageEvent) {
        if let Some(ref tx) = self.event_tx {
            tx.send(event).await.ok();
        }
    }
}
