//! DAG scheduler for computing execution order and managing stage states.
//!
//! The scheduler computes execution waves - groups of stages that can run in
//! parallel because their dependencies are satisfied - and decides which
//! stages become ready as results arrive.

use crate::dag::builder::{DagBuilder, StageGraph, StageIndex};
use crate::dag::stage::{Stage, StagePolicy};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Configuration for the DAG scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagConfig {
    /// Maximum stages to run in parallel
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Abort every running stage on the first failure
    #[serde(default)]
    pub fail_fast: bool,
}

fn default_max_parallel() -> usize {
    4
}

impl Default for DagConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            fail_fast: false,
        }
    }
}

impl DagConfig {
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }
}

/// Status of a stage in the DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StageStatus {
    /// Waiting for dependencies
    #[default]
    Pending,
    /// Currently running
    Running { started_at_ms: u64 },
    /// Completed successfully
    Completed,
    /// Failed
    Failed { error: String },
    /// Never started
    Skipped { reason: String },
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed { .. } | Self::Skipped { .. }
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// A node in the DAG representing a stage with its current status.
#[derive(Debug, Clone)]
pub struct StageNode {
    pub stage: Stage,
    pub status: StageStatus,
    pub index: StageIndex,
}

impl StageNode {
    pub fn new(stage: Stage, index: StageIndex) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            index,
        }
    }
}

/// The main DAG scheduler.
#[derive(Debug)]
pub struct DagScheduler {
    graph: StageGraph,
    nodes: Vec<StageNode>,
    config: DagConfig,
    /// Stages that completed successfully
    completed: HashSet<StageIndex>,
    /// Stages in any terminal state
    settled: HashSet<StageIndex>,
}

impl DagScheduler {
    /// Create a DAG scheduler from a list of stages.
    pub fn from_stages(stages: &[Stage], config: DagConfig) -> Result<Self> {
        let graph = DagBuilder::new(stages.to_vec()).build()?;

        let nodes: Vec<StageNode> = graph
            .stages()
            .iter()
            .enumerate()
            .map(|(i, s)| StageNode::new(s.clone(), i))
            .collect();

        Ok(Self {
            graph,
            nodes,
            config,
            completed: HashSet::new(),
            settled: HashSet::new(),
        })
    }

    pub fn stage_count(&self) -> usize {
        self.graph.len()
    }

    pub fn get_node(&self, id: &str) -> Option<&StageNode> {
        self.graph.get_index(id).and_then(|i| self.nodes.get(i))
    }

    fn get_node_mut(&mut self, id: &str) -> Option<&mut StageNode> {
        let index = self.graph.get_index(id)?;
        self.nodes.get_mut(index)
    }

    pub fn nodes(&self) -> &[StageNode] {
        &self.nodes
    }

    pub fn config(&self) -> &DagConfig {
        &self.config
    }

    /// Ids of the stages a stage depends on.
    pub fn dependency_ids(&self, id: &str) -> Vec<String> {
        self.graph
            .get_index(id)
            .map(|i| {
                self.graph
                    .dependencies(i)
                    .iter()
                    .filter_map(|&d| self.graph.get_stage(d).map(|s| s.id.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Compute execution waves - groups of stages that can run in parallel.
    ///
    /// Returns a list of waves, where each wave is a list of stage ids that
    /// can be executed in parallel once all previous waves complete.
    pub fn compute_waves(&self) -> Vec<Vec<String>> {
        let mut waves = Vec::new();
        let mut done: HashSet<StageIndex> = HashSet::new();

        loop {
            let ready: Vec<StageIndex> = (0..self.graph.len())
                .filter(|i| !done.contains(i) && self.graph.dependencies_satisfied(*i, &done))
                .collect();

            if ready.is_empty() {
                break;
            }

            done.extend(ready.iter().copied());
            waves.push(
                ready
                    .into_iter()
                    .filter_map(|i| self.graph.get_stage(i).map(|s| s.id.clone()))
                    .collect(),
            );
        }

        waves
    }

    /// Stages that may start now.
    ///
    /// An on-success stage is ready once every dependency completed; a join
    /// stage once every dependency settled.
    pub fn get_ready_stages(&self) -> Vec<&StageNode> {
        self.nodes
            .iter()
            .filter(|node| {
                if !matches!(node.status, StageStatus::Pending) {
                    return false;
                }
                match node.stage.policy {
                    StagePolicy::OnSuccess => {
                        self.graph.dependencies_satisfied(node.index, &self.completed)
                    }
                    StagePolicy::AfterAll => {
                        self.graph.dependencies_satisfied(node.index, &self.settled)
                    }
                }
            })
            .collect()
    }

    pub fn mark_running(&mut self, id: &str) {
        if let Some(node) = self.get_node_mut(id) {
            node.status = StageStatus::Running {
                started_at_ms: chrono::Utc::now().timestamp_millis().max(0) as u64,
            };
        }
    }

    pub fn mark_completed(&mut self, id: &str) {
        if let Some(idx) = self.graph.get_index(id) {
            self.nodes[idx].status = StageStatus::Completed;
            self.completed.insert(idx);
            self.settled.insert(idx);
        }
    }

    /// Mark a stage as failed and skip its on-success dependents.
    ///
    /// Returns the ids of the stages skipped as a consequence.
    pub fn mark_failed(&mut self, id: &str, error: &str) -> Vec<(String, String)> {
        let Some(idx) = self.graph.get_index(id) else {
            return Vec::new();
        };
        self.nodes[idx].status = StageStatus::Failed {
            error: error.to_string(),
        };
        self.settled.insert(idx);

        let mut skipped = Vec::new();
        self.skip_dependents(idx, &mut skipped);
        skipped
    }

    /// Skip every stage that has not finished yet. Used by fail-fast.
    pub fn abort_remaining(&mut self, reason: &str) -> Vec<String> {
        let mut aborted = Vec::new();
        for node in &mut self.nodes {
            if !node.status.is_terminal() {
                node.status = StageStatus::Skipped {
                    reason: reason.to_string(),
                };
                self.settled.insert(node.index);
                aborted.push(node.stage.id.clone());
            }
        }
        aborted
    }

    fn skip_dependents(&mut self, failed_idx: StageIndex, skipped: &mut Vec<(String, String)>) {
        let failed_id = self.nodes[failed_idx].stage.id.clone();
        let dependents: Vec<StageIndex> = self.graph.dependents(failed_idx).to_vec();
        for dep_idx in dependents {
            let node = &mut self.nodes[dep_idx];
            if node.status.is_terminal() || node.stage.policy == StagePolicy::AfterAll {
                continue;
            }
            let reason = format!("dependency '{}' did not complete", failed_id);
            node.status = StageStatus::Skipped {
                reason: reason.clone(),
            };
            skipped.push((node.stage.id.clone(), reason));
            self.settled.insert(dep_idx);
            self.skip_dependents(dep_idx, skipped);
        }
    }

    /// Check if every stage is terminal.
    pub fn all_complete(&self) -> bool {
        self.nodes.iter().all(|n| n.status.is_terminal())
    }

    pub fn all_success(&self) -> bool {
        self.nodes.iter().all(|n| n.status.is_success())
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn completion_percentage(&self) -> f64 {
        if self.nodes.is_empty() {
            return 100.0;
        }
        (self.settled.len() as f64 / self.nodes.len() as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(id: &str, deps: Vec<&str>) -> Stage {
        Stage::new(id, deps.into_iter().map(String::from).collect())
    }

    fn join(id: &str, deps: Vec<&str>) -> Stage {
        Stage::join(id, deps.into_iter().map(String::from).collect())
    }

    fn ready_ids(scheduler: &DagScheduler) -> Vec<String> {
        scheduler
            .get_ready_stages()
            .iter()
            .map(|n| n.stage.id.clone())
            .collect()
    }

    #[test]
    fn test_wave_computation_linear() {
        let stages = vec![stage("a", vec![]), stage("b", vec!["a"]), stage("c", vec!["b"])];

        let scheduler = DagScheduler::from_stages(&stages, DagConfig::default()).unwrap();
        let waves = scheduler.compute_waves();

        assert_eq!(waves, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_wave_computation_diamond() {
        let stages = vec![
            stage("a", vec![]),
            stage("b", vec!["a"]),
            stage("c", vec!["a"]),
            stage("d", vec!["b", "c"]),
        ];

        let scheduler = DagScheduler::from_stages(&stages, DagConfig::default()).unwrap();
        let waves = scheduler.compute_waves();

        assert_eq!(waves.len(), 3);
        assert_eq!(waves[0], vec!["a"]);
        assert!(waves[1].contains(&"b".to_string()));
        assert!(waves[1].contains(&"c".to_string()));
        assert_eq!(waves[2], vec!["d"]);
    }

    #[test]
    fn test_ready_stages() {
        let stages = vec![stage("a", vec![]), stage("b", vec!["a"]), stage("c", vec!["a"])];

        let mut scheduler = DagScheduler::from_stages(&stages, DagConfig::default()).unwrap();
        assert_eq!(ready_ids(&scheduler), vec!["a"]);

        scheduler.mark_running("a");
        assert!(ready_ids(&scheduler).is_empty());

        scheduler.mark_completed("a");
        assert_eq!(ready_ids(&scheduler), vec!["b", "c"]);
    }

    #[test]
    fn test_failure_skips_transitive_dependents() {
        let stages = vec![
            stage("a", vec![]),
            stage("b", vec!["a"]),
            stage("c", vec!["b"]),
            stage("d", vec![]),
        ];

        let mut scheduler = DagScheduler::from_stages(&stages, DagConfig::default()).unwrap();
        let skipped = scheduler.mark_failed("a", "boom");

        let ids: Vec<_> = skipped.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(matches!(scheduler.nodes[2].status, StageStatus::Skipped { .. }));
        // Unrelated stages are unaffected.
        assert_eq!(ready_ids(&scheduler), vec!["d"]);
    }

    #[test]
    fn test_join_waits_for_all_and_tolerates_failure() {
        let stages = vec![
            stage("up:a", vec![]),
            stage("up:b", vec![]),
            join("barrier", vec!["up:a", "up:b"]),
            stage("bake", vec!["barrier"]),
        ];

        let mut scheduler = DagScheduler::from_stages(&stages, DagConfig::default()).unwrap();
        scheduler.mark_completed("up:a");
        assert!(!ready_ids(&scheduler).contains(&"barrier".to_string()));

        let skipped = scheduler.mark_failed("up:b", "denied");
        assert!(skipped.is_empty());
        assert_eq!(ready_ids(&scheduler), vec!["barrier"]);

        // A failed join still blocks its own dependents.
        let skipped = scheduler.mark_failed("barrier", "closed");
        assert_eq!(skipped[0].0, "bake");
        assert!(scheduler.all_complete());
        assert!(!scheduler.all_success());
    }

    #[test]
    fn test_abort_remaining() {
        let stages = vec![stage("a", vec![]), stage("b", vec![]), stage("c", vec!["a"])];
        let mut scheduler =
            DagScheduler::from_stages(&stages, DagConfig::default().with_fail_fast(true)).unwrap();

        scheduler.mark_completed("b");
        scheduler.mark_running("a");
        let aborted = scheduler.abort_remaining("aborted");
        assert_eq!(aborted, vec!["a", "c"]);
        assert!(scheduler.all_complete());
        assert!(scheduler.get_node("b").unwrap().status.is_success());
    }

    #[test]
    fn test_completion_tracking() {
        let stages = vec![stage("a", vec![]), stage("b", vec!["a"])];

        let mut scheduler = DagScheduler::from_stages(&stages, DagConfig::default()).unwrap();

        assert_eq!(scheduler.completion_percentage(), 0.0);
        assert!(!scheduler.all_complete());

        scheduler.mark_completed("a");
        assert_eq!(scheduler.completion_percentage(), 50.0);

        scheduler.mark_completed("b");
        assert_eq!(scheduler.completion_percentage(), 100.0);
        assert!(scheduler.all_complete());
        assert!(scheduler.all_success());
        assert_eq!(scheduler.completed_count(), 2);
    }

    #[test]
    fn test_dependency_ids() {
        let stages = vec![stage("a", vec![]), stage("b", vec![]), join("c", vec!["a", "b"])];
        let scheduler = DagScheduler::from_stages(&stages, DagConfig::default()).unwrap();
        assert_eq!(scheduler.dependency_ids("c"), vec!["a", "b"]);
        assert!(scheduler.dependency_ids("missing").is_empty());
    }
}
