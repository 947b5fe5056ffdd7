//! DAG builder for constructing dependency graphs from stages.
//!
//! The builder takes a list of stages with their dependencies and constructs
//! a directed acyclic graph (DAG) that can be used for scheduling.

use crate::dag::stage::Stage;
use anyhow::{Result, bail};
use std::collections::{HashMap, HashSet};

/// Index into the stage list.
pub type StageIndex = usize;

/// A directed acyclic graph of stages.
#[derive(Debug)]
pub struct StageGraph {
    /// Stages indexed by their position
    stages: Vec<Stage>,
    /// Map from stage id to index
    index_map: HashMap<String, StageIndex>,
    /// Forward edges: index -> stages that depend on it
    forward_edges: Vec<Vec<StageIndex>>,
    /// Reverse edges: index -> stages it depends on
    reverse_edges: Vec<Vec<StageIndex>>,
}

impl StageGraph {
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn get_stage(&self, index: StageIndex) -> Option<&Stage> {
        self.stages.get(index)
    }

    pub fn get_index(&self, id: &str) -> Option<StageIndex> {
        self.index_map.get(id).copied()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Stages that depend on the given stage (forward edges).
    pub fn dependents(&self, index: StageIndex) -> &[StageIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Stages the given stage depends on (reverse edges).
    pub fn dependencies(&self, index: StageIndex) -> &[StageIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Stages with no dependencies (entry points).
    pub fn root_stages(&self) -> Vec<StageIndex> {
        self.reverse_edges
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// Stages nothing depends on (exit points).
    pub fn leaf_stages(&self) -> Vec<StageIndex> {
        self.forward_edges
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// Check if every dependency of a stage is in the given set.
    pub fn dependencies_satisfied(&self, index: StageIndex, done: &HashSet<StageIndex>) -> bool {
        self.dependencies(index).iter().all(|dep| done.contains(dep))
    }
}

/// Builder for constructing stage graphs.
pub struct DagBuilder {
    stages: Vec<Stage>,
}

impl DagBuilder {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Build the stage graph.
    ///
    /// This validates the graph structure:
    /// - Stage ids are unique
    /// - All dependencies reference existing stages
    /// - No cycles are allowed
    pub fn build(self) -> Result<StageGraph> {
        let mut index_map = HashMap::new();
        for (i, stage) in self.stages.iter().enumerate() {
            if index_map.insert(stage.id.clone(), i).is_some() {
                bail!("Duplicate stage id: {}", stage.id);
            }
        }

        let mut forward_edges: Vec<Vec<StageIndex>> = vec![Vec::new(); self.stages.len()];
        let mut reverse_edges: Vec<Vec<StageIndex>> = vec![Vec::new(); self.stages.len()];

        for (to_idx, stage) in self.stages.iter().enumerate() {
            for dep in &stage.needs {
                let from_idx = *index_map.get(dep).ok_or_else(|| {
                    anyhow::anyhow!(
                        "Unknown dependency '{}' in stage '{}': no stage with that id exists",
                        dep,
                        stage.id
                    )
                })?;
                if reverse_edges[to_idx].contains(&from_idx) {
                    continue;
                }
                forward_edges[from_idx].push(to_idx);
                reverse_edges[to_idx].push(from_idx);
            }
        }

        let graph = StageGraph {
            stages: self.stages,
            index_map,
            forward_edges,
            reverse_edges,
        };

        Self::validate_no_cycles(&graph)?;

        Ok(graph)
    }

    /// Validate that the graph has no cycles using Kahn's algorithm.
    fn validate_no_cycles(graph: &StageGraph) -> Result<()> {
        let mut in_degree: Vec<usize> = graph.reverse_edges.iter().map(|deps| deps.len()).collect();

        let mut queue: Vec<StageIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut processed = 0;

        while let Some(node) = queue.pop() {
            processed += 1;

            for &dependent in graph.dependents(node) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        if processed != graph.len() {
            let cycle_stages: Vec<&str> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .filter_map(|(i, _)| graph.get_stage(i).map(|s| s.id.as_str()))
                .collect();

            bail!(
                "Cycle detected in stage dependencies. Involved stages: {:?}",
                cycle_stages
            );
        }

        Ok(())
    }
}
