//! DAG scheduler for parallel stage execution.
//!
//! A release run is a directed acyclic graph of stages: per-target builds
//! and uploads, the release barrier, image bakes and any user-defined steps.
//!
//! ## Architecture
//!
//! 1. **Builder** - Constructs a graph from stages with their `needs`
//! 2. **Scheduler** - Computes execution waves and tracks stage states
//! 3. **Executor** - Runs ready stages in parallel through a [`StageRunner`]
//!
//! Stages default to running only after all of their dependencies succeed.
//! A failure skips every such dependent, transitively. Join stages
//! ([`StagePolicy::AfterAll`]) instead run once their dependencies have
//! settled, and see which of them failed.
//!
//! ## Example
//!
//! ```no_run
//! use runner_release::dag::{DagConfig, DagScheduler, Stage};
//!
//! # fn example() -> anyhow::Result<()> {
//! let stages = vec![
//!     Stage::new("build:linux-amd64", vec![]),
//!     Stage::new("upload:linux-amd64", vec!["build:linux-amd64".to_string()]),
//!     Stage::join("barrier", vec!["upload:linux-amd64".to_string()]),
//! ];
//!
//! let scheduler = DagScheduler::from_stages(&stages, DagConfig::default())?;
//! assert_eq!(scheduler.compute_waves().len(), 3);
//! # Ok(())
//! # }
//! ```

mod builder;
mod executor;
mod scheduler;
mod stage;
mod state;

pub use builder::{DagBuilder, StageGraph};
pub use executor::{
    DagExecutor, DependencyOutcome, ExecutionResult, StageEvent, StageInputs, StageRunner,
};
pub use scheduler::{DagConfig, DagScheduler, StageNode, StageStatus};
pub use stage::{Stage, StagePolicy};
pub use state::{DagState, DagSummary, StageOutcome, StageResult};
