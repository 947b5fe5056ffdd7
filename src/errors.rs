//! Typed error hierarchy for the release pipeline.
//!
//! Each stage of the pipeline owns one error type so failures can be reported
//! with the target, key or variant they belong to:
//! - `InvalidTriggerError`: malformed version input, aborts before any work
//! - `BuildError`: one matrix target failed to compile
//! - `PromotionError`: one distribution key could not be written
//! - `BarrierError`: required promotions missing or failed, no bake may run
//! - `BakeError`: one image variant failed to bake
//! - `StoreError`: distribution store backend failures
//! - `PipelineError`: the aggregated outcome of a whole run

use crate::target::BuildTarget;
use thiserror::Error;

/// The trigger could not be turned into a version identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTriggerError {
    #[error("Trigger carries neither a build counter nor a tag")]
    Missing,

    #[error("Trigger carries both build counter {counter} and tag '{tag}'; pass exactly one")]
    Ambiguous { counter: u64, tag: String },

    #[error("Release tag is empty")]
    EmptyTag,

    #[error("Build counter {counter} plus offset {offset} overflows")]
    CounterOverflow { counter: u64, offset: u64 },

    #[error("Could not discover a tag at HEAD: {0}")]
    TagDiscovery(String),
}

/// A single matrix target failed to compile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Build for {target} failed: {cause}")]
pub struct BuildError {
    pub target: BuildTarget,
    pub cause: String,
}

impl BuildError {
    pub fn new(target: BuildTarget, cause: impl Into<String>) -> Self {
        Self {
            target,
            cause: cause.into(),
        }
    }
}

/// A write to one distribution key failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Promotion to '{key}' failed: {cause}")]
pub struct PromotionError {
    pub key: String,
    pub cause: String,
}

impl PromotionError {
    pub fn new(key: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            cause: cause.into(),
        }
    }
}

/// The release barrier refused to open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Release barrier closed: {} missing, {} failed ({})",
    .missing.len(),
    .failed.len(),
    describe_barrier(.missing, .failed)
)]
pub struct BarrierError {
    /// Required targets with no promotion result at all.
    pub missing: Vec<BuildTarget>,
    /// Required targets whose versioned promotion failed.
    pub failed: Vec<(BuildTarget, String)>,
}

fn describe_barrier(missing: &[BuildTarget], failed: &[(BuildTarget, String)]) -> String {
    let mut parts: Vec<String> = missing.iter().map(|t| format!("{t}: missing")).collect();
    parts.extend(failed.iter().map(|(t, cause)| format!("{t}: {cause}")));
    parts.join("; ")
}

/// One image variant failed to bake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Bake of variant '{variant}' failed: {cause}")]
pub struct BakeError {
    pub variant: String,
    pub cause: String,
}

impl BakeError {
    pub fn new(variant: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            variant: variant.into(),
            cause: cause.into(),
        }
    }
}

/// Errors from a distribution store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Key '{key}' not found")]
    NotFound { key: String },

    #[error("Invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("I/O error on '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt metadata for '{key}': {source}")]
    Metadata {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Aggregated failure of a release run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidTrigger(#[from] InvalidTriggerError),

    #[error("Invalid stage graph: {0}")]
    InvalidGraph(String),

    #[error("Reference target failed to build: {0}")]
    ReferenceBuildFailed(BuildError),

    #[error(transparent)]
    Barrier(#[from] BarrierError),

    #[error("{} image variant(s) failed to bake: {}", .0.len(), join_errors(.0))]
    BakeFailed(Vec<BakeError>),

    #[error("Stages failed: {}", .0.join(", "))]
    StagesFailed(Vec<String>),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn join_errors<E: std::fmt::Display>(errors: &[E]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
