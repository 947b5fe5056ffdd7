//! Release barrier between promotion and image baking.
//!
//! Image bakes reference the reference-target artifact by key convention and
//! operators expect every sibling artifact of that version to exist. The
//! barrier therefore opens only when every required target was durably
//! promoted, and fails closed otherwise.
//!
//! The barrier never looks at a partial view: the executor hands it the
//! promotion results only after every upload stage is terminal.

use crate::errors::{BarrierError, PromotionError};
use crate::promote::PromotionReport;
use crate::target::BuildTarget;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Terminal promotion result for one target.
pub type PromotionResult = Result<PromotionReport, PromotionError>;

#[derive(Debug, Clone)]
pub struct ReleaseBarrier {
    required: BTreeSet<BuildTarget>,
}

impl ReleaseBarrier {
    pub fn new(required: impl IntoIterator<Item = BuildTarget>) -> Self {
        Self {
            required: required.into_iter().collect(),
        }
    }

    pub fn required(&self) -> &BTreeSet<BuildTarget> {
        &self.required
    }

    /// Decide whether bakes may start.
    ///
    /// Succeeds iff every required target has a result and its versioned
    /// write succeeded. A failed `latest` alias does not close the barrier.
    /// Results for targets outside the required set are ignored.
    pub fn wait(
        &self,
        promotions: &BTreeMap<BuildTarget, PromotionResult>,
    ) -> Result<(), BarrierError> {
        let mut missing = Vec::new();
        let mut failed = Vec::new();

        for target in &self.required {
            match promotions.get(target) {
                None => missing.push(*target),
                Some(Err(e)) => failed.push((*target, e.to_string())),
                Some(Ok(report)) => {
                    if let Err(e) = &report.versioned {
                        failed.push((*target, e.to_string()));
                    }
                }
            }
        }

        if missing.is_empty() && failed.is_empty() {
            info!(required = self.required.len(), "release barrier open");
            Ok(())
        } else {
            let err = BarrierError { missing, failed };
            warn!(error = %err, "release barrier closed");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AccessControl, DistributionEntry};
    use crate::version::Version;
    use std::sync::Arc;

    fn entry(key: &str) -> DistributionEntry {
        DistributionEntry::new(
            key,
            Arc::from(&b"x"[..]),
            Version::new("160"),
            "h",
            AccessControl::PublicRead,
        )
    }

    fn ok(target: BuildTarget) -> PromotionResult {
        Ok(PromotionReport {
            target,
            version: Version::new("160"),
            versioned: Ok(entry("160/k")),
            latest: Ok(entry("latest/k")),
        })
    }

    fn versioned_failed(target: BuildTarget) -> PromotionResult {
        Ok(PromotionReport {
            target,
            version: Version::new("160"),
            versioned: Err(PromotionError::new("160/k", "denied")),
            latest: Ok(entry("latest/k")),
        })
    }

    #[test]
    fn test_all_required_present_opens() {
        let barrier = ReleaseBarrier::new(BuildTarget::ALL);
        let results: BTreeMap<_, _> = BuildTarget::ALL.iter().map(|t| (*t, ok(*t))).collect();
        assert!(barrier.wait(&results).is_ok());
    }

    #[test]
    fn test_missing_target_closes() {
        let barrier = ReleaseBarrier::new(BuildTarget::ALL);
        let results: BTreeMap<_, _> = BuildTarget::ALL
            .iter()
            .filter(|t| **t != BuildTarget::DarwinArm64)
            .map(|t| (*t, ok(*t)))
            .collect();
        let err = barrier.wait(&results).unwrap_err();
        assert_eq!(err.missing, vec![BuildTarget::DarwinArm64]);
        assert!(err.failed.is_empty());
    }

    #[test]
    fn test_failed_versioned_write_closes() {
        let barrier = ReleaseBarrier::new(BuildTarget::ALL);
        let mut results: BTreeMap<_, _> =
            BuildTarget::ALL.iter().map(|t| (*t, ok(*t))).collect();
        results.insert(BuildTarget::Linux386, versioned_failed(BuildTarget::Linux386));
        results.insert(
            BuildTarget::WindowsAmd64,
            Err(PromotionError::new("160/w", "stage failed")),
        );

        let err = barrier.wait(&results).unwrap_err();
        let failed: Vec<_> = err.failed.iter().map(|(t, _)| *t).collect();
        assert_eq!(failed, vec![BuildTarget::Linux386, BuildTarget::WindowsAmd64]);
    }

    #[test]
    fn test_latest_failure_does_not_close() {
        let barrier = ReleaseBarrier::new([BuildTarget::LinuxAmd64]);
        let mut results = BTreeMap::new();
        results.insert(
            BuildTarget::LinuxAmd64,
            Ok(PromotionReport {
                target: BuildTarget::LinuxAmd64,
                version: Version::new("160"),
                versioned: Ok(entry("160/k")),
                latest: Err(PromotionError::new("latest/k", "denied")),
            }),
        );
        assert!(barrier.wait(&results).is_ok());
    }

    #[test]
    fn test_optional_target_ignored() {
        let barrier = ReleaseBarrier::new([BuildTarget::LinuxAmd64]);
        let mut results = BTreeMap::new();
        results.insert(BuildTarget::LinuxAmd64, ok(BuildTarget::LinuxAmd64));
        results.insert(
            BuildTarget::Linux386,
            Err(PromotionError::new("160/x", "boom")),
        );
        assert!(barrier.wait(&results).is_ok());
    }

    /// Exhaustively check every subset of present/failed results.
    #[test]
    fn test_barrier_safety_over_all_subsets() {
        let targets = BuildTarget::ALL;
        let barrier = ReleaseBarrier::new(targets);

        // Each target is absent (0), succeeded (1) or failed (2).
        let combos = 3usize.pow(targets.len() as u32);
        for mut code in 0..combos {
            let mut results = BTreeMap::new();
            let mut all_ok = true;
            for target in targets {
                match code % 3 {
                    0 => all_ok = false,
                    1 => {
                        results.insert(target, ok(target));
                    }
                    _ => {
                        results.insert(target, versioned_failed(target));
                        all_ok = false;
                    }
                }
                code /= 3;
            }
            assert_eq!(barrier.wait(&results).is_ok(), all_ok);
        }
    }
}
