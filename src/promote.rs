//! Artifact promotion into the distribution store.
//!
//! Every artifact is written twice:
//! - `{version}/binaries/{file}`: durable, the source of truth
//! - `latest/binaries/{file}`: convenience alias, overwritten by every run
//!
//! The two writes are independent. A failed alias write is reported but
//! never rolls back the versioned entry. Re-promoting an artifact writes
//! identical bytes and metadata, so promotion is safe to repeat.

use crate::artifact::Artifact;
use crate::errors::PromotionError;
use crate::store::{AccessControl, ConditionalPut, DistributionEntry, DistributionStore};
use crate::target::BuildTarget;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Scope segment of the mutable alias keys.
pub const LATEST_ALIAS: &str = "latest";

/// Distribution key for a target under a scope (a version or `latest`).
pub fn distribution_key(scope: &str, artifact_name: &str, target: BuildTarget) -> String {
    format!("{}/binaries/{}", scope, target.file_name(artifact_name))
}

/// How the `latest` alias is overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LatestPolicy {
    /// Every promotion overwrites the alias; concurrent runs race.
    #[default]
    LastWriterWins,
    /// Refuse to replace an alias written by a newer version.
    Monotonic,
}

impl std::fmt::Display for LatestPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LatestPolicy::LastWriterWins => write!(f, "last_writer_wins"),
            LatestPolicy::Monotonic => write!(f, "monotonic"),
        }
    }
}

impl std::str::FromStr for LatestPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "last_writer_wins" | "lww" => Ok(LatestPolicy::LastWriterWins),
            "monotonic" => Ok(LatestPolicy::Monotonic),
            _ => anyhow::bail!(
                "Invalid latest policy '{}'. Valid values: last_writer_wins, monotonic",
                s
            ),
        }
    }
}

/// Outcome of promoting one artifact.
#[derive(Debug, Clone)]
pub struct PromotionReport {
    pub target: BuildTarget,
    pub version: Version,
    pub versioned: Result<DistributionEntry, PromotionError>,
    pub latest: Result<DistributionEntry, PromotionError>,
}

impl PromotionReport {
    /// The versioned entry was written; the artifact is durably promoted.
    pub fn is_durable(&self) -> bool {
        self.versioned.is_ok()
    }

    /// Both entries were written.
    pub fn is_complete(&self) -> bool {
        self.versioned.is_ok() && self.latest.is_ok()
    }

    /// Every error in this report, versioned first.
    pub fn errors(&self) -> Vec<&PromotionError> {
        [self.versioned.as_ref().err(), self.latest.as_ref().err()]
            .into_iter()
            .flatten()
            .collect()
    }

    /// Both entries, or the first failure.
    pub fn into_pair(self) -> Result<(DistributionEntry, DistributionEntry), PromotionError> {
        Ok((self.versioned?, self.latest?))
    }
}

/// Writes artifacts into a distribution store.
#[derive(Clone)]
pub struct ArtifactPromoter {
    store: Arc<dyn DistributionStore>,
    artifact_name: String,
    latest_policy: LatestPolicy,
}

impl ArtifactPromoter {
    pub fn new(store: Arc<dyn DistributionStore>, artifact_name: impl Into<String>) -> Self {
        Self {
            store,
            artifact_name: artifact_name.into(),
            latest_policy: LatestPolicy::default(),
        }
    }

    pub fn with_latest_policy(mut self, policy: LatestPolicy) -> Self {
        self.latest_policy = policy;
        self
    }

    pub fn artifact_name(&self) -> &str {
        &self.artifact_name
    }

    pub fn versioned_key(&self, version: &Version, target: BuildTarget) -> String {
        distribution_key(version.as_str(), &self.artifact_name, target)
    }

    pub fn latest_key(&self, target: BuildTarget) -> String {
        distribution_key(LATEST_ALIAS, &self.artifact_name, target)
    }

    /// Promote one artifact under its versioned key and the `latest` alias.
    pub async fn promote(&self, artifact: &Artifact) -> PromotionReport {
        let target = artifact.target();
        let version = artifact.version().clone();
        let make_entry = |key: String| {
            DistributionEntry::new(
                key,
                artifact.shared_content(),
                version.clone(),
                artifact.sha256(),
                AccessControl::PublicRead,
            )
        };
        let versioned_entry = make_entry(self.versioned_key(&version, target));
        let latest_entry = make_entry(self.latest_key(target));

        let (versioned, latest) = tokio::join!(
            self.write_versioned(versioned_entry),
            self.write_latest(latest_entry)
        );

        match (&versioned, &latest) {
            (Ok(v), Ok(l)) => info!(build_target = %target, versioned = %v.key, latest = %l.key, "promoted"),
            (Ok(v), Err(e)) => warn!(build_target = %target, versioned = %v.key, error = %e, "latest alias not updated"),
            (Err(e), _) => warn!(build_target = %target, error = %e, "versioned promotion failed"),
        }

        PromotionReport {
            target,
            version,
            versioned,
            latest,
        }
    }

    async fn write_versioned(
        &self,
        entry: DistributionEntry,
    ) -> Result<DistributionEntry, PromotionError> {
        self.store
            .put(&entry)
            .await
            .map_err(|e| PromotionError::new(&entry.key, e.to_string()))?;
        Ok(entry)
    }

    async fn write_latest(
        &self,
        entry: DistributionEntry,
    ) -> Result<DistributionEntry, PromotionError> {
        match self.latest_policy {
            LatestPolicy::LastWriterWins => self.write_versioned(entry).await,
            LatestPolicy::Monotonic => match self.store.put_unless_newer(&entry).await {
                Ok(ConditionalPut::Written) => Ok(entry),
                Ok(ConditionalPut::Rejected { current }) => Err(PromotionError::new(
                    &entry.key,
                    format!(
                        "alias holds newer version {} than {}",
                        current, entry.metadata.version
                    ),
                )),
                Err(e) => Err(PromotionError::new(&entry.key, e.to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreError;
    use crate::store::{EntryMetadata, MemoryStore};
    use async_trait::async_trait;

    fn artifact(target: BuildTarget, version: &str, bytes: &[u8]) -> Artifact {
        Artifact::new(target, Version::new(version), bytes.to_vec())
    }

    /// Store that refuses writes to keys with a given prefix.
    struct RefusingStore {
        inner: MemoryStore,
        refuse_prefix: &'static str,
    }

    #[async_trait]
    impl DistributionStore for RefusingStore {
        async fn put(&self, entry: &DistributionEntry) -> Result<(), StoreError> {
            if entry.key.starts_with(self.refuse_prefix) {
                return Err(StoreError::Io {
                    key: entry.key.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
                });
            }
            self.inner.put(entry).await
        }
        async fn get(&self, key: &str) -> Result<DistributionEntry, StoreError> {
            self.inner.get(key).await
        }
        async fn head(&self, key: &str) -> Result<Option<EntryMetadata>, StoreError> {
            self.inner.head(key).await
        }
        async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            self.inner.list(prefix).await
        }
        fn describe(&self) -> String {
            "refusing".into()
        }
    }

    #[test]
    fn test_key_format() {
        assert_eq!(
            distribution_key("160", "dstack-runner", BuildTarget::LinuxAmd64),
            "160/binaries/dstack-runner-linux-amd64"
        );
        assert_eq!(
            distribution_key(LATEST_ALIAS, "dstack-runner", BuildTarget::Linux386),
            "latest/binaries/dstack-runner-linux-x86"
        );
        assert_eq!(
            distribution_key("0.7", "dstack-runner", BuildTarget::WindowsAmd64),
            "0.7/binaries/dstack-runner-windows-amd64.exe"
        );
    }

    #[tokio::test]
    async fn test_promote_writes_both_keys() {
        let store = Arc::new(MemoryStore::new());
        let promoter = ArtifactPromoter::new(store.clone(), "dstack-runner");

        let report = promoter
            .promote(&artifact(BuildTarget::DarwinArm64, "160", b"mach-o"))
            .await;

        assert!(report.is_complete());
        let (versioned, latest) = report.into_pair().unwrap();
        assert_eq!(versioned.key, "160/binaries/dstack-runner-darwin-arm64");
        assert_eq!(latest.key, "latest/binaries/dstack-runner-darwin-arm64");
        assert_eq!(versioned.metadata.access, AccessControl::PublicRead);
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_promote_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let promoter = ArtifactPromoter::new(store.clone(), "dstack-runner");
        let a = artifact(BuildTarget::LinuxAmd64, "160", b"elf");

        promoter.promote(&a).await;
        let once = store.snapshot().await;
        promoter.promote(&a).await;
        let twice = store.snapshot().await;

        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_latest_failure_keeps_versioned() {
        let store = Arc::new(RefusingStore {
            inner: MemoryStore::new(),
            refuse_prefix: "latest/",
        });
        let promoter = ArtifactPromoter::new(store.clone(), "dstack-runner");

        let report = promoter
            .promote(&artifact(BuildTarget::LinuxAmd64, "160", b"elf"))
            .await;

        assert!(report.is_durable());
        assert!(!report.is_complete());
        let errors = report.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].key, "latest/binaries/dstack-runner-linux-amd64");
        assert!(
            store
                .get("160/binaries/dstack-runner-linux-amd64")
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_versioned_failure_does_not_block_latest() {
        let store = Arc::new(RefusingStore {
            inner: MemoryStore::new(),
            refuse_prefix: "160/",
        });
        let promoter = ArtifactPromoter::new(store.clone(), "dstack-runner");

        let report = promoter
            .promote(&artifact(BuildTarget::LinuxAmd64, "160", b"elf"))
            .await;

        assert!(!report.is_durable());
        assert!(report.latest.is_ok());
        let err = report.into_pair().unwrap_err();
        assert_eq!(err.key, "160/binaries/dstack-runner-linux-amd64");
    }

    #[tokio::test]
    async fn test_monotonic_policy_rejects_older_version() {
        let store = Arc::new(MemoryStore::new());
        let promoter = ArtifactPromoter::new(store.clone(), "dstack-runner")
            .with_latest_policy(LatestPolicy::Monotonic);

        promoter
            .promote(&artifact(BuildTarget::LinuxAmd64, "170", b"new"))
            .await;
        let report = promoter
            .promote(&artifact(BuildTarget::LinuxAmd64, "160", b"old"))
            .await;

        assert!(report.is_durable());
        let err = report.latest.unwrap_err();
        assert!(err.cause.contains("170"));
        let latest = store
            .get("latest/binaries/dstack-runner-linux-amd64")
            .await
            .unwrap();
        assert_eq!(&*latest.content, b"new");
    }

    #[tokio::test]
    async fn test_last_writer_wins_overwrites_newer() {
        let store = Arc::new(MemoryStore::new());
        let promoter = ArtifactPromoter::new(store.clone(), "dstack-runner");

        promoter
            .promote(&artifact(BuildTarget::LinuxAmd64, "170", b"new"))
            .await;
        promoter
            .promote(&artifact(BuildTarget::LinuxAmd64, "160", b"old"))
            .await;

        let latest = store
            .get("latest/binaries/dstack-runner-linux-amd64")
            .await
            .unwrap();
        assert_eq!(&*latest.content, b"old");
    }

    #[test]
    fn test_latest_policy_from_str() {
        assert_eq!(
            "monotonic".parse::<LatestPolicy>().unwrap(),
            LatestPolicy::Monotonic
        );
        assert_eq!(
            "last-writer-wins".parse::<LatestPolicy>().unwrap(),
            LatestPolicy::LastWriterWins
        );
        assert!("newest".parse::<LatestPolicy>().is_err());
    }
}
