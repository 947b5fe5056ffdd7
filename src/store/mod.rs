//! Distribution store backends.
//!
//! The store is the only shared mutable resource of a release run. Keys are
//! `/`-separated paths; writes to disjoint keys never contend, so backends
//! need no locking beyond making a single `put` atomic.
//!
//! Two backends are provided:
//! - [`FileStore`]: a directory tree, one file per key plus a metadata sidecar
//! - [`MemoryStore`]: an in-process map, used for dry runs

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::errors::StoreError;
use crate::version::Version;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Who may read an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AccessControl {
    #[default]
    PublicRead,
    Private,
}

impl fmt::Display for AccessControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessControl::PublicRead => write!(f, "public-read"),
            AccessControl::Private => write!(f, "private"),
        }
    }
}

/// Metadata stored alongside every entry.
///
/// Deliberately free of timestamps: writing identical content twice must
/// leave identical observable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Version of the release that wrote this entry
    pub version: Version,
    /// Hex SHA-256 of the content
    pub sha256: String,
    /// Content length in bytes
    pub size: u64,
    pub access: AccessControl,
}

/// A keyed entry in the distribution store.
#[derive(Clone, PartialEq, Eq)]
pub struct DistributionEntry {
    pub key: String,
    pub content: Arc<[u8]>,
    pub metadata: EntryMetadata,
}

impl DistributionEntry {
    pub fn new(
        key: impl Into<String>,
        content: Arc<[u8]>,
        version: Version,
        sha256: impl Into<String>,
        access: AccessControl,
    ) -> Self {
        let size = content.len() as u64;
        Self {
            key: key.into(),
            content,
            metadata: EntryMetadata {
                version,
                sha256: sha256.into(),
                size,
                access,
            },
        }
    }
}

impl fmt::Debug for DistributionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributionEntry")
            .field("key", &self.key)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionalPut {
    /// The entry was written.
    Written,
    /// A newer version already holds the key; nothing was written.
    Rejected { current: Version },
}

/// Common interface for all distribution store backends.
#[async_trait]
pub trait DistributionStore: Send + Sync {
    /// Write (or overwrite) an entry.
    async fn put(&self, entry: &DistributionEntry) -> Result<(), StoreError>;

    /// Read an entry with its content.
    async fn get(&self, key: &str) -> Result<DistributionEntry, StoreError>;

    /// Read only the metadata of an entry, if present.
    async fn head(&self, key: &str) -> Result<Option<EntryMetadata>, StoreError>;

    /// List keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Human-readable location of this store.
    fn describe(&self) -> String;

    /// Write the entry unless the key is held by a newer version.
    ///
    /// The default reads then writes and is not atomic across writers;
    /// backends that can hold a lock over both steps override it.
    async fn put_unless_newer(&self, entry: &DistributionEntry) -> Result<ConditionalPut, StoreError> {
        if let Some(current) = self.head(&entry.key).await?
            && current.version.compare(&entry.metadata.version) == Ordering::Greater
        {
            return Ok(ConditionalPut::Rejected {
                current: current.version,
            });
        }
        self.put(entry).await?;
        Ok(ConditionalPut::Written)
    }
}

/// Validate a store key: relative, `/`-separated, no empty or dot-prefixed
/// segments. Dot-prefixed names are reserved for backend bookkeeping.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let invalid = |reason: &str| StoreError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if key.is_empty() {
        return Err(invalid("empty key"));
    }
    if key.starts_with('/') {
        return Err(invalid("must be relative"));
    }
    if key.contains('\\') {
        return Err(invalid("backslashes are not allowed"));
    }
    for segment in key.split('/') {
        match segment {
            "" => return Err(invalid("empty path segment")),
            s if s.starts_with('.') => return Err(invalid("segments may not start with '.'")),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key_accepts_distribution_keys() {
        assert!(validate_key("160/binaries/dstack-runner-linux-amd64").is_ok());
        assert!(validate_key("latest/binaries/dstack-runner-windows-amd64.exe").is_ok());
        assert!(validate_key("images/cuda/160/abcd.json").is_ok());
    }

    #[test]
    fn test_validate_key_rejects_unsafe_keys() {
        for key in ["", "/abs", "a//b", "../x", "a/./b", "a\\b", ".meta/x"] {
            assert!(
                matches!(validate_key(key), Err(StoreError::InvalidKey { .. })),
                "{key:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_access_control_display() {
        assert_eq!(AccessControl::PublicRead.to_string(), "public-read");
        assert_eq!(AccessControl::default(), AccessControl::PublicRead);
    }

    #[test]
    fn test_entry_size_from_content() {
        let entry = DistributionEntry::new(
            "k",
            Arc::from(&b"hello"[..]),
            Version::new("1"),
            "h",
            AccessControl::PublicRead,
        );
        assert_eq!(entry.metadata.size, 5);
    }
}
