//! In-process distribution store.

use super::{
    ConditionalPut, DistributionEntry, DistributionStore, EntryMetadata, validate_key,
};
use crate::errors::StoreError;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use tokio::sync::RwLock;

/// Map-backed store. Nothing is published; used for dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, DistributionEntry>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes since creation.
    pub fn write_count(&self) -> usize {
        self.writes.load(AtomicOrdering::SeqCst)
    }

    /// Copy of every entry currently held.
    pub async fn snapshot(&self) -> BTreeMap<String, DistributionEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl DistributionStore for MemoryStore {
    async fn put(&self, entry: &DistributionEntry) -> Result<(), StoreError> {
        validate_key(&entry.key)?;
        self.entries
            .write()
            .await
            .insert(entry.key.clone(), entry.clone());
        self.writes.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<DistributionEntry, StoreError> {
        validate_key(key)?;
        self.entries
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn head(&self, key: &str) -> Result<Option<EntryMetadata>, StoreError> {
        validate_key(key)?;
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .map(|e| e.metadata.clone()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }

    /// Compare and write under one lock.
    async fn put_unless_newer(&self, entry: &DistributionEntry) -> Result<ConditionalPut, StoreError> {
        validate_key(&entry.key)?;
        let mut entries = self.entries.write().await;
        if let Some(current) = entries.get(&entry.key)
            && current.metadata.version.compare(&entry.metadata.version) == Ordering::Greater
        {
            return Ok(ConditionalPut::Rejected {
                current: current.metadata.version.clone(),
            });
        }
        entries.insert(entry.key.clone(), entry.clone());
        self.writes.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(ConditionalPut::Written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AccessControl;
    use crate::version::Version;
    use std::sync::Arc;

    fn entry(key: &str, version: &str) -> DistributionEntry {
        DistributionEntry::new(
            key,
            Arc::from(&b"bytes"[..]),
            Version::new(version),
            "hash",
            AccessControl::PublicRead,
        )
    }

    #[tokio::test]
    async fn test_put_get_and_count() {
        let store = MemoryStore::new();
        store.put(&entry("1/a", "1")).await.unwrap();
        store.put(&entry("1/a", "1")).await.unwrap();

        assert_eq!(store.write_count(), 2);
        assert_eq!(store.snapshot().await.len(), 1);
        assert_eq!(store.get("1/a").await.unwrap().key, "1/a");
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let store = MemoryStore::new();
        store.put(&entry("1/a", "1")).await.unwrap();
        store.put(&entry("latest/a", "1")).await.unwrap();
        assert_eq!(store.list("latest/").await.unwrap(), vec!["latest/a"]);
    }

    #[tokio::test]
    async fn test_put_unless_newer() {
        let store = MemoryStore::new();
        assert_eq!(
            store.put_unless_newer(&entry("latest/a", "5")).await.unwrap(),
            ConditionalPut::Written
        );
        assert_eq!(
            store.put_unless_newer(&entry("latest/a", "3")).await.unwrap(),
            ConditionalPut::Rejected {
                current: Version::new("5")
            }
        );
        assert_eq!(
            store.put_unless_newer(&entry("latest/a", "5")).await.unwrap(),
            ConditionalPut::Written
        );
        assert_eq!(store.write_count(), 2);
    }
}
