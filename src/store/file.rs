//! Filesystem-backed distribution store.
//!
//! Layout under the root directory:
//! - `<key>`: entry content
//! - `.meta/<key>.json`: entry metadata
//!
//! Each file is written to a dot-prefixed temporary sibling and renamed into
//! place, so readers never observe a partially written entry.

use super::{AccessControl, DistributionEntry, DistributionStore, EntryMetadata, validate_key};
use crate::errors::StoreError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const META_DIR: &str = ".meta";

/// Distribution store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn content_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{}.json", key))
    }

    async fn read_meta(&self, key: &str) -> Result<Option<EntryMetadata>, StoreError> {
        let path = self.meta_path(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    key: key.to_string(),
                    source,
                });
            }
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| StoreError::Metadata {
                key: key.to_string(),
                source,
            })
    }
}

/// Write `bytes` to `path` through a temporary sibling and a rename.
async fn write_atomic(path: &Path, bytes: &[u8], access: AccessControl) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "path has no parent"))?;
    tokio::fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("entry");
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    tokio::fs::write(&tmp, bytes).await?;
    set_access(&tmp, access).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        tokio::fs::remove_file(&tmp).await.ok();
        return Err(e);
    }
    Ok(())
}

#[cfg(unix)]
async fn set_access(path: &Path, access: AccessControl) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = match access {
        AccessControl::PublicRead => 0o644,
        AccessControl::Private => 0o600,
    };
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_access(_path: &Path, _access: AccessControl) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl DistributionStore for FileStore {
    async fn put(&self, entry: &DistributionEntry) -> Result<(), StoreError> {
        validate_key(&entry.key)?;
        let io_err = |source| StoreError::Io {
            key: entry.key.clone(),
            source,
        };

        let meta = serde_json::to_vec_pretty(&entry.metadata).map_err(|source| {
            StoreError::Metadata {
                key: entry.key.clone(),
                source,
            }
        })?;

        // Content first: a reader that sees the new metadata always finds
        // content at least as new.
        write_atomic(
            &self.content_path(&entry.key),
            &entry.content,
            entry.metadata.access,
        )
        .await
        .map_err(io_err)?;
        write_atomic(&self.meta_path(&entry.key), &meta, AccessControl::Private)
            .await
            .map_err(io_err)?;

        debug!(key = %entry.key, size = entry.metadata.size, "wrote entry");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<DistributionEntry, StoreError> {
        validate_key(key)?;
        let metadata = self
            .read_meta(key)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })?;
        let content = match tokio::fs::read(self.content_path(key)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    key: key.to_string(),
                });
            }
            Err(source) => {
                return Err(StoreError::Io {
                    key: key.to_string(),
                    source,
                });
            }
        };
        Ok(DistributionEntry {
            key: key.to_string(),
            content: Arc::from(content),
            metadata,
        })
    }

    async fn head(&self, key: &str) -> Result<Option<EntryMetadata>, StoreError> {
        validate_key(key)?;
        self.read_meta(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(StoreError::Io {
                        key: prefix.to_string(),
                        source,
                    });
                }
            };
            while let Some(entry) = entries.next_entry().await.map_err(|source| StoreError::Io {
                key: prefix.to_string(),
                source,
            })? {
                let name = entry.file_name();
                if name.to_string_lossy().starts_with('.') {
                    continue;
                }
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|source| StoreError::Io {
                    key: prefix.to_string(),
                    source,
                })?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;
    use tempfile::tempdir;

    fn entry(key: &str, content: &[u8], version: &str) -> DistributionEntry {
        DistributionEntry::new(
            key,
            Arc::from(content),
            Version::new(version),
            crate::artifact::sha256_hex(content),
            AccessControl::PublicRead,
        )
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let e = entry("160/binaries/runner-linux-amd64", b"bin", "160");

        store.put(&e).await.unwrap();
        let back = store.get(&e.key).await.unwrap();

        assert_eq!(back, e);
        assert!(dir.path().join("160/binaries/runner-linux-amd64").exists());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let err = store.get("nope/x").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.head("nope/x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.put(&entry("latest/x", b"old", "1")).await.unwrap();
        store.put(&entry("latest/x", b"new", "2")).await.unwrap();

        let back = store.get("latest/x").await.unwrap();
        assert_eq!(&*back.content, b"new");
        assert_eq!(back.metadata.version, Version::new("2"));
    }

    #[tokio::test]
    async fn test_list_skips_bookkeeping() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.put(&entry("160/binaries/a", b"a", "160")).await.unwrap();
        store.put(&entry("160/binaries/b", b"b", "160")).await.unwrap();
        store.put(&entry("latest/binaries/a", b"a", "160")).await.unwrap();

        let all = store.list("").await.unwrap();
        assert_eq!(
            all,
            vec!["160/binaries/a", "160/binaries/b", "latest/binaries/a"]
        );
        let latest = store.list("latest/").await.unwrap();
        assert_eq!(latest, vec!["latest/binaries/a"]);
    }

    #[tokio::test]
    async fn test_list_empty_root() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("missing"));
        assert!(store.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_rejects_invalid_key() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let err = store.put(&entry("../escape", b"x", "1")).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_public_read_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.put(&entry("160/binaries/a", b"a", "160")).await.unwrap();

        let mode = std::fs::metadata(dir.path().join("160/binaries/a"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[tokio::test]
    async fn test_put_unless_newer_rejects_older() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.put(&entry("latest/a", b"new", "200")).await.unwrap();

        let outcome = store
            .put_unless_newer(&entry("latest/a", b"old", "160"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            super::super::ConditionalPut::Rejected {
                current: Version::new("200")
            }
        );
        assert_eq!(&*store.get("latest/a").await.unwrap().content, b"new");
    }
}
