//! Compiled artifacts.

use crate::target::BuildTarget;
use crate::version::Version;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// One compiled binary for one target and version.
///
/// The content is immutable and shared behind an `Arc`, so handing an
/// artifact to the next stage copies the handle, never the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    target: BuildTarget,
    version: Version,
    content: Arc<[u8]>,
    sha256: String,
}

impl Artifact {
    /// Create an artifact, hashing its content.
    pub fn new(target: BuildTarget, version: Version, content: Vec<u8>) -> Self {
        let sha256 = sha256_hex(&content);
        Self {
            target,
            version,
            content: content.into(),
            sha256,
        }
    }

    pub fn target(&self) -> BuildTarget {
        self.target
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn shared_content(&self) -> Arc<[u8]> {
        Arc::clone(&self.content)
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn file_name(&self, name: &str) -> String {
        self.target.file_name(name)
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("target", &self.target)
            .field("version", &self.version)
            .field("len", &self.content.len())
            .field("sha256", &self.sha256)
            .finish()
    }
}

/// Hex-encoded SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
