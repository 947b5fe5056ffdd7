//! Build matrix coordination.

use super::compiler::{CompileRequest, Compiler, PlatformFlags};
use crate::artifact::Artifact;
use crate::errors::BuildError;
use crate::target::BuildTarget;
use crate::version::Version;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Per-target results of one matrix build.
#[derive(Debug, Clone, Default)]
pub struct MatrixReport {
    pub results: BTreeMap<BuildTarget, Result<Artifact, BuildError>>,
}

impl MatrixReport {
    /// Artifacts that built successfully; only these may be promoted.
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.results.values().filter_map(|r| r.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &BuildError> {
        self.results.values().filter_map(|r| r.as_ref().err())
    }

    pub fn success_count(&self) -> usize {
        self.artifacts().count()
    }

    /// The stage fails only when the reference target did not build.
    pub fn ensure_reference(&self, reference: BuildTarget) -> Result<(), BuildError> {
        match self.results.get(&reference) {
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) => Err(e.clone()),
            None => Err(BuildError::new(reference, "reference target is not in the matrix")),
        }
    }
}

/// Runs one isolated compilation per build target.
#[derive(Clone)]
pub struct BuildMatrixCoordinator {
    compiler: Arc<dyn Compiler>,
    work_root: PathBuf,
    artifact_name: String,
    max_parallel: usize,
}

impl BuildMatrixCoordinator {
    pub fn new(
        compiler: Arc<dyn Compiler>,
        work_root: impl AsRef<Path>,
        artifact_name: impl Into<String>,
    ) -> Self {
        Self {
            compiler,
            work_root: work_root.as_ref().to_path_buf(),
            artifact_name: artifact_name.into(),
            max_parallel: 4,
        }
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }

    /// Private working directory for one target of one version.
    pub fn work_dir(&self, version: &Version, target: BuildTarget) -> PathBuf {
        self.work_root.join(version.as_str()).join(target.slug())
    }

    /// Compile a single target in its own fresh working directory.
    pub async fn build_one(
        &self,
        target: BuildTarget,
        version: &Version,
        flags: PlatformFlags,
    ) -> Result<Artifact, BuildError> {
        let work_dir = self.work_dir(version, target);
        let fail = |cause: String| BuildError::new(target, cause);

        // A stale directory from an earlier attempt must not leak into this build.
        if tokio::fs::try_exists(&work_dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&work_dir).await.map_err(|e| {
                fail(format!("Failed to clear {}: {}", work_dir.display(), e))
            })?;
        }
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| fail(format!("Failed to create {}: {}", work_dir.display(), e)))?;

        let request = CompileRequest {
            target,
            version: version.clone(),
            flags,
            output: work_dir.join(target.file_name(&self.artifact_name)),
            work_dir,
        };

        info!(build_target = %target, %version, "build started");
        match self.compiler.compile(&request).await {
            Ok(bytes) => {
                let artifact = Artifact::new(target, version.clone(), bytes);
                info!(
                    build_target = %target,
                    size = artifact.len(),
                    sha256 = %artifact.sha256(),
                    "build succeeded"
                );
                Ok(artifact)
            }
            Err(e) => {
                let err = fail(format!("{:#}", e));
                warn!(build_target = %target, error = %err.cause, "build failed");
                Err(err)
            }
        }
    }

    /// Compile every target concurrently. One target's failure never stops
    /// another from finishing.
    pub async fn build_all(
        &self,
        targets: &[BuildTarget],
        version: &Version,
        flags: PlatformFlags,
    ) -> MatrixReport {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let jobs = targets.iter().map(|&target| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => self.build_one(target, version, flags).await,
                    Err(e) => Err(BuildError::new(target, e.to_string())),
                };
                (target, result)
            }
        });

        MatrixReport {
            results: join_all(jobs).await.into_iter().collect(),
        }
    }
}
