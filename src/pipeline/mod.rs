//! End-to-end release pipeline.
//!
//! A run resolves one version from its trigger, then executes the release
//! graph: every target is built and promoted independently, the barrier
//! waits for all uploads to settle, and image variants bake only once it
//! opens. User steps hang off any stage by id.

mod outcome;
mod plan;
mod runner;
mod step;

pub use outcome::{ArtifactRecord, PromotionRecord, ReleaseOutcome};
pub use plan::{
    BARRIER_STAGE, VERSION_STAGE, bake_stage, build_stage, plan_stages, step_stage, upload_stage,
};
pub use runner::{ReleaseStageRunner, RunFailures, StageOutput};
pub use step::run_step;

use crate::bake::{ImageBakery, ImageBuilder, ImageVariant};
use crate::barrier::ReleaseBarrier;
use crate::build::{BuildMatrixCoordinator, Compiler, PlatformFlags};
use crate::config::Config;
use crate::dag::{DagBuilder, DagConfig, DagExecutor, Stage, StageEvent};
use crate::errors::PipelineError;
use crate::promote::{ArtifactPromoter, LatestPolicy};
use crate::release_config::StepConfig;
use crate::store::DistributionStore;
use crate::target::BuildTarget;
use crate::version::{Trigger, Version, VersionResolver};
use anyhow::{Result, bail};
use chrono::Utc;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Everything a run needs besides its backends.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub artifact_name: String,
    pub resolver: VersionResolver,
    pub targets: Vec<BuildTarget>,
    /// Targets the barrier waits for; the reference target always is one
    pub required: Vec<BuildTarget>,
    pub reference: BuildTarget,
    pub flags: PlatformFlags,
    pub build_dir: PathBuf,
    pub latest_policy: LatestPolicy,
    pub variants: Vec<ImageVariant>,
    pub recipes_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub image_prefix: String,
    pub steps: Vec<StepConfig>,
    pub step_dir: PathBuf,
    pub dag: DagConfig,
}

impl PipelineOptions {
    /// The standard release with every working directory under `root`.
    pub fn new(root: &Path) -> Self {
        Self {
            artifact_name: "dstack-runner".to_string(),
            resolver: VersionResolver::default(),
            targets: BuildTarget::ALL.to_vec(),
            required: BuildTarget::ALL.to_vec(),
            reference: BuildTarget::REFERENCE,
            flags: PlatformFlags {
                accelerator_log: true,
            },
            build_dir: root.join("build"),
            latest_policy: LatestPolicy::default(),
            variants: ImageVariant::defaults(),
            recipes_dir: root.join("packer"),
            staging_dir: root.join("staging"),
            image_prefix: String::new(),
            steps: Vec::new(),
            step_dir: root.to_path_buf(),
            dag: DagConfig::default(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let toml = &config.toml;
        let matrix = toml.targets()?;
        let reference = toml.reference_target()?;
        if !matrix.iter().any(|(t, _)| *t == reference) {
            bail!("Reference target {} is not in the build matrix", reference);
        }

        Ok(Self {
            artifact_name: toml.project.artifact_name.clone(),
            resolver: VersionResolver::new(toml.version.offset),
            targets: matrix.iter().map(|(t, _)| *t).collect(),
            required: toml.required_targets()?,
            reference,
            flags: PlatformFlags {
                accelerator_log: toml.build.accelerator_log,
            },
            build_dir: config.build_dir(),
            latest_policy: toml.store.latest_policy,
            variants: if config.bake_enabled() {
                toml.bakery.variants.clone()
            } else {
                Vec::new()
            },
            recipes_dir: config.recipes_dir(),
            staging_dir: config.staging_dir(),
            image_prefix: config.image_prefix(),
            steps: toml.steps.clone(),
            step_dir: config.project_dir.clone(),
            dag: config.dag_config(),
        })
    }

    /// Required targets plus the reference target.
    pub fn barrier_set(&self) -> BTreeSet<BuildTarget> {
        let mut set: BTreeSet<BuildTarget> = self.required.iter().copied().collect();
        set.insert(self.reference);
        set
    }
}

/// Runs releases against a compiler, a store and an optional image builder.
pub struct ReleasePipeline {
    compiler: Arc<dyn Compiler>,
    store: Arc<dyn DistributionStore>,
    image_builder: Option<Arc<dyn ImageBuilder>>,
    options: PipelineOptions,
    event_tx: Option<mpsc::Sender<StageEvent>>,
}

impl ReleasePipeline {
    pub fn new(
        compiler: Arc<dyn Compiler>,
        store: Arc<dyn DistributionStore>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            compiler,
            store,
            image_builder: None,
            options,
            event_tx: None,
        }
    }

    /// Enable image baking. Without a builder no bake stages are planned.
    pub fn with_image_builder(mut self, builder: Arc<dyn ImageBuilder>) -> Self {
        self.image_builder = Some(builder);
        self
    }

    pub fn with_event_channel(mut self, tx: mpsc::Sender<StageEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Variants that will actually be baked.
    fn active_variants(&self) -> &[ImageVariant] {
        if self.image_builder.is_some() {
            &self.options.variants
        } else {
            &[]
        }
    }

    /// The stages a run would execute, validated.
    pub fn plan(&self) -> Result<Vec<Stage>, PipelineError> {
        if !self.options.targets.contains(&self.options.reference) {
            return Err(PipelineError::InvalidGraph(format!(
                "reference target {} is not in the build matrix",
                self.options.reference
            )));
        }
        let stages = plan_stages(
            &self.options.targets,
            self.active_variants(),
            &self.options.steps,
        );
        DagBuilder::new(stages.clone())
            .build()
            .map_err(|e| PipelineError::InvalidGraph(format!("{:#}", e)))?;
        Ok(stages)
    }

    fn promoter(&self) -> ArtifactPromoter {
        ArtifactPromoter::new(Arc::clone(&self.store), &self.options.artifact_name)
            .with_latest_policy(self.options.latest_policy)
    }

    fn stage_runner(&self, version: &Version) -> ReleaseStageRunner {
        let options = &self.options;
        let coordinator = BuildMatrixCoordinator::new(
            Arc::clone(&self.compiler),
            &options.build_dir,
            &options.artifact_name,
        )
        .with_max_parallel(options.dag.max_parallel);
        let bakery = self.image_builder.as_ref().map(|builder| {
            ImageBakery::new(
                Arc::clone(&self.store),
                Arc::clone(builder),
                &options.artifact_name,
                &options.recipes_dir,
                &options.staging_dir,
            )
            .with_reference(options.reference)
            .with_prefix(&options.image_prefix)
        });

        ReleaseStageRunner::new(
            version.clone(),
            options.flags,
            coordinator,
            self.promoter(),
            ReleaseBarrier::new(options.barrier_set()),
            bakery,
            self.active_variants(),
            &options.steps,
            options.step_dir.clone(),
        )
    }

    /// Execute one release.
    ///
    /// Only an invalid trigger or graph is an `Err` here; stage failures are
    /// recorded in the outcome. Use [`ReleaseOutcome::into_result`] to turn
    /// them into an error.
    pub async fn run(&self, trigger: &Trigger) -> Result<ReleaseOutcome, PipelineError> {
        let started_at = Utc::now();
        let version = self.options.resolver.resolve(trigger)?;
        let stages = self.plan()?;
        let run_id = Uuid::new_v4().to_string();
        info!(
            %run_id,
            %version,
            track = trigger.track(),
            stages = stages.len(),
            store = %self.store.describe(),
            "release started"
        );

        let runner = Arc::new(self.stage_runner(&version));
        let mut executor = DagExecutor::new(Arc::clone(&runner), self.options.dag.clone());
        if let Some(tx) = &self.event_tx {
            executor = executor.with_event_channel(tx.clone());
        }
        let result = executor.execute(&stages).await?;

        let promoter = self.promoter();
        let mut artifacts = Vec::new();
        let mut promotions = Vec::new();
        let mut images = Vec::new();
        for output in result.outputs.values() {
            match output {
                StageOutput::Artifact(artifact) => artifacts.push(ArtifactRecord {
                    target: artifact.target(),
                    file_name: artifact.file_name(&self.options.artifact_name),
                    sha256: artifact.sha256().to_string(),
                    size: artifact.len() as u64,
                }),
                StageOutput::Promotion(report) => {
                    if let Ok(entry) = &report.versioned {
                        promotions.push(PromotionRecord {
                            target: report.target,
                            versioned_key: entry.key.clone(),
                            latest_key: promoter.latest_key(report.target),
                            latest_error: report.latest.as_ref().err().map(|e| e.to_string()),
                        });
                    }
                }
                StageOutput::Image(image) => images.push(image.clone()),
                StageOutput::Version(_) | StageOutput::BarrierOpen | StageOutput::Step => {}
            }
        }

        let outcome = ReleaseOutcome {
            run_id,
            trigger: trigger.clone(),
            version,
            started_at,
            finished_at: Utc::now(),
            state: result.state,
            store: self.store.describe(),
            reference: self.options.reference,
            required: self.options.barrier_set(),
            summary: result.summary,
            artifacts,
            promotions,
            images,
            failures: runner.failures(),
        };
        info!(
            run_id = %outcome.run_id,
            version = %outcome.version,
            artifacts = outcome.artifacts.len(),
            images = outcome.images.len(),
            barrier_open = outcome.barrier_open(),
            "release finished"
        );
        Ok(outcome)
    }
}
