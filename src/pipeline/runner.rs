//! Stage runner for release graphs.

use super::plan::{BARRIER_STAGE, VERSION_STAGE, upload_stage};
use super::step::run_step;
use crate::artifact::Artifact;
use crate::bake::{BakedImage, ImageBakery, ImageVariant};
use crate::barrier::{PromotionResult, ReleaseBarrier};
use crate::build::{BuildMatrixCoordinator, PlatformFlags};
use crate::dag::{DependencyOutcome, Stage, StageInputs, StageRunner};
use crate::errors::{BakeError, BarrierError, BuildError, PromotionError};
use crate::promote::{ArtifactPromoter, PromotionReport};
use crate::release_config::StepConfig;
use crate::target::BuildTarget;
use crate::version::Version;
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Output of one release stage.
#[derive(Debug, Clone)]
pub enum StageOutput {
    Version(Version),
    Artifact(Artifact),
    Promotion(PromotionReport),
    BarrierOpen,
    Image(BakedImage),
    Step,
}

/// Typed failures collected while stages run.
#[derive(Debug, Clone, Default)]
pub struct RunFailures {
    pub builds: Vec<BuildError>,
    pub promotions: Vec<PromotionError>,
    pub barrier: Option<BarrierError>,
    pub bakes: Vec<BakeError>,
}

/// Executes build, upload, barrier, bake and step stages.
pub struct ReleaseStageRunner {
    version: Version,
    flags: PlatformFlags,
    coordinator: BuildMatrixCoordinator,
    promoter: ArtifactPromoter,
    barrier: ReleaseBarrier,
    bakery: Option<ImageBakery>,
    variants: BTreeMap<String, ImageVariant>,
    steps: BTreeMap<String, StepConfig>,
    step_dir: PathBuf,
    failures: Mutex<RunFailures>,
}

impl ReleaseStageRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        version: Version,
        flags: PlatformFlags,
        coordinator: BuildMatrixCoordinator,
        promoter: ArtifactPromoter,
        barrier: ReleaseBarrier,
        bakery: Option<ImageBakery>,
        variants: &[ImageVariant],
        steps: &[StepConfig],
        step_dir: PathBuf,
    ) -> Self {
        Self {
            version,
            flags,
            coordinator,
            promoter,
            barrier,
            bakery,
            variants: variants.iter().map(|v| (v.name.clone(), v.clone())).collect(),
            steps: steps.iter().map(|s| (s.name.clone(), s.clone())).collect(),
            step_dir,
            failures: Mutex::new(RunFailures::default()),
        }
    }

    /// Failures recorded so far.
    pub fn failures(&self) -> RunFailures {
        self.failures
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default()
    }

    fn record(&self, update: impl FnOnce(&mut RunFailures)) {
        if let Ok(mut failures) = self.failures.lock() {
            update(&mut failures);
        }
    }

    fn target_of(stage: &Stage) -> Result<BuildTarget> {
        let subject = stage
            .subject()
            .ok_or_else(|| anyhow!("Stage '{}' names no target", stage.id))?;
        subject.parse::<BuildTarget>().map_err(|e| anyhow!(e))
    }

    async fn build(&self, stage: &Stage) -> Result<StageOutput> {
        let target = Self::target_of(stage)?;
        match self.coordinator.build_one(target, &self.version, self.flags).await {
            Ok(artifact) => Ok(StageOutput::Artifact(artifact)),
            Err(e) => {
                self.record(|f| f.builds.push(e.clone()));
                Err(e.into())
            }
        }
    }

    /// Upload fails only when the versioned write fails; a failed `latest`
    /// alias is kept in the report.
    async fn upload(&self, stage: &Stage, inputs: &StageInputs<StageOutput>) -> Result<StageOutput> {
        let artifact = inputs
            .outputs()
            .find_map(|(_, output)| match output {
                StageOutput::Artifact(a) => Some(a),
                _ => None,
            })
            .ok_or_else(|| anyhow!("Stage '{}' received no artifact", stage.id))?;

        let report = self.promoter.promote(artifact).await;
        if let Err(e) = &report.versioned {
            let err = e.clone();
            self.record(|f| f.promotions.push(err.clone()));
            return Err(err.into());
        }
        if let Err(e) = &report.latest {
            let err = e.clone();
            self.record(|f| f.promotions.push(err));
        }
        Ok(StageOutput::Promotion(report))
    }

    /// Turn upload outcomes into the barrier's view. Skipped uploads never
    /// produced a result, so their targets count as missing.
    fn promotion_results(
        &self,
        inputs: &StageInputs<StageOutput>,
    ) -> BTreeMap<BuildTarget, PromotionResult> {
        let recorded = self.failures().promotions;
        let mut results = BTreeMap::new();
        for target in BuildTarget::ALL {
            match inputs.get(&upload_stage(target)) {
                Some(DependencyOutcome::Completed(StageOutput::Promotion(report))) => {
                    results.insert(target, Ok(report.clone()));
                }
                Some(DependencyOutcome::Failed(cause)) => {
                    let key = self.promoter.versioned_key(&self.version, target);
                    let err = recorded
                        .iter()
                        .find(|e| e.key == key)
                        .cloned()
                        .unwrap_or_else(|| PromotionError::new(key, cause.clone()));
                    results.insert(target, Err(err));
                }
                _ => {}
            }
        }
        results
    }

    async fn bake(&self, stage: &Stage) -> Result<StageOutput> {
        let Some(bakery) = &self.bakery else {
            bail!("Image baking is not configured");
        };
        let name = stage.subject().unwrap_or_default();
        let variant = self
            .variants
            .get(name)
            .ok_or_else(|| anyhow!("Unknown image variant '{}'", name))?;
        match bakery.bake(variant, &self.version).await {
            Ok(image) => Ok(StageOutput::Image(image)),
            Err(e) => {
                self.record(|f| f.bakes.push(e.clone()));
                Err(e.into())
            }
        }
    }

    async fn step(&self, stage: &Stage) -> Result<StageOutput> {
        let name = stage.subject().unwrap_or_default();
        let step = self
            .steps
            .get(name)
            .ok_or_else(|| anyhow!("Unknown step '{}'", name))?;
        run_step(step, &self.version, &self.step_dir).await?;
        Ok(StageOutput::Step)
    }
}

#[async_trait]
impl StageRunner for ReleaseStageRunner {
    type Output = StageOutput;

    async fn run(&self, stage: &Stage, inputs: StageInputs<StageOutput>) -> Result<StageOutput> {
        match stage.kind() {
            VERSION_STAGE => Ok(StageOutput::Version(self.version.clone())),
            "build" => self.build(stage).await,
            "upload" => self.upload(stage, &inputs).await,
            BARRIER_STAGE => {
                let results = self.promotion_results(&inputs);
                match self.barrier.wait(&results) {
                    Ok(()) => Ok(StageOutput::BarrierOpen),
                    Err(e) => {
                        self.record(|f| f.barrier = Some(e.clone()));
                        Err(e.into())
                    }
                }
            }
            "bake" => self.bake(stage).await,
            "step" => self.step(stage).await,
            other => bail!("Unknown stage kind '{}'", other),
        }
    }
}
