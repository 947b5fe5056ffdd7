//! Release graph layout.
//!
//! ```text
//! version ─┬─ build:<target> ── upload:<target> ─┐
//!          └─ ...                                ├─ barrier ─┬─ bake:<variant>
//!                                                ┘           └─ ...
//! ```
//!
//! User steps hang off any of these by id.

use crate::bake::ImageVariant;
use crate::dag::Stage;
use crate::release_config::StepConfig;
use crate::target::BuildTarget;
use std::collections::HashSet;

pub const VERSION_STAGE: &str = "version";
pub const BARRIER_STAGE: &str = "barrier";

pub fn build_stage(target: BuildTarget) -> String {
    format!("build:{}", target.slug())
}

pub fn upload_stage(target: BuildTarget) -> String {
    format!("upload:{}", target.slug())
}

pub fn bake_stage(variant: &str) -> String {
    format!("bake:{}", variant)
}

pub fn step_stage(name: &str) -> String {
    format!("step:{}", name)
}

/// Lay out every stage of a release.
pub fn plan_stages(
    targets: &[BuildTarget],
    variants: &[ImageVariant],
    steps: &[StepConfig],
) -> Vec<Stage> {
    let mut stages = vec![Stage::new(VERSION_STAGE, vec![])];

    for &target in targets {
        stages.push(Stage::new(build_stage(target), vec![VERSION_STAGE.to_string()]));
        stages.push(Stage::new(upload_stage(target), vec![build_stage(target)]));
    }

    stages.push(Stage::join(
        BARRIER_STAGE,
        targets.iter().map(|t| upload_stage(*t)).collect(),
    ));

    for variant in variants {
        stages.push(Stage::new(
            bake_stage(&variant.name),
            vec![BARRIER_STAGE.to_string()],
        ));
    }

    let step_names: HashSet<&str> = steps.iter().map(|s| s.name.as_str()).collect();
    let builtin: HashSet<String> = stages.iter().map(|s| s.id.clone()).collect();
    for step in steps {
        let needs = step
            .needs
            .iter()
            .map(|need| {
                if builtin.contains(need) || need.starts_with("step:") {
                    need.clone()
                } else if step_names.contains(need.as_str()) {
                    step_stage(need)
                } else {
                    // Left as-is; graph validation reports it.
                    need.clone()
                }
            })
            .collect();
        stages.push(Stage::new(step_stage(&step.name), needs));
    }

    stages
}
