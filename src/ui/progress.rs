//! Result rendering and spinners for single commands.

use crate::bake::BakedImage;
use crate::build::MatrixReport;
use crate::pipeline::ReleaseOutcome;
use crate::ui::dag_progress::UiMode;
use crate::ui::icons::{CHECK, CROSS, IMAGE, PACKAGE, UPLOAD};
use console::{Term, style};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::time::Duration;

/// Spinner shown while a single long-running command works.
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    pub fn start(message: impl Into<String>) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner} {msg}") {
            bar.set_style(spinner_style);
        }
        bar.set_message(message.into());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.bar.set_message(message.into());
    }

    pub fn finish(self) {
        self.bar.finish_and_clear();
    }
}

/// Prints what a run produced once it is over.
pub struct OutcomePrinter {
    mode: UiMode,
    term: Term,
}

impl OutcomePrinter {
    pub fn new(mode: UiMode) -> Self {
        Self {
            mode,
            term: Term::stdout(),
        }
    }

    pub fn print(&self, outcome: &ReleaseOutcome) {
        if self.mode == UiMode::Json {
            if let Ok(json) = serde_json::to_string(&serde_json::json!({
                "type": "outcome",
                "outcome": outcome,
            })) {
                let _ = writeln!(&self.term, "{}", json);
            }
            return;
        }
        for line in outcome_lines(outcome) {
            let _ = writeln!(&self.term, "{}", line);
        }
    }
}

/// Human-readable summary of a run.
pub fn outcome_lines(outcome: &ReleaseOutcome) -> Vec<String> {
    let mut lines = vec![format!(
        "Release {} ({} track, run {})",
        style(&outcome.version).cyan().bold(),
        outcome.trigger.track(),
        style(&outcome.run_id).dim()
    )];

    for record in &outcome.artifacts {
        lines.push(format!(
            "  {}{} {} bytes sha256:{}",
            PACKAGE,
            record.file_name,
            record.size,
            short_hash(&record.sha256)
        ));
    }
    for record in &outcome.promotions {
        let latest = match &record.latest_error {
            None => style(record.latest_key.clone()).green().to_string(),
            Some(e) => style(format!("latest not updated: {}", e)).yellow().to_string(),
        };
        lines.push(format!("  {}{} + {}", UPLOAD, record.versioned_key, latest));
    }

    let barrier = if outcome.barrier_open() {
        format!("{}barrier open", CHECK)
    } else {
        format!("{}barrier closed", CROSS)
    };
    lines.push(format!("  {}", barrier));

    lines.extend(outcome.images.iter().map(image_line));
    lines
}

fn image_line(image: &BakedImage) -> String {
    let reused = if image.reused {
        style(" (reused)").dim().to_string()
    } else {
        String::new()
    };
    format!(
        "  {}{} {} \"{}\"{}",
        IMAGE, image.variant, image.image_id, image.image_name, reused
    )
}

/// Lines for a standalone matrix build.
pub fn matrix_lines(report: &MatrixReport, artifact_name: &str) -> Vec<String> {
    report
        .results
        .iter()
        .map(|(target, result)| match result {
            Ok(artifact) => format!(
                "{}{} {} bytes sha256:{}",
                CHECK,
                artifact.file_name(artifact_name),
                artifact.len(),
                short_hash(artifact.sha256())
            ),
            Err(e) => format!("{}{}: {}", CROSS, target, e.cause),
        })
        .collect()
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
