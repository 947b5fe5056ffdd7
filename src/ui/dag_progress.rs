//! Release graph progress UI.
//!
//! Renders [`StageEvent`]s in one of three modes:
//! - `full`: progress bars per running stage
//! - `minimal`: one line per finished stage
//! - `json`: one JSON object per event, for machine consumption

use crate::dag::{DagSummary, StageEvent, StageOutcome, StageResult};
use crate::ui::icons::{BARRIER, CHECK, CLOCK, CROSS, IMAGE, PACKAGE, RUNNING, SKIP, SPARKLE, UPLOAD, WAVE};
use clap::ValueEnum;
use console::{Emoji, Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

/// Output mode for the progress UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum UiMode {
    /// Progress bars per stage
    #[default]
    Full,
    /// Single-line status updates
    Minimal,
    /// JSON-formatted events
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "minimal" => Self::Minimal,
            _ => Self::Full,
        })
    }
}

impl UiMode {
    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

/// Progress display for one release run.
///
/// Events arrive from a single task, so the bar map is only ever locked
/// briefly and never re-entered.
pub struct DagUI {
    mode: UiMode,
    multi: MultiProgress,
    header_bar: ProgressBar,
    stage_bars: Mutex<HashMap<String, ProgressBar>>,
    verbose: bool,
    term: Term,
}

impl DagUI {
    pub fn new(total_stages: usize, mode: UiMode, verbose: bool) -> Self {
        let multi = if mode == UiMode::Full {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        let header_bar = multi.add(ProgressBar::new(total_stages as u64));
        if let Ok(header_style) =
            ProgressStyle::default_bar().template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            header_bar.set_style(header_style.progress_chars("█▓▒░"));
        }
        header_bar.set_prefix("Release");
        header_bar.set_message("Starting...");

        Self {
            mode,
            multi,
            header_bar,
            stage_bars: Mutex::new(HashMap::new()),
            verbose,
            term: Term::stdout(),
        }
    }

    pub fn mode(&self) -> UiMode {
        self.mode
    }

    pub fn handle_event(&self, event: &StageEvent) {
        match self.mode {
            UiMode::Json => self.handle_json(event),
            UiMode::Minimal => self.handle_minimal(event),
            UiMode::Full => self.handle_full(event),
        }
    }

    fn handle_json(&self, event: &StageEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(&self.term, "{}", json);
        }
    }

    fn handle_minimal(&self, event: &StageEvent) {
        match event {
            StageEvent::Planned { waves } => {
                for (i, wave) in waves.iter().enumerate() {
                    let _ = writeln!(&self.term, "Wave {}: {}", i, wave.join(", "));
                }
            }
            StageEvent::Finished { result } => {
                let _ = writeln!(&self.term, "{}", minimal_line(result));
            }
            StageEvent::DagCompleted { success, summary } => {
                let _ = writeln!(
                    &self.term,
                    "Done: {}/{} {}",
                    summary.completed,
                    summary.total_stages,
                    if *success { "✓" } else { "✗" }
                );
            }
            StageEvent::Started { .. } => {}
        }
    }

    fn handle_full(&self, event: &StageEvent) {
        match event {
            StageEvent::Planned { waves } => self.print_plan(waves),
            StageEvent::Started { stage, wave } => self.on_stage_started(stage, *wave),
            StageEvent::Finished { result } => self.on_stage_finished(result),
            StageEvent::DagCompleted { success, summary } => {
                self.on_dag_completed(*success, summary)
            }
        }
    }

    fn println(&self, line: impl AsRef<str>) {
        if self.multi.println(line.as_ref()).is_err() {
            eprintln!("{}", line.as_ref());
        }
    }

    fn print_plan(&self, waves: &[Vec<String>]) {
        let total: usize = waves.iter().map(Vec::len).sum();
        self.println(format!("{} Release plan", style("═".repeat(60)).cyan()));
        self.println(format!(
            "  {} stages in {} waves",
            style(total).yellow().bold(),
            style(waves.len()).yellow().bold()
        ));
        for (i, wave) in waves.iter().enumerate() {
            let parallel = if wave.len() > 1 {
                format!(" {}", style("(parallel)").dim())
            } else {
                String::new()
            };
            self.println(format!(
                "  {}Wave {}: [{}]{}",
                WAVE,
                style(i).cyan(),
                style(wave.join(", ")).yellow(),
                parallel
            ));
        }
        self.println(format!("{}", style("═".repeat(60)).cyan()));
    }

    fn on_stage_started(&self, stage: &str, wave: usize) {
        let bar = self.multi.add(ProgressBar::new_spinner());
        if let Ok(bar_style) = ProgressStyle::default_spinner().template("  {spinner} {prefix:.bold} {msg}") {
            bar.set_style(bar_style);
        }
        bar.set_prefix(format!("{}{}", stage_icon(stage), stage));
        bar.set_message(format!("{}running", RUNNING));
        bar.enable_steady_tick(Duration::from_millis(100));

        if let Ok(mut bars) = self.stage_bars.lock() {
            bars.insert(stage.to_string(), bar);
        }
        self.header_bar.set_message(format!("wave {}", wave));

        if self.verbose {
            self.println(format!(
                "  {} {} started in wave {}",
                style("▶").cyan(),
                style(stage).yellow(),
                wave
            ));
        }
    }

    fn on_stage_finished(&self, result: &StageResult) {
        let bar = self
            .stage_bars
            .lock()
            .ok()
            .and_then(|mut bars| bars.remove(&result.stage));
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
        self.header_bar.inc(1);

        let line = match result.outcome {
            StageOutcome::Succeeded => format!(
                "  {}{} {} ({})",
                CHECK,
                style(&result.stage).green().bold(),
                style("done").green(),
                format_duration(result.duration)
            ),
            StageOutcome::Failed => format!(
                "  {}{} {}: {}",
                CROSS,
                style(&result.stage).red().bold(),
                style("failed").red(),
                result.error.as_deref().unwrap_or("unknown error")
            ),
            StageOutcome::Skipped => format!(
                "  {}{} {}: {}",
                SKIP,
                style(&result.stage).yellow(),
                style("skipped").yellow(),
                style(result.error.as_deref().unwrap_or("")).dim()
            ),
        };
        self.println(line);
    }

    fn on_dag_completed(&self, success: bool, summary: &DagSummary) {
        self.header_bar.finish_and_clear();

        self.println(format!("{}", style("═".repeat(60)).cyan()));
        if success {
            self.println(format!(
                "{}Release {} {}",
                SPARKLE,
                style("COMPLETE").green().bold(),
                SPARKLE
            ));
        } else {
            self.println(format!("{}Release {}", CROSS, style("FAILED").red().bold()));
        }
        self.println(format!("{}", style("═".repeat(60)).cyan()));

        self.println(format!(
            "{}Stages: {}/{} completed",
            CLOCK,
            style(summary.completed).green().bold(),
            summary.total_stages
        ));
        if summary.failed > 0 {
            self.println(format!("     {} stages failed", style(summary.failed).red().bold()));
        }
        if summary.skipped > 0 {
            self.println(format!("     {} stages skipped", style(summary.skipped).yellow()));
        }
        self.println(format!(
            "     Duration: {}",
            style(format_duration(summary.duration)).cyan()
        ));

        if self.verbose && !summary.stage_results.is_empty() {
            self.println(format!("{}", style("Stage breakdown:").underlined()));
            for result in summary.stage_results.values() {
                self.println(format!("  {}", minimal_line(result)));
            }
        }
    }
}

fn stage_icon(stage: &str) -> Emoji<'static, 'static> {
    match stage.split(':').next().unwrap_or_default() {
        "build" => PACKAGE,
        "upload" => UPLOAD,
        "barrier" => BARRIER,
        "bake" => IMAGE,
        _ => Emoji("", ""),
    }
}

fn minimal_line(result: &StageResult) -> String {
    match result.outcome {
        StageOutcome::Succeeded => format!("✓ {} ({})", result.stage, format_duration(result.duration)),
        StageOutcome::Failed => format!(
            "✗ {} ({})",
            result.stage,
            result.error.as_deref().unwrap_or("failed")
        ),
        StageOutcome::Skipped => format!(
            "- {} ({})",
            result.stage,
            result.error.as_deref().unwrap_or("skipped")
        ),
    }
}

/// Format a duration for display.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ms", d.as_millis())
    }
}
