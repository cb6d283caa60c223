//! Run statistics and report files
//!
//! Everything here is a pure function of the outcome sequence, so the same
//! outcomes always give the same statistics.

use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};
use std::fmt::Write as _;
use std::io;
use std::path::Path;
use std::time::Duration;

use super::result::{Outcome, SampleOutcome};

fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Aggregate counts and timing over one run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStatistics {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,

    /// Sum of every sample's elapsed time
    #[serde(serialize_with = "as_secs")]
    pub total_elapsed: Duration,

    /// Mean over samples that were actually processed (not skipped)
    #[serde(serialize_with = "as_secs")]
    pub mean_elapsed: Duration,

    #[serde(skip)]
    processed_elapsed: Duration,
}

impl RunStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one outcome into the statistics
    pub fn record(&mut self, outcome: &SampleOutcome) {
        self.total += 1;
        self.total_elapsed += outcome.elapsed;
        match outcome.outcome {
            Outcome::Success => self.succeeded += 1,
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
        }
        if !outcome.outcome.is_skipped() {
            self.processed_elapsed += outcome.elapsed;
        }

        let processed = self.succeeded + self.failed;
        self.mean_elapsed = if processed == 0 {
            Duration::ZERO
        } else {
            self.processed_elapsed / processed as u32
        };
    }

    /// Succeeded samples as a percentage of all samples (0 for an empty run)
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64 * 100.0
        }
    }
}

/// Summarizes outcomes and writes the run-level report files
pub struct RunReporter;

impl RunReporter {
    pub fn summarize(outcomes: &[SampleOutcome]) -> RunStatistics {
        let mut stats = RunStatistics::new();
        for outcome in outcomes {
            stats.record(outcome);
        }
        stats
    }

    /// One `key<TAB>reason` line per non-successful outcome
    pub fn error_lines(outcomes: &[SampleOutcome]) -> Vec<String> {
        outcomes
            .iter()
            .filter_map(|o| {
                let reason = match &o.outcome {
                    Outcome::Success => return None,
                    Outcome::Failed { stage, reason } => format!("{}: {}", stage, reason),
                    Outcome::Skipped { reason } => format!("skipped: {}", reason),
                };
                Some(format!("{}\t{}", o.key(), single_line(&reason)))
            })
            .collect()
    }

    /// Write the error list, returning the number of lines written
    pub fn write_error_list(outcomes: &[SampleOutcome], destination: &Path) -> io::Result<usize> {
        let lines = Self::error_lines(outcomes);
        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        std::fs::write(destination, content)?;
        Ok(lines.len())
    }

    /// Short human-readable summary printed at the end of every run
    pub fn render_summary(stats: &RunStatistics) -> String {
        format!(
            "Total: {}\nSucceeded: {}\nFailed: {}\nSkipped: {}\nSuccess rate: {:.1}%\nTotal time: {:.1}s\nMean time per sample: {:.1}s",
            stats.total,
            stats.succeeded,
            stats.failed,
            stats.skipped,
            stats.success_rate(),
            stats.total_elapsed.as_secs_f64(),
            stats.mean_elapsed.as_secs_f64()
        )
    }

    /// Full processing report listing every sample by outcome
    pub fn render_report(
        outcomes: &[SampleOutcome],
        stats: &RunStatistics,
        generated_at: DateTime<Local>,
        log_files: &[&Path],
    ) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "=== Processing report ===");
        let _ = writeln!(report, "Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(report);
        let _ = writeln!(report, "=== Statistics ===");
        let _ = writeln!(report, "{}", Self::render_summary(stats));
        let _ = writeln!(report);

        let succeeded: Vec<&SampleOutcome> =
            outcomes.iter().filter(|o| o.outcome.is_success()).collect();
        if !succeeded.is_empty() {
            let _ = writeln!(report, "=== Succeeded ===");
            for o in succeeded {
                let _ = writeln!(report, "[ok] {}", o.key());
                for warning in &o.warnings {
                    let _ = writeln!(report, "     warning: {}", single_line(warning));
                }
            }
            let _ = writeln!(report);
        }

        let failed: Vec<&SampleOutcome> = outcomes.iter().filter(|o| o.outcome.is_failed()).collect();
        if !failed.is_empty() {
            let _ = writeln!(report, "=== Failed ===");
            for o in failed {
                if let Outcome::Failed { stage, reason } = &o.outcome {
                    let _ = writeln!(report, "[failed] {} at {}: {}", o.key(), stage, single_line(reason));
                }
            }
            let _ = writeln!(report);
        }

        let skipped: Vec<&SampleOutcome> =
            outcomes.iter().filter(|o| o.outcome.is_skipped()).collect();
        if !skipped.is_empty() {
            let _ = writeln!(report, "=== Skipped ===");
            for o in skipped {
                if let Outcome::Skipped { reason } = &o.outcome {
                    let _ = writeln!(report, "[skipped] {}: {}", o.key(), reason);
                }
            }
            let _ = writeln!(report);
        }

        if !log_files.is_empty() {
            let _ = writeln!(report, "=== Log files ===");
            for path in log_files {
                let _ = writeln!(report, "{}", path.display());
            }
        }

        report
    }

    pub fn write_report(
        outcomes: &[SampleOutcome],
        stats: &RunStatistics,
        generated_at: DateTime<Local>,
        log_files: &[&Path],
        destination: &Path,
    ) -> io::Result<()> {
        std::fs::write(
            destination,
            Self::render_report(outcomes, stats, generated_at, log_files),
        )
    }

    /// Machine-readable statistics plus per-sample outcomes
    pub fn write_summary_json(
        outcomes: &[SampleOutcome],
        stats: &RunStatistics,
        run_id: &str,
        destination: &Path,
    ) -> io::Result<()> {
        #[derive(Serialize)]
        struct Summary<'a> {
            run_id: &'a str,
            statistics: &'a RunStatistics,
            success_rate: f64,
            samples: Vec<SampleSummary<'a>>,
        }

        #[derive(Serialize)]
        struct SampleSummary<'a> {
            key: &'a str,
            #[serde(flatten)]
            outcome: &'a Outcome,
            elapsed: f64,
            warnings: &'a [String],
        }

        let summary = Summary {
            run_id,
            statistics: stats,
            success_rate: stats.success_rate(),
            samples: outcomes
                .iter()
                .map(|o| SampleSummary {
                    key: o.key(),
                    outcome: &o.outcome,
                    elapsed: o.elapsed.as_secs_f64(),
                    warnings: &o.warnings,
                })
                .collect(),
        };

        let json = serde_json::to_string_pretty(&summary)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(destination, json)
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
