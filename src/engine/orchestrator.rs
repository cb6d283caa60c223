//! Pipeline orchestrator
//!
//! Walks the samples in registry order and runs the stage pipeline for each
//! one. Every sample ends in exactly one outcome; a failing sample never
//! stops the batch. Cancellation is checked between samples: once the flag
//! is set, the remaining samples are recorded as skipped.
//!
//! A workspace that would overlap a reserved directory (the template tree,
//! the log directory) fails before anything is written into it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::error::StageError;
use super::pipeline::StagePipeline;
use super::progress::{ProgressEvent, ProgressSender, ProgressTracker};
use super::result::{Outcome, SampleOutcome};
use super::run_log::{RunLog, SampleLog};
use super::workspace::Workspace;
use crate::workflow::{Sample, StageKind};

pub const SKIP_COMPLETE: &str = "already complete";
pub const SKIP_CANCELLED: &str = "run cancelled";

pub struct Orchestrator {
    pipeline: StagePipeline,
    workdir: PathBuf,
    reserved: Vec<PathBuf>,
    skip_completed: bool,
    cancelled: Arc<AtomicBool>,
    progress: Option<ProgressSender>,
}

impl Orchestrator {
    pub fn new(pipeline: StagePipeline, workdir: impl AsRef<Path>) -> Self {
        Self {
            reserved: pipeline.reserved_paths(),
            pipeline,
            workdir: workdir.as_ref().to_path_buf(),
            skip_completed: true,
            cancelled: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    /// Refuse any sample workspace that overlaps `dir`
    pub fn reserve(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reserved.push(dir.into());
        self
    }

    pub fn skip_completed(mut self, enabled: bool) -> Self {
        self.skip_completed = enabled;
        self
    }

    /// Share a cancellation flag with the caller (e.g. a Ctrl-C handler)
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    pub fn progress(mut self, sender: ProgressSender) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.progress {
            let _ = sender.send(event);
        }
    }

    /// Process every sample, returning one outcome per sample in input order
    pub async fn run(&self, samples: &[Sample], run_log: &RunLog) -> Vec<SampleOutcome> {
        let total = samples.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut tracker = ProgressTracker::new(total);
        let mut cancelled = false;

        run_log.info(&format!(
            "Processing {} samples under {}",
            total,
            self.workdir.display()
        ));
        self.emit(ProgressEvent::Started { total });

        for (index, sample) in samples.iter().enumerate() {
            if !cancelled && self.cancelled.load(Ordering::SeqCst) {
                cancelled = true;
                run_log.warn(&format!(
                    "Run cancelled; {} samples left unprocessed",
                    total - index
                ));
            }
            if cancelled {
                let outcome = SampleOutcome::skipped(sample, SKIP_CANCELLED);
                tracker.record(&outcome);
                outcomes.push(outcome);
                continue;
            }

            self.emit(ProgressEvent::SampleStarted {
                index,
                total,
                key: sample.key.clone(),
            });
            run_log.info(&format!(
                "[{}/{}] Sample {} (CID_A={}, CID_B={})",
                index + 1,
                total,
                sample.key,
                sample.cid_a,
                sample.cid_b
            ));

            let outcome = self.process(sample, run_log).await;
            tracker.record(&outcome);
            self.record(&outcome, run_log);

            self.emit(ProgressEvent::SampleFinished {
                index,
                total,
                key: sample.key.clone(),
                outcome: outcome.outcome.clone(),
                remaining: tracker.remaining(),
            });
            outcomes.push(outcome);
        }

        self.emit(ProgressEvent::Finished {
            processed: tracker.processed(),
            cancelled,
        });
        outcomes
    }

    fn record(&self, outcome: &SampleOutcome, run_log: &RunLog) {
        let secs = outcome.elapsed.as_secs_f64();
        match &outcome.outcome {
            Outcome::Success => {
                run_log.info(&format!("Sample {} completed in {:.1}s", outcome.key(), secs));
                for warning in &outcome.warnings {
                    run_log.warn(&format!("Sample {}: {}", outcome.key(), warning));
                }
            }
            Outcome::Failed { stage, reason } => run_log.error(&format!(
                "Sample {} failed at {} after {:.1}s: {}",
                outcome.key(),
                stage,
                secs,
                reason
            )),
            Outcome::Skipped { reason } => {
                run_log.info(&format!("Sample {} skipped: {}", outcome.key(), reason))
            }
        }
    }

    async fn process(&self, sample: &Sample, run_log: &RunLog) -> SampleOutcome {
        let started = Instant::now();
        let workspace = Workspace::for_sample(&self.workdir, sample);

        if let Some(reserved) = self.reserved.iter().find(|dir| workspace.overlaps(dir)) {
            let error = StageError::ReservedPath {
                path: workspace.root().display().to_string(),
                reserved: reserved.display().to_string(),
            };
            return Self::failed_before_start(sample, error, started);
        }

        if self.skip_completed && workspace.is_complete() {
            return SampleOutcome::skipped(sample, SKIP_COMPLETE);
        }

        if let Err(error) = workspace.ensure() {
            let error = StageError::Workspace {
                path: workspace.root().display().to_string(),
                error,
            };
            return Self::failed_before_start(sample, error, started);
        }

        let log = SampleLog::open(&workspace).unwrap_or_else(|e| {
            run_log.warn(&format!(
                "Sample {}: per-sample log unavailable: {}",
                sample.key, e
            ));
            SampleLog::discard()
        });
        log.note(&format!(
            "Sample {} (CID_A={}, CID_B={}) run {}",
            sample.key,
            sample.cid_a,
            sample.cid_b,
            run_log.run_id()
        ));

        // Artifacts from an earlier run whose deployment did not succeed
        let first = if self.skip_completed && workspace.has_final_artifacts() {
            log.note("Final artifacts present; resuming at Deploy");
            run_log.info(&format!(
                "Sample {}: final artifacts present, retrying deployment",
                sample.key
            ));
            StageKind::Deploy
        } else {
            StageKind::ALL[0]
        };

        let run = self.pipeline.run_from(first, sample, &workspace, &log).await;

        let outcome = match &run.failure {
            Some(failure) => Outcome::Failed {
                stage: failure.stage,
                reason: failure.reason(),
            },
            None => Outcome::Success,
        };
        let elapsed = started.elapsed();
        log.note(&format!(
            "Sample {} {} in {:.2}s",
            sample.key,
            outcome,
            elapsed.as_secs_f64()
        ));

        SampleOutcome {
            sample: sample.clone(),
            outcome,
            elapsed,
            last_stage: run.last_stage,
            stages: run.stages,
            warnings: run.warnings,
        }
    }

    /// Outcome for a sample that failed before its first stage ran
    fn failed_before_start(sample: &Sample, error: StageError, started: Instant) -> SampleOutcome {
        SampleOutcome {
            sample: sample.clone(),
            outcome: Outcome::Failed {
                stage: StageKind::ALL[0],
                reason: error.to_string(),
            },
            elapsed: started.elapsed(),
            last_stage: None,
            stages: Vec::new(),
            warnings: Vec::new(),
        }
    }
}
