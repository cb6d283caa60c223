//! Run progress reporting
//!
//! The orchestrator publishes `ProgressEvent`s on an unbounded channel; the
//! caller decides how to render them. Nothing is sent when no channel is
//! attached, and a dropped receiver is ignored.

use std::time::Duration;
use tokio::sync::mpsc;

use super::result::{Outcome, SampleOutcome};

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Started {
        total: usize,
    },
    SampleStarted {
        index: usize,
        total: usize,
        key: String,
    },
    SampleFinished {
        index: usize,
        total: usize,
        key: String,
        outcome: Outcome,
        /// Estimated time for the remaining samples
        remaining: Option<Duration>,
    },
    Finished {
        processed: usize,
        cancelled: bool,
    },
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

pub fn channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Tracks completed samples to estimate the remaining time
///
/// Skipped samples count as done but do not affect the per-sample mean.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: usize,
    done: usize,
    processed: usize,
    processed_elapsed: Duration,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            done: 0,
            processed: 0,
            processed_elapsed: Duration::ZERO,
        }
    }

    pub fn record(&mut self, outcome: &SampleOutcome) {
        self.done += 1;
        if !outcome.outcome.is_skipped() {
            self.processed += 1;
            self.processed_elapsed += outcome.elapsed;
        }
    }

    pub fn done(&self) -> usize {
        self.done
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn remaining(&self) -> Option<Duration> {
        if self.processed == 0 {
            return None;
        }
        let left = self.total.saturating_sub(self.done) as u32;
        Some(self.processed_elapsed / self.processed as u32 * left)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Sample, StageKind};

    fn outcome(outcome: Outcome, secs: u64) -> SampleOutcome {
        SampleOutcome {
            sample: Sample::new("1", 1, 2),
            outcome,
            elapsed: Duration::from_secs(secs),
            last_stage: None,
            stages: vec![],
            warnings: vec![],
        }
    }

    #[test]
    fn test_no_estimate_before_first_processed_sample() {
        let mut tracker = ProgressTracker::new(3);
        assert_eq!(tracker.remaining(), None);
        tracker.record(&outcome(
            Outcome::Skipped {
                reason: "already complete".to_string(),
            },
            0,
        ));
        assert_eq!(tracker.remaining(), None);
        assert_eq!(tracker.done(), 1);
    }

    #[test]
    fn test_estimate_uses_processed_mean() {
        let mut tracker = ProgressTracker::new(4);
        tracker.record(&outcome(Outcome::Success, 10));
        tracker.record(&outcome(
            Outcome::Failed {
                stage: StageKind::Fetch,
                reason: "HTTP 404".to_string(),
            },
            20,
        ));
        assert_eq!(tracker.processed(), 2);
        assert_eq!(tracker.remaining(), Some(Duration::from_secs(30)));
    }
}
