//! Stage and sample outcome types

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::workflow::{Molecule, Sample, StageKind};

/// Terminal result of processing one sample
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed { stage: StageKind, reason: String },
    Skipped { reason: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failed { .. } => "failed",
            Outcome::Skipped { .. } => "skipped",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failed { stage, reason } => write!(f, "failed at {}: {}", stage, reason),
            Outcome::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

/// One adapter invocation as recorded by the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: StageKind,
    pub molecule: Option<Molecule>,
    pub elapsed: Duration,
    pub success: bool,
}

/// Everything the reporter needs to know about one sample
#[derive(Debug, Clone, Serialize)]
pub struct SampleOutcome {
    pub sample: Sample,
    pub outcome: Outcome,
    pub elapsed: Duration,
    /// Last stage that was started, if any
    pub last_stage: Option<StageKind>,
    pub stages: Vec<StageRecord>,
    pub warnings: Vec<String>,
}

impl SampleOutcome {
    pub fn skipped(sample: &Sample, reason: impl Into<String>) -> Self {
        Self {
            sample: sample.clone(),
            outcome: Outcome::Skipped {
                reason: reason.into(),
            },
            elapsed: Duration::ZERO,
            last_stage: None,
            stages: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.sample.key
    }
}
