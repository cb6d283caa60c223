//! External tool adapters
//!
//! Each adapter wraps exactly one external capability behind the same
//! contract: it is handed the sample workspace and the invocation
//! parameters, and returns either the artifacts it wrote or an error
//! carrying bounded diagnostic text.
//!
//! - `fetch`: structure download over HTTP with a 3-D → 2-D fallback
//! - `convert`: structure format conversion (external process)
//! - `optimize`: in-place geometry optimization (external process)
//! - `normalize`: residue label rewrite (text transform)
//! - `topology`: force-field topology generation (external process)
//! - `extract`: parameter section extraction (text transform)
//! - `deploy`: template tree deployment (filesystem copy)

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::run_log::SampleLog;
use crate::engine::workspace::Workspace;
use crate::workflow::{Molecule, Sample, StageKind};

pub mod convert;
pub mod deploy;
pub mod extract;
pub mod fallback;
pub mod fetch;
pub mod normalize;
pub mod optimize;
pub mod process;
pub mod topology;

pub use convert::FormatConverter;
pub use deploy::TemplateDeployer;
pub use extract::{reinsert_section, split_section, ParameterExtractor, SectionSplit};
pub use fallback::{FallbackChain, Variant};
pub use fetch::StructureFetcher;
pub use normalize::{rename_residues, rename_tree, RenameSummary, ResidueNormalizer};
pub use optimize::GeometryOptimizer;
pub use process::{check_output, kill_running_groups, run_command, ProcessReport};
pub use topology::TopologyGenerator;

/// Why an adapter invocation failed
#[derive(Debug, Clone, PartialEq)]
pub enum FailureCause {
    /// The external call did not finish within its time budget
    Timeout(Duration),
    /// The external process could not be launched
    Spawn,
    /// The external process exited unsuccessfully (`None` when killed by a signal)
    ExitStatus(Option<i32>),
    /// The remote service answered with a non-success status
    HttpStatus(u16),
    /// The request never produced a response
    Transport,
    /// A declared output is absent
    MissingOutput(String),
    /// A declared output exists but is empty
    EmptyOutput(String),
    /// A required input is absent or empty
    MissingInput(String),
    /// The invocation parameters are unusable; not worth a fallback
    InvalidInput,
    /// The expected section header never appeared
    MissingSection(String),
    /// The residue label field is absent
    MissingLabel,
    /// A filesystem operation failed
    Io,
    /// The adapter panicked
    Panicked,
}

impl FailureCause {
    /// Whether trying the next fallback variant can help
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureCause::InvalidInput | FailureCause::MissingInput(_))
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Timeout(d) => write!(f, "timed out after {:?}", d),
            FailureCause::Spawn => write!(f, "could not start process"),
            FailureCause::ExitStatus(Some(code)) => write!(f, "exited with code {}", code),
            FailureCause::ExitStatus(None) => write!(f, "terminated by signal"),
            FailureCause::HttpStatus(status) => write!(f, "HTTP {}", status),
            FailureCause::Transport => write!(f, "request failed"),
            FailureCause::MissingOutput(name) => write!(f, "output {} was not produced", name),
            FailureCause::EmptyOutput(name) => write!(f, "output {} is empty", name),
            FailureCause::MissingInput(name) => write!(f, "input {} is missing or empty", name),
            FailureCause::InvalidInput => write!(f, "invalid input"),
            FailureCause::MissingSection(name) => write!(f, "section [ {} ] not found", name),
            FailureCause::MissingLabel => write!(f, "residue label field not found"),
            FailureCause::Io => write!(f, "filesystem error"),
            FailureCause::Panicked => write!(f, "adapter panicked"),
        }
    }
}

/// A failure cause plus the captured output that explains it
#[derive(Debug, Clone)]
pub struct Failure {
    pub cause: FailureCause,
    pub diagnostic: String,
}

impl Failure {
    pub fn new(cause: FailureCause, diagnostic: impl Into<String>) -> Self {
        Self {
            cause,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn io(context: &str, error: &std::io::Error) -> Self {
        Self::new(FailureCause::Io, format!("{}: {}", context, error))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.diagnostic.is_empty() {
            write!(f, "{}", self.cause)
        } else {
            write!(f, "{}: {}", self.cause, self.diagnostic)
        }
    }
}

/// Errors raised by adapters, one variant per capability
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("Fetch error: {0}")]
    Fetch(Failure),

    #[error("Conversion error: {0}")]
    Conversion(Failure),

    #[error("Optimization error: {0}")]
    Optimization(Failure),

    #[error("Normalization error: {0}")]
    Normalization(Failure),

    #[error("Topology error: {0}")]
    Topology(Failure),

    #[error("Extraction error: {0}")]
    Extraction(Failure),

    #[error("Deployment error: {0}")]
    Deployment(Failure),
}

impl AdapterError {
    /// Wrap a failure in the error variant belonging to `stage`
    pub fn for_stage(stage: StageKind, failure: Failure) -> Self {
        match stage {
            StageKind::Fetch => AdapterError::Fetch(failure),
            StageKind::Convert => AdapterError::Conversion(failure),
            StageKind::Optimize => AdapterError::Optimization(failure),
            StageKind::Normalize => AdapterError::Normalization(failure),
            StageKind::GenerateTopology => AdapterError::Topology(failure),
            StageKind::ExtractParameters => AdapterError::Extraction(failure),
            StageKind::Deploy => AdapterError::Deployment(failure),
        }
    }

    pub fn stage(&self) -> StageKind {
        match self {
            AdapterError::Fetch(_) => StageKind::Fetch,
            AdapterError::Conversion(_) => StageKind::Convert,
            AdapterError::Optimization(_) => StageKind::Optimize,
            AdapterError::Normalization(_) => StageKind::Normalize,
            AdapterError::Topology(_) => StageKind::GenerateTopology,
            AdapterError::Extraction(_) => StageKind::ExtractParameters,
            AdapterError::Deployment(_) => StageKind::Deploy,
        }
    }

    pub fn failure(&self) -> &Failure {
        match self {
            AdapterError::Fetch(f)
            | AdapterError::Conversion(f)
            | AdapterError::Optimization(f)
            | AdapterError::Normalization(f)
            | AdapterError::Topology(f)
            | AdapterError::Extraction(f)
            | AdapterError::Deployment(f) => f,
        }
    }

    pub fn cause(&self) -> &FailureCause {
        &self.failure().cause
    }
}

/// Parameters for one adapter call
pub struct Invocation<'a> {
    pub sample: &'a Sample,
    /// `None` for sample-wide stages
    pub molecule: Option<Molecule>,
    pub log: &'a SampleLog,
}

impl<'a> Invocation<'a> {
    pub fn new(sample: &'a Sample, molecule: Option<Molecule>, log: &'a SampleLog) -> Self {
        Self {
            sample,
            molecule,
            log,
        }
    }

    /// The molecule this call targets, or an invalid-input error for `stage`
    pub fn require_molecule(&self, stage: StageKind) -> Result<Molecule, AdapterError> {
        self.molecule.ok_or_else(|| {
            AdapterError::for_stage(
                stage,
                Failure::new(
                    FailureCause::InvalidInput,
                    format!("{} must be invoked for a molecule", stage),
                ),
            )
        })
    }
}

/// Artifacts written by a successful invocation
#[derive(Debug, Clone, Default)]
pub struct AdapterOutput {
    pub paths: Vec<PathBuf>,
    pub diagnostic: String,
}

impl AdapterOutput {
    pub fn new(paths: Vec<PathBuf>, diagnostic: impl Into<String>) -> Self {
        Self {
            paths,
            diagnostic: diagnostic.into(),
        }
    }
}

/// One external capability with a normalized success/error contract
#[async_trait]
pub trait Adapter: Send + Sync {
    /// The stage this adapter serves
    fn stage(&self) -> StageKind;

    /// Directories this adapter reads from that no workspace may overlap
    fn reserved_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    async fn invoke(
        &self,
        workspace: &Workspace,
        invocation: &Invocation<'_>,
    ) -> Result<AdapterOutput, AdapterError>;
}

/// Keep at most `limit` bytes of `text`, preferring the tail where
/// tools usually print their errors
pub fn bounded(text: &str, limit: usize) -> String {
    let text = text.trim();
    if text.len() <= limit {
        return text.to_string();
    }

    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[... {} bytes truncated]\n{}", start, &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_short_text_untouched() {
        assert_eq!(bounded("  short\n", 100), "short");
    }

    #[test]
    fn test_bounded_keeps_tail() {
        let text = format!("{}ERROR: bad input", "x".repeat(1000));
        let result = bounded(&text, 16);
        assert!(result.starts_with("[... 1000 bytes truncated]"));
        assert!(result.ends_with("ERROR: bad input"));
    }

    #[test]
    fn test_bounded_respects_char_boundaries() {
        let text = "ééééé";
        let result = bounded(text, 3);
        assert!(result.ends_with("é"));
    }

    #[test]
    fn test_error_stage_mapping() {
        for stage in StageKind::ALL {
            let err = AdapterError::for_stage(stage, Failure::new(FailureCause::Io, "x"));
            assert_eq!(err.stage(), stage);
        }
    }

    #[test]
    fn test_error_display() {
        let err = AdapterError::Fetch(Failure::new(FailureCause::HttpStatus(404), "not found"));
        assert_eq!(err.to_string(), "Fetch error: HTTP 404: not found");

        let err = AdapterError::Extraction(Failure::new(
            FailureCause::MissingSection("atomtypes".to_string()),
            "",
        ));
        assert_eq!(err.to_string(), "Extraction error: section [ atomtypes ] not found");
    }

    #[test]
    fn test_retryable_causes() {
        assert!(FailureCause::HttpStatus(500).is_retryable());
        assert!(FailureCause::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!FailureCause::InvalidInput.is_retryable());
    }
}
