//! Batch execution engine
//!
//! This module contains:
//! - `orchestrator` - Runs the pipeline for every sample with failure isolation
//! - `pipeline` - The ordered stage sequence for one sample
//! - `workspace` - Per-sample output directories
//! - `run_log` - Run-level and per-sample log files
//! - `report` - Run statistics, error list and processing report
//! - `progress` - Progress events and remaining-time estimate
//! - `result` - Stage and sample outcome types
//! - `error` - Engine error types

pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod result;
pub mod run_log;
pub mod workspace;

pub use error::{RunError, StageError};
pub use orchestrator::{Orchestrator, SKIP_CANCELLED, SKIP_COMPLETE};
pub use pipeline::{PipelineRun, StageFailure, StagePipeline};
pub use progress::{ProgressEvent, ProgressReceiver, ProgressSender, ProgressTracker};
pub use report::{RunReporter, RunStatistics};
pub use result::{Outcome, SampleOutcome, StageRecord};
pub use run_log::{RunLog, SampleLog};
pub use workspace::{paths_overlap, resolve_path, Workspace};
