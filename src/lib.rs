//! # pairprep
//!
//! Batch preparation of molecule-pair simulation inputs. Each row of a
//! sample table names two compounds; for every row the pipeline fetches
//! both structures, converts and optimizes them, normalizes their residue
//! names, generates force-field topologies, cuts out the parameter block
//! and deploys a simulation template, all inside the sample's own
//! workspace directory.
//!
//! ## Features
//!
//! - **Failure isolation** - One bad sample never stops the batch
//! - **Declarative tool commands** - External tools are configured as `${{ }}` argument templates
//! - **Fallback chains** - Ordered request/command variants (3-D then 2-D structures by default)
//! - **Bounded external calls** - Every process and request runs under a timeout
//! - **Run reporting** - Run log, per-sample logs, error list and summary statistics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pairprep::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::default();
//!     let samples = SampleRegistry::load_file("Mol.csv".as_ref())?;
//!     let run_log = RunLog::create(&config.log_dir)?;
//!
//!     let pipeline = StagePipeline::from_config(&config)?;
//!     let orchestrator = Orchestrator::new(pipeline, &config.workdir);
//!     let outcomes = orchestrator.run(&samples, &run_log).await;
//!
//!     let stats = RunReporter::summarize(&outcomes);
//!     println!("{}", RunReporter::render_summary(&stats));
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod engine;
pub mod workflow;

// Re-export main types
pub use adapter::{
    Adapter, AdapterError, AdapterOutput, FallbackChain, Failure, FailureCause, FormatConverter,
    GeometryOptimizer, Invocation, ParameterExtractor, ResidueNormalizer, StructureFetcher,
    TemplateDeployer, TopologyGenerator,
};
pub use engine::{
    Orchestrator, Outcome, PipelineRun, ProgressEvent, RunError, RunLog, RunReporter,
    RunStatistics, SampleLog, SampleOutcome, StageError, StagePipeline, Workspace,
};
pub use workflow::{
    Artifacts, CommandTemplate, ConfigError, DeployPolicy, FetchConfig, FetchVariant, Molecule,
    PipelineConfig, RegistryError, Sample, SampleRegistry, Stage, StageKind, ToolConfig,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::adapter::{Adapter, AdapterError, AdapterOutput, Invocation};
    pub use crate::engine::{
        Orchestrator, Outcome, RunLog, RunReporter, RunStatistics, SampleLog, SampleOutcome,
        StagePipeline, Workspace,
    };
    pub use crate::workflow::{
        DeployPolicy, Molecule, PipelineConfig, Sample, SampleRegistry, StageKind,
    };
}
