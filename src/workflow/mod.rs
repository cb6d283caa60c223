//! Pipeline definitions
//!
//! This module contains the types that describe a batch before it runs:
//! - `sample` - Sample, Molecule and the CSV sample registry
//! - `stage` - StageKind, Stage and per-molecule artifact names
//! - `config` - PipelineConfig loaded from YAML
//! - `context` - TemplateVars for one adapter invocation
//! - `expressions` - Expression evaluation for `${{ }}` argument templates

pub mod config;
pub mod context;
pub mod expressions;
pub mod sample;
pub mod stage;

pub use config::{
    CommandTemplate, ConfigError, DeployPolicy, FetchConfig, FetchVariant, OptimizerSettings,
    ParameterSectionConfig, ParameterizationSettings, PipelineConfig, ToolConfig,
};
pub use context::TemplateVars;
pub use expressions::{evaluate as evaluate_expression, evaluate_args, ExpressionError};
pub use sample::{Molecule, RegistryError, Sample, SampleRegistry};
pub use stage::{Artifacts, Stage, StageKind, DEPLOY_MARKER, SAMPLE_LOG};
