//! Engine error types

use crate::adapter::AdapterError;
use crate::workflow::{ConfigError, RegistryError, StageKind};

/// Errors that end one sample's pipeline at `stage`
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("{stage} requires {artifact}, which is missing or empty")]
    MissingInput { stage: StageKind, artifact: String },

    #[error("{stage} did not produce {artifact}")]
    MissingOutput { stage: StageKind, artifact: String },

    #[error("No adapter registered for {0}")]
    NoAdapter(StageKind),

    #[error("Could not prepare workspace {path}: {error}")]
    Workspace {
        path: String,
        error: std::io::Error,
    },

    #[error("Workspace {path} overlaps reserved directory {reserved}")]
    ReservedPath { path: String, reserved: String },
}

/// Errors that stop the whole run before any sample is processed
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Adapter setup failed: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Could not create run log in {path}: {error}")]
    RunLog {
        path: String,
        error: std::io::Error,
    },
}
