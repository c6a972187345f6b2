//! Error types for the orchestrator crate

use analysis_state::StateError;
use server_manager::ServerError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The analysis server could not be launched or reached
    #[error(transparent)]
    Server(#[from] ServerError),

    /// The analysis server reported a failed analysis
    #[error("Analysis failed: {0}")]
    Analysis(String),

    #[error("Analysis server did not start within {0:?}")]
    LaunchTimeout(Duration),

    #[error("Rule refresh timed out after {0:?}")]
    RefreshTimeout(Duration),

    #[error("Rule refresh failed: {0}")]
    RuleRefresh(String),

    #[error("Invalid project options at {path:?}: {source}")]
    ProjectOptions {
        path: PathBuf,
        #[source]
        source: StateError,
    },

    /// The worker task has stopped
    #[error("Analysis worker is not running")]
    WorkerUnavailable,
}
