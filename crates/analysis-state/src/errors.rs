//! Error types for the analysis-state crate

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for analysis state operations
pub type Result<T> = std::result::Result<T, StateError>;

#[derive(Error, Debug)]
pub enum StateError {
    /// IO operations failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to create data directory
    #[error("Failed to create data directory: {path:?}")]
    DataDirectoryCreationFailed { path: PathBuf },

    /// Failed to determine system data directory
    #[error("Failed to determine system data directory")]
    SystemDataDirectoryNotFound,
}
