//! Error types for the server-manager crate

use thiserror::Error;

/// Result type alias for analysis server operations
pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    /// The server process could not be spawned
    #[error("Failed to launch analysis server '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The server exited (or is shutting down) before answering
    #[error("analysis server terminated")]
    Terminated,

    /// The server answered with a JSON-RPC error object
    #[error("Analysis server error {code}: {message}")]
    Remote { code: i64, message: String },

    /// A request or response did not have the expected shape
    #[error("Invalid payload for '{method}': {source}")]
    Protocol {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Transport error: {0}")]
    Transport(String),
}
