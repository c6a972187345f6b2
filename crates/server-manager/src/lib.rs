//! # Server Manager
//!
//! Owns the background analysis server for the IDE lint client.
//!
//! - [`server`]: the contract every analysis server implements
//! - [`manager`]: the lifecycle manager that launches, restarts and tears
//!   down the single server handle under one lock
//! - [`process`]: a child-process server spoken to with JSON-RPC over stdio

pub mod errors;
pub mod manager;
pub mod process;
pub mod protocol;
pub mod server;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use errors::{Result, ServerError};
pub use manager::{ServerExit, ServerLease, ServerManager, TerminationOutcome};
pub use process::ProcessServerFactory;
pub use protocol::{AnalysisReport, AnalyzeRequest, ConnectionOptions, RulesRequest};
pub use server::{AnalysisServer, PendingResponse, ServerFactory, TerminationNotifier};
