//! # Orchestrator
//!
//! Coordinates analysis batches for the IDE lint client.
//!
//! ```text
//!  AnalysisOrchestrator ──mpsc──▶ AnalysisWorker ──▶ ServerManager ──▶ analysis server
//!        (handle)                  (owns state)  ◀── answers as messages ──┘
//!                                        │
//!                                        └──▶ EventBus (started / completed / failed)
//! ```
//!
//! Only one batch is in flight at a time; a request arriving meanwhile is
//! dropped, not queued. Files outside the base directory are excluded from
//! a batch. When the batch completes, the issues of every batch file are
//! replaced and its analysis history recorded before subscribers hear of it.

pub mod batch;
mod dispatch;
pub mod errors;
pub mod project_options;
mod rule_refresh;
mod worker;


pub use batch::{Admission, AnalyzeFilesRequest};
pub use dispatch::{AnalysisOrchestrator, BatchOutcome, OrchestratorConfig};
pub use errors::{OrchestratorError, Result};
pub use project_options::{JsonProjectOptions, PROJECT_OPTIONS_FILE_NAME, ProjectOptions, ProjectOptionsSource};
