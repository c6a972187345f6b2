//! # Analysis State
//!
//! Per-file state of the IDE lint client.
//!
//! This crate provides:
//! - The issue store, tracking live issues as files are edited
//! - The analysis history cache, classifying files as never analyzed,
//!   up to date or outdated
//! - Storage for rule metadata
//! - Path normalization and content fingerprints shared by all of the above
//! - The client's data directory and settings
//!
//! None of the stores synchronize internally; they are owned by a single
//! task (see the `orchestrator` crate).

pub mod data_directory;
pub mod errors;
pub mod fingerprint;
pub mod history;
pub mod issues;
pub mod paths;
pub mod rules;
pub mod settings;

pub use data_directory::DataDirectory;
pub use errors::{Result, StateError};
pub use history::{AnalysisHistoryCache, AnalysisStatus, FileAnalysisHistory};
pub use issues::{DELETED_LINE, IssueRange, IssueStore, LiveIssue, ReportedIssue};
pub use paths::{is_within, normalize_path, path_key};
pub use rules::{Rule, RuleCache};
pub use settings::{ClientSettings, ServerLaunchSettings, get_or_create_settings, read_settings};
