use crate::fingerprint::fingerprint_file;
use crate::paths::path_key;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Outcome of the most recent analysis of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAnalysisHistory {
    pub analysis_time: DateTime<Utc>,
    pub success: bool,
    pub issues_found: usize,
    /// Fingerprint of the file as analyzed, `None` if it could not be read.
    pub file_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisStatus {
    NeverAnalyzed,
    UpToDate,
    Outdated,
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisStatus::NeverAnalyzed => write!(f, "never analyzed"),
            AnalysisStatus::UpToDate => write!(f, "up to date"),
            AnalysisStatus::Outdated => write!(f, "outdated"),
        }
    }
}

#[derive(Debug, Default)]
pub struct AnalysisHistoryCache {
    entries: HashMap<String, FileAnalysisHistory>,
}

impl AnalysisHistoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the outcome of an analysis attempt together with the file's
    /// current fingerprint, overwriting any earlier record.
    pub fn record_analysis(&mut self, path: &Path, success: bool, issue_count: usize) {
        let file_hash = match fingerprint_file(path) {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!("Could not fingerprint {}: {}", path.display(), e);
                None
            }
        };

        debug!(
            "Recording analysis of {} (success: {}, issues: {})",
            path.display(),
            success,
            issue_count
        );
        self.entries.insert(
            path_key(path),
            FileAnalysisHistory {
                analysis_time: Utc::now(),
                success,
                issues_found: issue_count,
                file_hash,
            },
        );
    }

    pub fn get_analysis_status(&self, path: &Path) -> AnalysisStatus {
        let Some(history) = self.entries.get(&path_key(path)) else {
            return AnalysisStatus::NeverAnalyzed;
        };

        match (&history.file_hash, fingerprint_file(path)) {
            (Some(recorded), Ok(current)) if *recorded == current => AnalysisStatus::UpToDate,
            _ => AnalysisStatus::Outdated,
        }
    }

    pub fn try_get_analysis_history(&self, path: &Path) -> Option<&FileAnalysisHistory> {
        self.entries.get(&path_key(path))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
