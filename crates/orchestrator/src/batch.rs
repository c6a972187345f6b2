//! Analysis batches and their admission.

use analysis_state::{ReportedIssue, is_within, normalize_path, path_key};
use chrono::{DateTime, Utc};
use server_manager::{AnalyzeRequest, ConnectionOptions};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AnalyzeFilesRequest {
    pub files: Vec<PathBuf>,
    pub base_dir: PathBuf,
    pub connection: ConnectionOptions,
}

/// Answer to an analysis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The batch was dispatched; its outcome arrives on the event bus.
    Admitted { batch_id: Uuid, files: Vec<PathBuf> },
    /// Another batch is in flight. The request was dropped.
    Busy,
    /// None of the files lies under the base directory.
    NothingToAnalyze,
}

impl Admission {
    pub fn batch_id(&self) -> Option<Uuid> {
        match self {
            Admission::Admitted { batch_id, .. } => Some(*batch_id),
            _ => None,
        }
    }
}

/// The in-flight batch. At most one exists at a time.
#[derive(Debug, Clone)]
pub(crate) struct CurrentAnalysis {
    pub id: Uuid,
    pub files: Vec<PathBuf>,
    pub base_dir: PathBuf,
    pub connection: ConnectionOptions,
    /// Server generation the batch was dispatched to.
    pub generation: Option<u64>,
    pub admitted_at: DateTime<Utc>,
}

impl CurrentAnalysis {
    pub fn new(files: Vec<PathBuf>, base_dir: PathBuf, connection: ConnectionOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            files,
            base_dir,
            connection,
            generation: None,
            admitted_at: Utc::now(),
        }
    }

    pub fn server_request(&self) -> AnalyzeRequest {
        AnalyzeRequest {
            base_dir: self.base_dir.clone(),
            files: self.files.clone(),
            connection: self.connection.clone(),
        }
    }
}

/// Normalizes `files` and keeps those under `base_dir`, in request order and
/// without duplicates.
pub(crate) fn filter_to_base_dir(files: &[PathBuf], base_dir: &Path) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    for file in files {
        let normalized = normalize_path(file);
        if !is_within(&normalized, base_dir) {
            info!(
                file = %normalized.display(),
                base_dir = %base_dir.display(),
                "OutOfProjectFile: excluded from analysis"
            );
            continue;
        }
        if seen.insert(path_key(&normalized)) {
            selected.push(normalized);
        }
    }
    selected
}

#[derive(Debug)]
pub(crate) struct FileIssues {
    pub path: PathBuf,
    pub issues: Vec<ReportedIssue>,
}

impl FileIssues {
    pub fn empty(path: PathBuf) -> Self {
        Self {
            path,
            issues: Vec::new(),
        }
    }
}

/// Groups reported issues by the normalized file they belong to.
pub(crate) fn group_issues_by_file(issues: Vec<ReportedIssue>) -> HashMap<String, FileIssues> {
    let mut grouped: HashMap<String, FileIssues> = HashMap::new();
    for issue in issues {
        let path = normalize_path(&issue.file);
        grouped
            .entry(path_key(&path))
            .or_insert_with(|| FileIssues::empty(path))
            .issues
            .push(issue);
    }
    grouped
}

pub(crate) fn display_paths(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| p.to_string_lossy().to_string()).collect()
}
