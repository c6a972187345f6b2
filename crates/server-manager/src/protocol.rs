use analysis_state::ReportedIssue;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Connection settings forwarded to the analysis server with every call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionOptions {
    pub host_url: Option<String>,
    pub project_key: Option<String>,
    pub token: Option<String>,
    pub download_plugin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub base_dir: PathBuf,
    pub files: Vec<PathBuf>,
    #[serde(flatten)]
    pub connection: ConnectionOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default)]
    pub issues: Vec<ReportedIssue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RulesRequest {
    #[serde(flatten)]
    pub connection: ConnectionOptions,
}
