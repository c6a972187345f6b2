//! Project options: base directory and connection settings of a project.
//!
//! The options live in `ide-lint.project.json` next to the project file:
//!
//! ```json
//! {
//!   "baseDir": "src",
//!   "hostUrl": "https://lint.example.com",
//!   "projectKey": "my-project",
//!   "token": "...",
//!   "downloadPlugin": true
//! }
//! ```

use crate::errors::{OrchestratorError, Result};
use analysis_state::{StateError, normalize_path};
use serde::Deserialize;
use server_manager::ConnectionOptions;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const PROJECT_OPTIONS_FILE_NAME: &str = "ide-lint.project.json";

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectOptions {
    pub base_dir: PathBuf,
    pub connection: ConnectionOptions,
}

pub trait ProjectOptionsSource: Send + Sync {
    fn load(&self, project_file: &Path) -> Result<ProjectOptions>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectOptionsFile {
    base_dir: Option<PathBuf>,
    #[serde(flatten)]
    connection: ConnectionOptions,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonProjectOptions;

impl ProjectOptionsSource for JsonProjectOptions {
    fn load(&self, project_file: &Path) -> Result<ProjectOptions> {
        let project_file = normalize_path(project_file);
        let project_dir = project_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| project_file.clone());
        let options_path = project_dir.join(PROJECT_OPTIONS_FILE_NAME);

        let file = if options_path.exists() {
            read_options_file(&options_path).map_err(|source| OrchestratorError::ProjectOptions {
                path: options_path.clone(),
                source,
            })?
        } else {
            debug!(
                "No project options at {}, using defaults",
                options_path.display()
            );
            ProjectOptionsFile::default()
        };

        let base_dir = match file.base_dir {
            Some(base_dir) => normalize_path(&project_dir.join(base_dir)),
            None => project_dir,
        };

        Ok(ProjectOptions {
            base_dir,
            connection: file.connection,
        })
    }
}

fn read_options_file(path: &Path) -> std::result::Result<ProjectOptionsFile, StateError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
