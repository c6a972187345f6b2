pub mod analyze;
pub mod rules;

use crate::cli::ConnectionArgs;
use anyhow::Result;
use orchestrator::{JsonProjectOptions, ProjectOptions, ProjectOptionsSource};
use server_manager::ConnectionOptions;
use std::path::Path;

/// Project options of `project`, or defaults rooted at `fallback_base_dir`,
/// with connection flags from the command line taking precedence.
pub fn resolve_project(
    project: Option<&Path>,
    fallback_base_dir: &Path,
    args: &ConnectionArgs,
) -> Result<ProjectOptions> {
    let mut options = match project {
        Some(project) => JsonProjectOptions.load(project)?,
        None => ProjectOptions {
            base_dir: fallback_base_dir.to_path_buf(),
            connection: ConnectionOptions::default(),
        },
    };
    if let Some(host_url) = &args.host_url {
        options.connection.host_url = Some(host_url.clone());
    }
    if let Some(project_key) = &args.project_key {
        options.connection.project_key = Some(project_key.clone());
    }
    Ok(options)
}

pub fn connection_for(project: Option<&Path>, args: &ConnectionArgs) -> Result<ConnectionOptions> {
    let current_dir = std::env::current_dir()?;
    Ok(resolve_project(project, &current_dir, args)?.connection)
}
