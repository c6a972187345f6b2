//! Data directory of the lint client.
//!
//! Everything the client keeps on disk lives under a single root:
//!
//! ```text
//! .ide-lint/
//! ├── logs/
//! │   ├── ide-lint.log
//! │   ├── ide-lint.log.1.gz
//! ├── ide-lint.settings.json
//! ```

use crate::errors::{Result, StateError};
use std::path::{Path, PathBuf};

const DATA_DIR_NAME: &str = ".ide-lint";
const LOGS_DIR_NAME: &str = "logs";
const LOG_FILE_NAME: &str = "ide-lint.log";
const SETTINGS_FILE_NAME: &str = "ide-lint.settings.json";

#[derive(Debug, Clone)]
pub struct DataDirectory {
    pub root_path: PathBuf,
    pub logs_dir: PathBuf,
    pub settings_path: PathBuf,
}

impl DataDirectory {
    pub fn new_system_default() -> Result<Self> {
        let root_path = Self::get_system_data_directory()?;
        Self::new(root_path)
    }

    pub fn new(root_path: PathBuf) -> Result<Self> {
        let data_dir = Self {
            logs_dir: root_path.join(LOGS_DIR_NAME),
            settings_path: root_path.join(SETTINGS_FILE_NAME),
            root_path,
        };
        data_dir.ensure_directory_structure()?;
        Ok(data_dir)
    }

    pub fn get_system_data_directory() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(DATA_DIR_NAME))
            .ok_or(StateError::SystemDataDirectoryNotFound)
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.logs_dir.join(LOG_FILE_NAME)
    }

    pub fn ensure_directory_structure(&self) -> Result<()> {
        for dir in [&self.root_path, &self.logs_dir] {
            ensure_dir(dir)?;
        }
        Ok(())
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(|_| StateError::DataDirectoryCreationFailed {
        path: dir.to_path_buf(),
    })?;
    log::debug!("Created directory: {}", dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_creates_structure() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("data");

        let data_dir = DataDirectory::new(root.clone()).unwrap();

        assert!(root.is_dir());
        assert!(data_dir.logs_dir.is_dir());
        assert_eq!(data_dir.settings_path, root.join("ide-lint.settings.json"));
        assert_eq!(data_dir.log_file_path(), root.join("logs").join("ide-lint.log"));
    }

    #[test]
    fn test_new_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();

        DataDirectory::new(root.clone()).unwrap();
        let again = DataDirectory::new(root);
        assert!(again.is_ok());
    }

    #[test]
    fn test_creation_fails_below_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let result = DataDirectory::new(blocker.join("nested"));
        assert!(matches!(
            result,
            Err(StateError::DataDirectoryCreationFailed { .. })
        ));
    }
}
