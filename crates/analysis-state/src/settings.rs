use crate::data_directory::DataDirectory;
use crate::errors::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const DEFAULT_SERVER_COMMAND: &str = "ide-lint-server";

/// How the background analysis server is launched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerLaunchSettings {
    pub command: String,
    pub args: Vec<String>,
    /// Delay between asking the server to exit and killing it.
    pub kill_grace_ms: u64,
}

impl Default for ServerLaunchSettings {
    fn default() -> Self {
        Self {
            command: DEFAULT_SERVER_COMMAND.to_string(),
            args: Vec::new(),
            kill_grace_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientSettings {
    pub server: ServerLaunchSettings,
    pub restart_timeout_ms: u64,
    pub rule_refresh_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    /// Upper bound on starting the server before a batch or rule refresh gives up.
    pub launch_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server: ServerLaunchSettings::default(),
            restart_timeout_ms: 3_000,
            rule_refresh_timeout_ms: 3_000,
            shutdown_timeout_ms: 3_000,
            launch_timeout_ms: 10_000,
        }
    }
}

impl ClientSettings {
    pub fn restart_timeout(&self) -> Duration {
        Duration::from_millis(self.restart_timeout_ms)
    }

    pub fn rule_refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.rule_refresh_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.server.kill_grace_ms)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Reads settings from `path`, falling back to defaults when the file is
/// missing or malformed.
pub fn read_settings(path: &Path) -> ClientSettings {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(
                "Could not read settings at {}: {}. Using default settings.",
                path.display(),
                e
            );
            return ClientSettings::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(settings) => settings,
        Err(e) => {
            warn!(
                "Could not parse settings at {}: {}. Using default settings.",
                path.display(),
                e
            );
            ClientSettings::default()
        }
    }
}

pub fn get_or_create_settings(data_directory: &DataDirectory) -> ClientSettings {
    let settings_path = &data_directory.settings_path;
    if settings_path.exists() {
        return read_settings(settings_path);
    }

    let settings = ClientSettings::default();
    match settings.save(settings_path) {
        Ok(()) => info!("Created settings file at {}.", settings_path.display()),
        Err(e) => warn!(
            "Could not save settings at {}: {}. Using default settings.",
            settings_path.display(),
            e
        ),
    }
    settings
}
