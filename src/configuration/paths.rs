use std::env;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error_handling::types::ConfigError;

const APP_DIR: &str = "logifai";

/// Where sessions and settings live on disk.
///
/// Resolved once at start-up and handed to the components that need it.
#[derive(Debug, Clone, PartialEq)]
pub struct AppPaths {
    pub logs_dir: PathBuf,
    pub settings_file: PathBuf,
}

impl AppPaths {
    /// `$XDG_STATE_HOME/logifai/logs` and `$XDG_CONFIG_HOME/logifai/settings.toml`,
    /// falling back to `~/.local/state` and `~/.config`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let state_root = match xdg_dir("XDG_STATE_HOME") {
            Some(dir) => dir,
            None => dirs::home_dir().ok_or(ConfigError::NoHomeDir)?.join(".local").join("state"),
        };
        let config_root = match xdg_dir("XDG_CONFIG_HOME") {
            Some(dir) => dir,
            None => dirs::home_dir().ok_or(ConfigError::NoHomeDir)?.join(".config"),
        };
        let paths = Self::with_roots(state_root, config_root);
        debug!("Logs dir: {}, settings: {}", paths.logs_dir.display(), paths.settings_file.display());
        Ok(paths)
    }

    /// Paths under explicit state and config roots.
    pub fn with_roots<S: AsRef<Path>, C: AsRef<Path>>(state_root: S, config_root: C) -> Self {
        Self {
            logs_dir: state_root.as_ref().join(APP_DIR).join("logs"),
            settings_file: config_root.as_ref().join(APP_DIR).join("settings.toml"),
        }
    }
}

// Relative XDG values are ignored.
fn xdg_dir(var: &str) -> Option<PathBuf> {
    env::var_os(var)
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
}
