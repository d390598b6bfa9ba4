use std::fs;
use std::io;
use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use toml::{Table, Value};

use super::types::*;
use crate::error_handling::types::ConfigError;

/// User settings stored as TOML.
///
/// ```toml
/// [retention]
/// max_total_size_mb = 1024
/// retention_days = 30
/// auto_cleanup = true
///
/// [web]
/// port = 3100
/// ```
///
/// Every field is optional. Missing, mistyped or non-positive values fall back
/// to their defaults one by one, so a half-valid file still keeps its valid
/// parts.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub retention: RetentionSettings,
    pub web: WebSettings,
}

impl Settings {
    /// Reads the settings file. A missing, unreadable or malformed file yields
    /// the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No settings file at {}, using defaults", path.display());
                return Self::default();
            }
            Err(e) => {
                warn!("Cannot read settings {}: {}", path.display(), e);
                return Self::default();
            }
        };
        Self::parse(&content).unwrap_or_else(|e| {
            warn!("Ignoring settings {}: {}", path.display(), e);
            Self::default()
        })
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let table: Table = content.parse().map_err(|e: toml::de::Error| ConfigError::TomlError(e.to_string()))?;
        Ok(Self::from_table(&table))
    }

    /// Same per-field fallback as [`Settings::parse`], for a JSON object such
    /// as the body of `PUT /api/settings`.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigError> {
        let table: Table = serde_json::from_value(value).map_err(|e| ConfigError::JsonError(e.to_string()))?;
        Ok(Self::from_table(&table))
    }

    fn from_table(table: &Table) -> Self {
        let retention = table.get("retention").and_then(Value::as_table);
        let web = table.get("web").and_then(Value::as_table);
        let defaults = Self::default();

        Self {
            retention: RetentionSettings {
                max_total_size_mb: positive(retention, "max_total_size_mb")
                    .unwrap_or(defaults.retention.max_total_size_mb),
                retention_days: positive(retention, "retention_days")
                    .unwrap_or(defaults.retention.retention_days),
                auto_cleanup: retention
                    .and_then(|t| t.get("auto_cleanup"))
                    .and_then(Value::as_bool)
                    .unwrap_or(defaults.retention.auto_cleanup),
            },
            web: WebSettings {
                port: positive(web, "port")
                    .and_then(|p| u16::try_from(p).ok())
                    .unwrap_or(defaults.web.port),
            },
        }
    }

    /// Writes the settings owner-only, creating the directory if needed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            create_private_dir(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        write_private_file(path, content.as_bytes())?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }
}

fn positive(table: Option<&Table>, key: &str) -> Option<u64> {
    table
        .and_then(|t| t.get(key))
        .and_then(Value::as_integer)
        .filter(|n| *n > 0)
        .and_then(|n| u64::try_from(n).ok())
}

fn create_private_dir(dir: &Path) -> Result<(), ConfigError> {
    let io_err = |source: io::Error| ConfigError::IoError { path: dir.to_path_buf(), source };
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new().recursive(true).mode(0o700).create(dir).map_err(io_err)
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(dir).map_err(io_err)
    }
}

fn write_private_file(path: &Path, content: &[u8]) -> Result<(), ConfigError> {
    use std::io::Write;
    let io_err = |source: io::Error| ConfigError::IoError { path: path.to_path_buf(), source };
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(io_err)?;
    file.write_all(content).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load(dir.path().join("settings.toml"));
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.retention.max_total_size_mb, 1024);
        assert_eq!(settings.retention.retention_days, 30);
        assert!(settings.retention.auto_cleanup);
        assert_eq!(settings.web.port, 3100);
    }

    #[test]
    fn partial_and_invalid_values_fall_back_individually() {
        let settings = Settings::parse(
            r#"
            [retention]
            max_total_size_mb = 0
            retention_days = 7
            auto_cleanup = "yes"

            [web]
            port = 70000
            "#,
        )
        .unwrap();
        assert_eq!(settings.retention.max_total_size_mb, DEFAULT_MAX_TOTAL_SIZE_MB);
        assert_eq!(settings.retention.retention_days, 7);
        assert!(settings.retention.auto_cleanup);
        assert_eq!(settings.web.port, DEFAULT_WEB_PORT);
    }

    #[test]
    fn malformed_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[retention\nretention_days = ").unwrap();
        assert!(matches!(Settings::parse("[retention"), Err(ConfigError::TomlError(_))));
        assert_eq!(Settings::load(&path), Settings::default());
    }

    #[test]
    fn json_body_uses_the_same_fallbacks() {
        let settings = Settings::from_json(serde_json::json!({
            "retention": { "retention_days": 7, "max_total_size_mb": -5, "auto_cleanup": false },
            "web": { "port": 4000 }
        }))
        .unwrap();
        assert_eq!(settings.retention.retention_days, 7);
        assert_eq!(settings.retention.max_total_size_mb, DEFAULT_MAX_TOTAL_SIZE_MB);
        assert!(!settings.retention.auto_cleanup);
        assert_eq!(settings.web.port, 4000);

        assert_eq!(Settings::from_json(serde_json::json!({})).unwrap(), Settings::default());
        assert!(matches!(Settings::from_json(serde_json::json!([1, 2])), Err(ConfigError::JsonError(_))));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logifai").join("settings.toml");
        let settings = Settings {
            retention: RetentionSettings { max_total_size_mb: 200, retention_days: 3, auto_cleanup: false },
            web: WebSettings { port: 4000 },
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path), settings);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
            let dir_mode = fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
            assert_eq!(dir_mode, 0o700);
        }
    }
}
