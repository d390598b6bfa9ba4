use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_TOTAL_SIZE_MB: u64 = 1024;
pub const DEFAULT_RETENTION_DAYS: u64 = 30;
pub const DEFAULT_WEB_PORT: u16 = 3100;

/// `[retention]` table of the settings file.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RetentionSettings {
    pub max_total_size_mb: u64,
    pub retention_days: u64,
    pub auto_cleanup: bool,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            max_total_size_mb: DEFAULT_MAX_TOTAL_SIZE_MB,
            retention_days: DEFAULT_RETENTION_DAYS,
            auto_cleanup: true,
        }
    }
}

/// `[web]` table of the settings file.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct WebSettings {
    pub port: u16,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self { port: DEFAULT_WEB_PORT }
    }
}
