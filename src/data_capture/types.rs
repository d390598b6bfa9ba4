//! Common data types used across the data_capture subsystem.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Severity of a captured line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    /// Case-insensitive lookup of one of `error`, `warn`, `info`, `debug`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogLevel::from_name(s).ok_or_else(|| format!("unknown log level: {}", s))
    }
}

/// One parsed, redacted log line as persisted in a session file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub raw: bool,
    #[serde(default)]
    pub stack: Option<String>,
    /// Structured payload the line carried (JSON object or a recognized format).
    #[serde(rename = "_original", default)]
    pub original: Option<Map<String, Value>>,
}

/// An entry tagged with its 1-based physical line in the session file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedEntry {
    #[serde(flatten)]
    pub entry: LogEntry,
    #[serde(rename = "_line")]
    pub line: u64,
}

/// One capture run. Created once at capture start and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub id: String,
    pub started_at: DateTime<Local>,
    pub filename: String,
    pub git_branch: Option<String>,
}

/// Caller-supplied labels and switches for a capture run.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOptions {
    pub source: String,
    pub project: String,
    pub passthrough: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            source: "unknown".to_string(),
            project: String::new(),
            passthrough: true,
        }
    }
}
