use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error on {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parsing error: {0}")]
    TomlError(String),
    #[error("Invalid settings JSON: {0}")]
    JsonError(String),
    #[error("Unable to locate the home directory")]
    NoHomeDir,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Storage write failed on {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Storage read failed on {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Entry serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Session writer already closed")]
    Closed,
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Stdio capture error: {0}")]
    StdioError(#[from] std::io::Error),
    #[error("Capture storage error: {0}")]
    StorageError(#[from] StorageError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("Empty reference")]
    Empty,
    #[error("Invalid reference segment: \"{0}\" (missing ':')")]
    MissingSeparator(String),
    #[error("Invalid reference segment: \"{0}\"")]
    InvalidSegment(String),
    #[error("Invalid session ID: \"{0}\"")]
    InvalidSessionId(String),
    #[error("Invalid line number: \"{0}\"")]
    InvalidLine(String),
    #[error("Invalid range: \"{0}\"")]
    InvalidRange(String),
    #[error("Range too large: \"{0}\" (max {1} lines)")]
    RangeTooLarge(String, u64),
    #[error("Empty line spec in segment: \"{0}\"")]
    EmptyLineSpec(String),
    #[error("Session not found: \"{0}\"")]
    SessionNotFound(String),
    #[error("Failed to read session \"{0}\": {1}")]
    ReadFailed(String, String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetentionError {
    #[error("Invalid duration: \"{0}\" (expected format: \"30d\")")]
    InvalidDuration(String),
    #[error("Invalid size: \"{0}\" (expected format: \"500M\" or \"1G\")")]
    InvalidSize(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FanoutError {
    #[error("No live session with id {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Session {0} is currently live")]
    Conflict(String),
    #[error("Storage error: {0}")]
    StorageError(StorageError),
    #[error("Capture error: {0}")]
    CaptureError(#[from] CaptureError),
    #[error("Settings error: {0}")]
    ConfigError(#[from] ConfigError),
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => SessionError::NotFound(id),
            other => SessionError::StorageError(other),
        }
    }
}

impl From<FanoutError> for SessionError {
    fn from(err: FanoutError) -> Self {
        match err {
            FanoutError::NotFound(id) => SessionError::NotFound(id),
        }
    }
}

#[derive(Debug, Error)]
pub enum WebError {
    #[error("Cannot listen on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
}
