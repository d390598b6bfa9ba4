//! Age and size based eviction of session files.
//!
//! A pass plans deletions over a snapshot of the logs directory, then executes
//! them one file at a time. Files that disappear concurrently are skipped, and
//! at least one session always survives a pass.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use chrono::{Duration, Local, NaiveDateTime};
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;

use crate::configuration::types::RetentionSettings;
use crate::error_handling::types::{RetentionError, StorageError};
use crate::storage::file_storage::FileStorage;
use crate::storage::types::SessionMeta;

const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * MIB;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d+)\s*d$").unwrap_or_else(|e| panic!("invalid duration pattern: {e}"))
});

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d+(?:\.\d+)?)\s*(MB|GB|M|G)$")
        .unwrap_or_else(|e| panic!("invalid size pattern: {e}"))
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupPolicy {
    pub max_age_days: Option<u64>,
    /// Budget for the sum of session file sizes; zero disables the size phase.
    pub max_total_bytes: Option<u64>,
    pub protected_ids: HashSet<String>,
    pub dry_run: bool,
}

impl CleanupPolicy {
    /// Policy configured in the settings file.
    pub fn from_settings(settings: &RetentionSettings) -> Self {
        Self {
            max_age_days: Some(settings.retention_days),
            max_total_bytes: Some(settings.max_total_size_mb.saturating_mul(1024 * 1024)),
            ..Default::default()
        }
    }

    pub fn protect(mut self, id: impl Into<String>) -> Self {
        self.protected_ids.insert(id.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub deleted_files: Vec<String>,
    pub deleted_count: usize,
    pub freed_bytes: u64,
}

pub struct RetentionManager {
    storage: Arc<FileStorage>,
}

impl RetentionManager {
    pub fn new(storage: Arc<FileStorage>) -> Self {
        Self { storage }
    }

    /// Runs one retention pass. Only listing the directory can fail; per-file
    /// deletion errors are logged and the file is left in place.
    pub fn cleanup(&self, policy: &CleanupPolicy) -> Result<CleanupResult, StorageError> {
        let sessions = self.storage.list_sessions()?;
        let marked = plan(sessions, policy, Local::now().naive_local());

        let mut result = CleanupResult::default();
        for session in marked {
            if !policy.dry_run {
                match self.storage.delete_session_file(&session.filename) {
                    Ok(true) => {}
                    // Deleted by someone else between listing and unlink.
                    Ok(false) => continue,
                    Err(e) => {
                        warn!("Skipping {} during cleanup: {}", session.filename, e);
                        continue;
                    }
                }
            }
            result.freed_bytes += session.size;
            result.deleted_files.push(session.filename);
        }
        result.deleted_count = result.deleted_files.len();

        if result.deleted_count > 0 {
            info!(
                "{} {} session(s), {} byte(s)",
                if policy.dry_run { "Would delete" } else { "Deleted" },
                result.deleted_count,
                result.freed_bytes
            );
        }
        Ok(result)
    }

    /// Settings-driven pass run when a capture starts. Never fails the caller.
    pub fn auto_cleanup(&self, settings: &RetentionSettings, protected_id: &str) {
        if !settings.auto_cleanup {
            debug!("Auto cleanup disabled");
            return;
        }
        let policy = CleanupPolicy::from_settings(settings).protect(protected_id);
        if let Err(e) = self.cleanup(&policy) {
            warn!("Auto cleanup failed: {}", e);
        }
    }
}

/// Chooses the sessions to delete, oldest first.
pub fn plan(mut sessions: Vec<SessionMeta>, policy: &CleanupPolicy, now: NaiveDateTime) -> Vec<SessionMeta> {
    sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.filename.cmp(&b.filename)));
    let is_protected = |s: &SessionMeta| policy.protected_ids.contains(&s.id);
    let mut marked = vec![false; sessions.len()];

    if let Some(days) = policy.max_age_days {
        let cutoff = i64::try_from(days)
            .ok()
            .and_then(Duration::try_days)
            .and_then(|age| now.checked_sub_signed(age));
        if let Some(cutoff) = cutoff {
            for (i, s) in sessions.iter().enumerate() {
                if s.started_at < cutoff && !is_protected(s) {
                    marked[i] = true;
                }
            }
        }
    }

    if let Some(budget) = policy.max_total_bytes.filter(|b| *b > 0) {
        let mut total: u64 = sessions
            .iter()
            .zip(&marked)
            .filter(|(_, m)| !**m)
            .map(|(s, _)| s.size)
            .sum();
        for (i, s) in sessions.iter().enumerate() {
            if total <= budget {
                break;
            }
            if marked[i] || is_protected(s) {
                continue;
            }
            marked[i] = true;
            total -= s.size;
        }
    }

    if !sessions.is_empty() && marked.iter().all(|m| *m) {
        if let Some(last) = marked.last_mut() {
            *last = false;
        }
    }

    sessions
        .into_iter()
        .zip(marked)
        .filter_map(|(s, m)| m.then_some(s))
        .collect()
}

/// `"30d"` to a number of days.
pub fn parse_duration(input: &str) -> Result<u64, RetentionError> {
    DURATION_RE
        .captures(input.trim())
        .and_then(|caps| caps[1].parse().ok())
        .ok_or_else(|| RetentionError::InvalidDuration(input.to_string()))
}

/// `"500M"`, `"1G"`, `"1GB"` or `"2.5G"` to bytes, binary units.
pub fn parse_size(input: &str) -> Result<u64, RetentionError> {
    let invalid = || RetentionError::InvalidSize(input.to_string());
    let caps = SIZE_RE.captures(input.trim()).ok_or_else(invalid)?;
    let value: f64 = caps[1].parse().map_err(|_| invalid())?;
    let unit = if caps[2].to_ascii_uppercase().starts_with('G') { GIB } else { MIB };
    Ok((value * unit).round() as u64)
}
