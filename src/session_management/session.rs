use std::process::Command;
use std::sync::LazyLock;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use log::debug;
use regex::Regex;
use uuid::Uuid;

use crate::data_capture::types::SessionInfo;

pub const SESSION_ID_LEN: usize = 8;

static SESSION_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^session-(\d{4})(\d{2})(\d{2})-(\d{2})(\d{2})(\d{2})-([a-f0-9]+)\.ndjson$")
        .unwrap_or_else(|e| panic!("invalid session filename pattern: {e}"))
});

/// Eight lowercase hex characters taken from a random v4 UUID.
pub fn generate_session_id() -> String {
    Uuid::new_v4().simple().to_string()[..SESSION_ID_LEN].to_string()
}

/// `session-YYYYMMDD-HHMMSS-{id}.ndjson`, local time.
pub fn format_session_filename(started_at: &DateTime<Local>, id: &str) -> String {
    format!("session-{}-{}.ndjson", started_at.format("%Y%m%d-%H%M%S"), id)
}

/// Extracts `(id, start time)` from a session filename; `None` for anything else.
pub fn parse_session_filename(filename: &str) -> Option<(String, NaiveDateTime)> {
    let caps = SESSION_FILE_RE.captures(filename)?;
    let num = |i: usize| caps[i].parse::<u32>().ok();
    let date = NaiveDate::from_ymd_opt(caps[1].parse().ok()?, num(2)?, num(3)?)?;
    let started = date.and_hms_opt(num(4)?, num(5)?, num(6)?)?;
    Some((caps[7].to_string(), started))
}

/// Current git branch of the working directory, if any.
pub fn git_branch() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        debug!("git branch probe exited with {}", output.status);
        return None;
    }
    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!branch.is_empty()).then_some(branch)
}

pub fn create_session() -> SessionInfo {
    let id = generate_session_id();
    let started_at = Local::now();
    let filename = format_session_filename(&started_at, &id);
    SessionInfo {
        id,
        started_at,
        filename,
        git_branch: git_branch(),
    }
}
