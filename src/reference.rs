//! Compact citations of session lines.
//!
//! A reference looks like `logifai://SESSIONID:LINESPEC[+SESSIONID:LINESPEC...]`
//! where the `logifai://` prefix is optional, `SESSIONID` is lowercase hex and
//! `LINESPEC` is a comma-separated list of line numbers and inclusive ranges,
//! e.g. `logifai://abcdef01:10-12,15`.

use std::collections::{BTreeSet, HashSet};
use std::ops::ControlFlow;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::data_capture::types::LogEntry;
use crate::error_handling::types::{ReferenceError, StorageError};
use crate::storage::file_storage::FileStorage;

pub const SCHEME: &str = "logifai://";
pub const MAX_RANGE_SPAN: u64 = 10_000;

/// Lines of one session, sorted and de-duplicated, 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRef {
    pub session_id: String,
    pub lines: Vec<u64>,
}

/// A stored entry tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEntry {
    #[serde(flatten)]
    pub entry: LogEntry,
    #[serde(rename = "_ref")]
    pub reference: String,
    #[serde(rename = "_line")]
    pub line: u64,
}

pub fn parse_reference(reference: &str) -> Result<Vec<LineRef>, ReferenceError> {
    let uri = reference.trim();
    let uri = uri.strip_prefix(SCHEME).unwrap_or(uri);
    if uri.is_empty() {
        return Err(ReferenceError::Empty);
    }

    uri.split('+')
        .map(|segment| {
            let (session_id, spec) = segment
                .split_once(':')
                .ok_or_else(|| ReferenceError::MissingSeparator(segment.to_string()))?;
            if session_id.is_empty() || spec.is_empty() {
                return Err(ReferenceError::InvalidSegment(segment.to_string()));
            }
            if !session_id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
                return Err(ReferenceError::InvalidSessionId(session_id.to_string()));
            }
            let lines = expand_line_spec(spec)?;
            if lines.is_empty() {
                return Err(ReferenceError::EmptyLineSpec(segment.to_string()));
            }
            Ok(LineRef { session_id: session_id.to_string(), lines })
        })
        .collect()
}

/// `"10,20-23,50"` to `[10, 20, 21, 22, 23, 50]`. Ranges may be reversed.
pub fn expand_line_spec(spec: &str) -> Result<Vec<u64>, ReferenceError> {
    let mut lines = BTreeSet::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let invalid = || ReferenceError::InvalidRange(part.to_string());
            let start = parse_line_number(start).ok_or_else(invalid)?;
            let end = parse_line_number(end).ok_or_else(invalid)?;
            let (lo, hi) = (start.min(end), start.max(end));
            if hi - lo > MAX_RANGE_SPAN {
                return Err(ReferenceError::RangeTooLarge(part.to_string(), MAX_RANGE_SPAN));
            }
            lines.extend(lo..=hi);
        } else {
            let line = parse_line_number(part)
                .ok_or_else(|| ReferenceError::InvalidLine(part.to_string()))?;
            lines.insert(line);
        }
    }
    Ok(lines.into_iter().collect())
}

fn parse_line_number(token: &str) -> Option<u64> {
    token.trim().parse::<u64>().ok().filter(|n| *n >= 1)
}

/// Inverse of [`parse_reference`] for one session: consecutive lines collapse
/// into `A-B` runs.
pub fn format_reference(session_id: &str, lines: &[u64]) -> String {
    let sorted: BTreeSet<u64> = lines.iter().copied().collect();
    let mut parts = Vec::new();
    let mut iter = sorted.into_iter();
    if let Some(first) = iter.next() {
        let (mut start, mut end) = (first, first);
        for line in iter {
            if line == end + 1 {
                end = line;
                continue;
            }
            parts.push(format_run(start, end));
            start = line;
            end = line;
        }
        parts.push(format_run(start, end));
    }
    format!("{}{}:{}", SCHEME, session_id, parts.join(","))
}

fn format_run(start: u64, end: u64) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{}-{}", start, end)
    }
}

/// Looks referenced lines up in stored sessions.
pub struct ReferenceResolver {
    storage: Arc<FileStorage>,
}

impl ReferenceResolver {
    pub fn new(storage: Arc<FileStorage>) -> Self {
        Self { storage }
    }

    /// Entries in reference order, ascending lines within each reference.
    /// Requested lines past the end of a session are simply absent.
    pub fn resolve(&self, refs: &[LineRef]) -> Result<Vec<ResolvedEntry>, ReferenceError> {
        let mut resolved = Vec::new();
        for line_ref in refs {
            let wanted: HashSet<u64> = line_ref.lines.iter().copied().collect();
            let last = line_ref.lines.iter().copied().max().unwrap_or(0);
            let before = resolved.len();
            self.storage
                .scan_session(&line_ref.session_id, |line, entry| {
                    if wanted.contains(&line) {
                        resolved.push(ResolvedEntry {
                            entry,
                            reference: format!("{}:{}", line_ref.session_id, line),
                            line,
                        });
                    }
                    if line >= last {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                })
                .map_err(|e| match e {
                    StorageError::NotFound(_) => {
                        ReferenceError::SessionNotFound(line_ref.session_id.clone())
                    }
                    other => ReferenceError::ReadFailed(line_ref.session_id.clone(), other.to_string()),
                })?;
            debug!(
                "Resolved {} of {} line(s) in session {}",
                resolved.len() - before,
                line_ref.lines.len(),
                line_ref.session_id
            );
        }
        Ok(resolved)
    }

    /// Parses and resolves in one step.
    pub fn resolve_str(&self, reference: &str) -> Result<Vec<ResolvedEntry>, ReferenceError> {
        self.resolve(&parse_reference(reference)?)
    }
}
