//! Line normalization: raw text line to structured [`LogEntry`].
//!
//! Classification is table driven. Each table below is an ordered list of
//! `(label, pattern)` pairs compiled once; the first matching row wins.
//! [`normalize_line`] never fails: anything it cannot recognize becomes a
//! `raw` entry with a heuristic level.

use std::sync::LazyLock;

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde_json::{Map, Value};

use super::types::{LogEntry, LogLevel, SessionInfo};

static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"[\x1b\x{9b}]\[[0-9;]*[a-zA-Z]"));

const LEVEL_RULES: &[(LogLevel, &str)] = &[
    (LogLevel::Error, r"(?i)error|exception|fatal|ERR!|\x{2717}|\x{274c}"),
    (LogLevel::Warn, r"(?i)\b(?:warn|warning)\b|WRN|\x{26a0}"),
    (LogLevel::Debug, r"(?i)\bdebug\b|DBG|\x{1f50d}"),
];

/// Runtime families a stack frame line can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackFrameKind {
    Java,
    V8,
    Python,
    Go,
}

// Java precedes V8 because every Java frame also satisfies the V8 shape.
// Rust `N: symbol` frames are deliberately absent: too easily confused with
// numbered output.
const STACK_FRAME_RULES: &[(StackFrameKind, &str)] = &[
    (StackFrameKind::Java, r"^at\s+[\w$.]+\([\w.]+:\d+\)"),
    (StackFrameKind::V8, r"^at\s+.+"),
    (StackFrameKind::Python, r#"^File\s+"[^"]+",\s+line\s+\d+"#),
    (StackFrameKind::Go, r"^/.+\.go:\d+"),
];

static LEVEL_TABLE: LazyLock<Vec<(LogLevel, Regex)>> = LazyLock::new(|| {
    LEVEL_RULES
        .iter()
        .map(|(level, pattern)| (*level, compile(pattern)))
        .collect()
});

static STACK_TABLE: LazyLock<Vec<(StackFrameKind, Regex)>> = LazyLock::new(|| {
    STACK_FRAME_RULES
        .iter()
        .map(|(kind, pattern)| (*kind, compile(pattern)))
        .collect()
});

static ISO_TS_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2}))\s+(.+)$")
});

static CLF_RE: LazyLock<Regex> =
    LazyLock::new(|| compile(r#"^(\S+) \S+ \S+ \[([^\]]+)\] "(\S+) (\S+) (\S+)" (\d+)"#));

static SYSLOG_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"^(\w+\s+\d+\s+\d+:\d+:\d+) (\S+) ([^:\[\]]+?)(?:\[(\d+)\])?: (.+)$")
});

// Every pattern in this module is a literal checked by the tests below.
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern:?}: {e}"))
}

pub fn strip_ansi(text: &str) -> String {
    ANSI_RE.replace_all(text, "").into_owned()
}

/// Keyword heuristic: ERROR, then WARN, then DEBUG, else INFO.
pub fn detect_level(line: &str) -> LogLevel {
    let stripped = strip_ansi(line);
    LEVEL_TABLE
        .iter()
        .find(|(_, re)| re.is_match(&stripped))
        .map(|(level, _)| *level)
        .unwrap_or(LogLevel::Info)
}

pub fn stack_frame_kind(line: &str) -> Option<StackFrameKind> {
    let stripped = strip_ansi(line);
    let candidate = stripped.trim_start();
    STACK_TABLE
        .iter()
        .find(|(_, re)| re.is_match(candidate))
        .map(|(kind, _)| *kind)
}

pub fn is_stack_trace_line(line: &str) -> bool {
    stack_frame_kind(line).is_some()
}

/// Strict parse of a JSON object; arrays, scalars and malformed input yield `None`.
pub fn try_parse_json(line: &str) -> Option<Map<String, Value>> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Result of one of the line-format recognizers.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFormat {
    pub timestamp: Option<String>,
    pub level: LogLevel,
    pub message: String,
    pub extra: Option<Map<String, Value>>,
}

/// ISO-timestamp prefix, then Combined Log Format, then syslog.
pub fn parse_common_formats(line: &str) -> Option<ParsedFormat> {
    let stripped = strip_ansi(line);

    if let Some(caps) = ISO_TS_RE.captures(&stripped) {
        let message = caps[2].to_string();
        return Some(ParsedFormat {
            timestamp: Some(caps[1].to_string()),
            level: detect_level(&message),
            message,
            extra: None,
        });
    }

    if let Some(caps) = CLF_RE.captures(&stripped) {
        let status: Option<u64> = caps[6].parse().ok();
        let level = match status {
            Some(code) if code >= 500 => LogLevel::Error,
            Some(code) if code >= 400 => LogLevel::Warn,
            _ => LogLevel::Info,
        };
        let mut extra = Map::new();
        extra.insert("ip".into(), Value::from(&caps[1]));
        extra.insert("method".into(), Value::from(&caps[3]));
        extra.insert("path".into(), Value::from(&caps[4]));
        extra.insert("status".into(), status.map(Value::from).unwrap_or(Value::Null));
        return Some(ParsedFormat {
            timestamp: None,
            level,
            message: format!("{} {} {} {}", &caps[3], &caps[4], &caps[5], &caps[6]),
            extra: Some(extra),
        });
    }

    if let Some(caps) = SYSLOG_RE.captures(&stripped) {
        let message = caps[5].to_string();
        let mut extra = Map::new();
        extra.insert("hostname".into(), Value::from(&caps[2]));
        extra.insert("process".into(), Value::from(&caps[3]));
        if let Some(pid) = caps.get(4).and_then(|m| m.as_str().parse::<u64>().ok()) {
            extra.insert("syslog_pid".into(), Value::from(pid));
        }
        return Some(ParsedFormat {
            timestamp: None,
            level: detect_level(&message),
            message,
            extra: Some(extra),
        });
    }

    None
}

pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Turns one raw line into a best-effort entry. Never fails.
pub fn normalize_line(line: &str, session: &SessionInfo, source: &str, project: &str) -> LogEntry {
    let stripped = strip_ansi(line);
    let mut entry = LogEntry {
        timestamp: String::new(),
        level: LogLevel::Info,
        message: String::new(),
        source: source.to_string(),
        project: project.to_string(),
        session_id: session.id.clone(),
        git_branch: session.git_branch.clone(),
        pid: std::process::id(),
        raw: false,
        stack: None,
        original: None,
    };

    if let Some(json) = try_parse_json(&stripped) {
        entry.level = json
            .get("level")
            .and_then(Value::as_str)
            .and_then(LogLevel::from_name)
            .unwrap_or_else(|| detect_level(&stripped));
        entry.message = json
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| stripped.clone());
        entry.timestamp = json
            .get("timestamp")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(now_iso);
        entry.original = Some(json);
        return entry;
    }

    if let Some(parsed) = parse_common_formats(&stripped) {
        entry.timestamp = parsed.timestamp.unwrap_or_else(now_iso);
        entry.level = parsed.level;
        entry.message = parsed.message;
        entry.original = parsed.extra;
        return entry;
    }

    entry.timestamp = now_iso();
    entry.level = detect_level(&stripped);
    entry.message = stripped;
    entry.raw = true;
    entry
}
