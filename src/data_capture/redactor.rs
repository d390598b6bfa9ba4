//! Secret scrubbing for captured text.
//!
//! Rules run in a fixed order over the whole string. Every replacement is a
//! constant placeholder (optionally keeping non-secret context through capture
//! groups), and no placeholder can be matched again by any rule, so [`redact`]
//! is idempotent.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::types::LogEntry;

pub const REDACTED: &str = "[REDACTED]";

/// `(name, pattern, replacement)`; replacements may reference capture groups.
const REDACTION_RULES: &[(&str, &str, &str)] = &[
    ("bearer", r"(?i)Bearer\s+[A-Za-z0-9_.-]+", "Bearer [REDACTED]"),
    ("github_pat", r"gh[ps]_[A-Za-z0-9]{36,}", REDACTED),
    ("openai_key", r"sk-[A-Za-z0-9]{20,}", REDACTED),
    ("anthropic_key", r"sk-ant-[A-Za-z0-9_-]{20,}", REDACTED),
    ("aws_access_key", r"AKIA[0-9A-Z]{16}", REDACTED),
    (
        "connection_string",
        r"(?i)(postgres|mysql|mongodb|redis)://[^:/\s@]+:[^@\s]+@",
        "${1}://[REDACTED]:[REDACTED]@",
    ),
    (
        "jwt",
        r"eyJ[A-Za-z0-9_-]+\.eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_.-]+",
        REDACTED,
    ),
    (
        "generic_assignment",
        r#"(?i)(api[_-]?key|key|token|secret|password|credential)(\s*[=:]\s*)["']?[A-Za-z0-9_.-]{16,}["']?"#,
        "${1}${2}[REDACTED]",
    ),
    (
        "private_key_block",
        r"(?s)-----BEGIN\s+(?:[A-Z]+\s+)*PRIVATE\s+KEY-----.*?-----END\s+(?:[A-Z]+\s+)*PRIVATE\s+KEY-----",
        REDACTED,
    ),
];

struct RedactionRule {
    name: &'static str,
    pattern: Regex,
    replacement: &'static str,
}

static RULES: LazyLock<Vec<RedactionRule>> = LazyLock::new(|| {
    REDACTION_RULES
        .iter()
        .map(|&(name, pattern, replacement)| RedactionRule {
            name,
            pattern: Regex::new(pattern)
                .unwrap_or_else(|e| panic!("invalid redaction rule {name}: {e}")),
            replacement,
        })
        .collect()
});

pub fn redact(text: &str) -> String {
    let mut result = text.to_string();
    for rule in RULES.iter() {
        if rule.pattern.is_match(&result) {
            log::trace!("redaction rule {} matched", rule.name);
            result = rule.pattern.replace_all(&result, rule.replacement).into_owned();
        }
    }
    result
}

/// Redacts `message`, `stack` and every string nested in `_original` objects.
pub fn redact_entry(entry: LogEntry) -> LogEntry {
    LogEntry {
        message: redact(&entry.message),
        stack: entry.stack.as_deref().map(redact),
        original: entry.original.map(redact_object),
        ..entry
    }
}

// Arrays are passed through as-is; only object members are walked.
fn redact_object(object: Map<String, Value>) -> Map<String, Value> {
    object
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => Value::String(redact(&s)),
                Value::Object(inner) => Value::Object(redact_object(inner)),
                other => other,
            };
            (key, value)
        })
        .collect()
}
