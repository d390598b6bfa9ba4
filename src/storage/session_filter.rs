//! Filtering and paging for session reads.

use serde::Deserialize;

use crate::data_capture::types::{LogEntry, LogLevel};

pub const DEFAULT_LIMIT: usize = 500;
pub const MAX_LIMIT: usize = 5000;

/// Which entries of a session to return.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryQuery {
    pub offset: usize,
    pub limit: usize,
    /// Accepted levels; `None` accepts every level.
    pub levels: Option<Vec<LogLevel>>,
    /// Lower-cased needle matched against `message`.
    pub search: Option<String>,
}

impl Default for EntryQuery {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_LIMIT,
            levels: None,
            search: None,
        }
    }
}

impl EntryQuery {
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(ref levels) = self.levels {
            if !levels.contains(&entry.level) {
                return false;
            }
        }
        if let Some(ref needle) = self.search {
            if !entry.message.to_lowercase().contains(needle) {
                return false;
            }
        }
        true
    }
}

/// Raw query-string form, as sent by the dashboard.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryQueryParams {
    pub offset: Option<String>,
    pub limit: Option<String>,
    pub level: Option<String>,
    pub search: Option<String>,
}

impl From<EntryQueryParams> for EntryQuery {
    fn from(params: EntryQueryParams) -> Self {
        let offset = params
            .offset
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let limit = params
            .limit
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_LIMIT)
            .min(MAX_LIMIT);
        // Unknown names are kept out of the set, so `level=TRACE` matches nothing.
        let levels = params.level.filter(|s| !s.is_empty()).map(|s| {
            s.split(',')
                .filter_map(LogLevel::from_name)
                .collect::<Vec<_>>()
        });
        let search = params
            .search
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase());
        Self {
            offset,
            limit,
            levels,
            search,
        }
    }
}
