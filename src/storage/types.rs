use chrono::NaiveDateTime;
use serde::Serialize;

use crate::data_capture::types::IndexedEntry;

/// Listing metadata for one session file, derived from its name and size.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub id: String,
    #[serde(serialize_with = "serialize_started_at")]
    pub started_at: NaiveDateTime,
    pub filename: String,
    pub size: u64,
}

fn serialize_started_at<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_str(&value.format("%Y-%m-%dT%H:%M:%S"))
}

/// One page of a filtered session read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryPage {
    pub entries: Vec<IndexedEntry>,
    /// Number of entries that passed the filters, across all pages.
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}
