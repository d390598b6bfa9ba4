//! Storage subsystem
//!
//! Persists capture sessions as append-only NDJSON files and reads them back.
//!
//! Components:
//! - `storage_trait`: the `EntrySink` trait the capture engine writes through.
//! - `types`: listing and paging types shared with the HTTP layer.
//! - `file_storage`: the logs directory, session writers and the `current` pointer.
//! - `session_filter`: level/search filtering and paging for entry reads.
//! - `retention`: age and size based eviction of old sessions.

pub mod file_storage;
pub mod retention;
pub mod session_filter;
pub mod storage_trait;
pub mod types;
