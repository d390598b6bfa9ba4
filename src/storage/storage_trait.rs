//! Storage Trait
//!
//! This module defines the `EntrySink` trait, the seam between the capture
//! pipeline and whatever persists finalized entries.
//!
//! Implementors are responsible for:
//! - Appending one entry per call, in call order
//! - Releasing any held resources on `close`
//!
//! All methods return a `Result` to handle potential storage errors.

use crate::data_capture::types::LogEntry;
use crate::error_handling::types::StorageError;

/// Append-only destination for finalized entries.
///
/// A successful `append` means the entry now occupies the next physical line
/// of the session, which is what live line numbering relies on.
pub trait EntrySink: Send {
    /// Appends a single entry.
    fn append(&mut self, entry: &LogEntry) -> Result<(), StorageError>;

    /// Flushes and releases the destination. Further appends fail.
    fn close(&mut self) -> Result<(), StorageError>;
}
