//! Line-by-line capture state machine for a single session.
//!
//! `CaptureEngine` turns raw lines into persisted entries. Lines that look like
//! stack frames are folded into the preceding ERROR entry; everything else is
//! normalized, redacted and appended straight away.
//!
//! States
//! - `Idle`: nothing pending.
//! - `AccumulatingError`: an ERROR entry is held back while its stack frames
//!   arrive. It is written on the next non-frame line or at end of input.
//!
//! Every persisted entry gets the next 1-based line number of the session file
//! and, in live mode, is published to the fan-out with that number.

use std::mem;
use std::sync::Arc;

use log::{debug, error, info, trace};

use crate::data_capture::normalizer::{is_stack_trace_line, normalize_line, strip_ansi};
use crate::data_capture::redactor::redact_entry;
use crate::data_capture::types::{CaptureOptions, IndexedEntry, LogEntry, LogLevel, SessionInfo};
use crate::error_handling::types::StorageError;
use crate::session_management::live_fanout::LiveFanout;
use crate::storage::storage_trait::EntrySink;

#[derive(Debug, Default)]
enum CaptureState {
    #[default]
    Idle,
    AccumulatingError { pending: LogEntry, stack: Vec<String> },
}

/// Counters reported when a capture ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub lines_read: u64,
    pub entries_written: u64,
    pub write_failures: u64,
}

pub struct CaptureEngine<W: EntrySink> {
    session: SessionInfo,
    options: CaptureOptions,
    sink: W,
    live: Option<Arc<LiveFanout>>,
    state: CaptureState,
    summary: CaptureSummary,
}

impl<W: EntrySink> CaptureEngine<W> {
    pub fn new(session: SessionInfo, options: CaptureOptions, sink: W) -> Self {
        debug!("[{}] CaptureEngine created (source={})", session.id, options.source);
        Self {
            session,
            options,
            sink,
            live: None,
            state: CaptureState::Idle,
            summary: CaptureSummary::default(),
        }
    }

    /// Republishes every persisted entry to `fanout`.
    pub fn with_live(mut self, fanout: Arc<LiveFanout>) -> Self {
        self.live = Some(fanout);
        self
    }

    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    pub fn is_accumulating(&self) -> bool {
        matches!(self.state, CaptureState::AccumulatingError { .. })
    }

    /// Feeds one raw line, without its terminator.
    pub fn process_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        self.summary.lines_read += 1;
        let stripped = strip_ansi(line);

        if is_stack_trace_line(&stripped) {
            match &mut self.state {
                CaptureState::AccumulatingError { stack, .. } => {
                    trace!("[{}] stack frame: {}", self.session.id, stripped);
                    stack.push(stripped);
                }
                CaptureState::Idle => {
                    let entry = self.normalize(line);
                    self.persist(entry);
                }
            }
            return;
        }

        self.flush();
        let entry = self.normalize(line);
        if entry.level == LogLevel::Error {
            self.state = CaptureState::AccumulatingError { pending: entry, stack: Vec::new() };
        } else {
            self.persist(entry);
        }
    }

    /// Writes out the held ERROR entry, if any, with its stack attached.
    pub fn flush(&mut self) {
        if let CaptureState::AccumulatingError { mut pending, stack } = mem::take(&mut self.state) {
            if !stack.is_empty() {
                pending.stack = Some(stack.join("\n"));
            }
            self.persist(pending);
        }
    }

    /// Flushes, closes the sink and returns the counters.
    pub fn finish(mut self) -> Result<CaptureSummary, StorageError> {
        self.flush();
        self.sink.close()?;
        info!(
            "[{}] Capture finished: {} line(s) read, {} entr(ies) written, {} write failure(s)",
            self.session.id,
            self.summary.lines_read,
            self.summary.entries_written,
            self.summary.write_failures
        );
        Ok(self.summary)
    }

    fn normalize(&self, line: &str) -> LogEntry {
        normalize_line(line, &self.session, &self.options.source, &self.options.project)
    }

    fn persist(&mut self, entry: LogEntry) {
        let entry = redact_entry(entry);
        if let Err(e) = self.sink.append(&entry) {
            self.summary.write_failures += 1;
            error!("[{}] Dropping entry, write failed: {}", self.session.id, e);
            return;
        }
        self.summary.entries_written += 1;
        if let Some(ref fanout) = self.live {
            fanout.publish(IndexedEntry { entry, line: self.summary.entries_written });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_capture::redactor::REDACTED;
    use crate::session_management::session::create_session;
    use std::sync::Mutex;
    use tokio_stream::StreamExt;

    /// In-memory sink shared with the test through an `Arc`.
    #[derive(Clone, Default)]
    struct MemStorage {
        entries: Arc<Mutex<Vec<LogEntry>>>,
        closed: Arc<Mutex<bool>>,
        fail_next: Arc<Mutex<bool>>,
    }

    impl EntrySink for MemStorage {
        fn append(&mut self, entry: &LogEntry) -> Result<(), StorageError> {
            if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
                return Err(StorageError::Closed);
            }
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }

        fn close(&mut self) -> Result<(), StorageError> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    fn engine(storage: &MemStorage) -> CaptureEngine<MemStorage> {
        let options = CaptureOptions { source: "test".into(), project: "/app".into(), passthrough: false };
        CaptureEngine::new(create_session(), options, storage.clone())
    }

    fn run(lines: &[&str]) -> Vec<LogEntry> {
        let storage = MemStorage::default();
        let mut engine = engine(&storage);
        for line in lines {
            engine.process_line(line);
        }
        engine.finish().unwrap();
        assert!(*storage.closed.lock().unwrap());
        let entries = storage.entries.lock().unwrap().clone();
        entries
    }

    #[test]
    fn plain_lines_become_raw_info_entries() {
        let entries = run(&["INFO: server started", "listening on port 3000"]);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.level == LogLevel::Info && e.raw));
        assert_eq!(entries[0].source, "test");
        assert_eq!(entries[0].project, "/app");
    }

    #[test]
    fn stack_frames_attach_to_preceding_error() {
        let entries = run(&[
            "Error: Module not found",
            "    at Object.<anonymous> (/app/src/index.js:3:15)",
            "    at Module._compile (node:internal/modules/cjs/loader:1256:14)",
            "INFO: recovered",
        ]);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, LogLevel::Error);
        assert_eq!(
            entries[0].stack.as_deref(),
            Some(
                "    at Object.<anonymous> (/app/src/index.js:3:15)\n    at Module._compile (node:internal/modules/cjs/loader:1256:14)"
            )
        );
        assert_eq!(entries[1].level, LogLevel::Info);
    }

    #[test]
    fn pending_error_is_flushed_at_end_of_input() {
        let entries = run(&["Traceback: fatal crash", "  File \"app.py\", line 3, in <module>"]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].stack.as_deref(), Some("  File \"app.py\", line 3, in <module>"));
    }

    #[test]
    fn consecutive_errors_are_separate_entries() {
        let entries = run(&["Error: first", "Error: second"]);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.stack.is_none()));
        assert_eq!(entries[1].message, "Error: second");
    }

    #[test]
    fn orphan_stack_frame_is_its_own_entry() {
        let entries = run(&["starting", "    at foo (/app/a.js:1:1)"]);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].message, "    at foo (/app/a.js:1:1)");
        assert!(entries[1].stack.is_none());
    }

    #[test]
    fn blank_lines_do_not_interrupt_accumulation() {
        let entries = run(&["Error: boom", "", "   ", "    at a (/x.js:1:1)"]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].stack.as_deref(), Some("    at a (/x.js:1:1)"));
    }

    #[test]
    fn stack_lines_are_stored_without_ansi() {
        let entries = run(&["\x1b[31mError: colored\x1b[0m", "\x1b[2m    at a (/x.js:1:1)\x1b[0m"]);
        assert_eq!(entries[0].message, "Error: colored");
        assert_eq!(entries[0].stack.as_deref(), Some("    at a (/x.js:1:1)"));
    }

    #[test]
    fn persisted_entries_are_redacted() {
        let entries = run(&[
            "Connecting to postgres://admin:secretpass@db:5432/app",
            "Error: auth failed for Bearer abc.def",
            "    at login (/app/token=abcdefghijklmnop1234.js:1:1)",
        ]);
        assert!(!entries[0].message.contains("admin:secretpass"));
        assert!(entries[0].message.contains("postgres://"));
        assert!(entries[1].message.contains("Bearer [REDACTED]"));
        assert!(entries[1].stack.as_deref().unwrap().contains(REDACTED));
    }

    #[test]
    fn write_failure_is_counted_and_capture_continues() {
        let storage = MemStorage::default();
        let mut engine = engine(&storage);
        *storage.fail_next.lock().unwrap() = true;
        engine.process_line("lost");
        engine.process_line("kept");
        let summary = engine.finish().unwrap();
        assert_eq!(summary, CaptureSummary { lines_read: 2, entries_written: 1, write_failures: 1 });
        assert_eq!(storage.entries.lock().unwrap()[0].message, "kept");
    }

    #[tokio::test]
    async fn live_mode_publishes_gap_free_line_numbers() {
        let storage = MemStorage::default();
        let fanout = Arc::new(LiveFanout::new());
        let mut engine = engine(&storage).with_live(Arc::clone(&fanout));
        fanout.begin(&engine.session().id.clone());
        let mut sub = fanout.subscribe(&engine.session().id.clone()).unwrap();

        engine.process_line("first");
        engine.process_line("Error: second");
        engine.process_line("    at a (/x.js:1:1)");
        assert!(engine.is_accumulating());
        engine.process_line("third");
        engine.finish().unwrap();
        fanout.finish();

        let mut seen = Vec::new();
        while let Some(crate::session_management::live_fanout::LiveEvent::Entry(e)) = sub.next().await {
            seen.push((e.line, e.entry.message));
        }
        assert_eq!(
            seen,
            vec![(1, "first".to_string()), (2, "Error: second".to_string()), (3, "third".to_string())]
        );
    }
}
