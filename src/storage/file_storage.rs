use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, error, info, warn};

use crate::data_capture::types::{IndexedEntry, LogEntry, SessionInfo};
use crate::error_handling::types::StorageError;
use crate::session_management::session::parse_session_filename;
use crate::storage::session_filter::EntryQuery;
use crate::storage::storage_trait::EntrySink;
use crate::storage::types::{EntryPage, SessionMeta};

pub const CURRENT_POINTER: &str = "current.ndjson";
pub const CURRENT_ALIAS: &str = "current";

/// Directory of session files plus the "current session" pointer.
///
/// The latest session id is tracked in memory and written through to the
/// `current.ndjson` symlink; in-process lookups of `current` prefer the
/// in-memory value and only fall back to the link.
pub struct FileStorage {
    logs_dir: PathBuf,
    latest_session: Mutex<Option<String>>,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(logs_dir: P) -> Self {
        Self {
            logs_dir: logs_dir.as_ref().to_path_buf(),
            latest_session: Mutex::new(None),
        }
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn ensure_dir(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.logs_dir).map_err(|e| {
            error!("Failed to create logs dir {}: {}", self.logs_dir.display(), e);
            StorageError::WriteFailed { path: self.logs_dir.clone(), source: e }
        })?;
        restrict_permissions(&self.logs_dir, 0o700);
        Ok(())
    }

    /// Opens the session file for appending. The handle stays open until the
    /// writer is closed.
    pub fn create_writer(&self, session: &SessionInfo) -> Result<SessionWriter, StorageError> {
        self.ensure_dir()?;
        let path = self.logs_dir.join(&session.filename);
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(&path).map_err(|e| {
            error!("Failed to open session file {}: {}", path.display(), e);
            StorageError::WriteFailed { path: path.clone(), source: e }
        })?;
        info!("Recording session {} to {}", session.id, path.display());
        Ok(SessionWriter { path, file: Some(file) })
    }

    /// Records `session` as the latest one and repoints `current.ndjson` at it.
    pub fn update_current_pointer(&self, session: &SessionInfo) -> Result<(), StorageError> {
        if let Ok(mut latest) = self.latest_session.lock() {
            *latest = Some(session.id.clone());
        }
        let link = self.logs_dir.join(CURRENT_POINTER);
        match fs::remove_file(&link) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::WriteFailed { path: link, source: e }),
        }
        make_symlink(Path::new(&session.filename), &link)
            .map_err(|e| StorageError::WriteFailed { path: link.clone(), source: e })?;
        debug!("{} -> {}", link.display(), session.filename);
        Ok(())
    }

    pub fn latest_session_id(&self) -> Option<String> {
        self.latest_session.lock().ok().and_then(|latest| latest.clone())
    }

    /// Session files in the logs directory, newest first. A missing directory
    /// is an empty listing.
    pub fn list_sessions(&self) -> Result<Vec<SessionMeta>, StorageError> {
        let dir = match fs::read_dir(&self.logs_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                error!("Failed to read logs dir {}: {}", self.logs_dir.display(), e);
                return Err(StorageError::ReadFailed { path: self.logs_dir.clone(), source: e });
            }
        };
        let mut sessions = Vec::new();
        for entry in dir.flatten() {
            let filename = entry.file_name().to_string_lossy().into_owned();
            let Some((id, started_at)) = parse_session_filename(&filename) else {
                continue;
            };
            // The file may vanish between listing and stat.
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            sessions.push(SessionMeta { id, started_at, filename, size: metadata.len() });
        }
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| b.filename.cmp(&a.filename)));
        debug!("Found {} session(s) in {}", sessions.len(), self.logs_dir.display());
        Ok(sessions)
    }

    /// Path of the file backing `session_id`, which may be `current`.
    pub fn resolve_session_file(&self, session_id: &str) -> Result<PathBuf, StorageError> {
        if session_id == CURRENT_ALIAS {
            if let Some(latest) = self.latest_session_id() {
                return self.resolve_session_file(&latest);
            }
            let link = self.logs_dir.join(CURRENT_POINTER);
            let target = fs::read_link(&link)
                .map_err(|_| StorageError::NotFound(session_id.to_string()))?;
            let path = self.logs_dir.join(target);
            if !path.is_file() {
                return Err(StorageError::NotFound(session_id.to_string()));
            }
            return Ok(path);
        }
        self.list_sessions()?
            .into_iter()
            .find(|s| s.id == session_id)
            .map(|s| self.logs_dir.join(s.filename))
            .ok_or_else(|| StorageError::NotFound(session_id.to_string()))
    }

    /// Streams the session file, handing each parsed entry and its 1-based
    /// physical line number to `visit` until it breaks.
    ///
    /// Blank lines are not counted. Unparsable lines are counted but skipped,
    /// and a trailing line without a newline is still being written, so it is
    /// left out.
    pub fn scan_session<F>(&self, session_id: &str, mut visit: F) -> Result<(), StorageError>
    where
        F: FnMut(u64, LogEntry) -> ControlFlow<()>,
    {
        let path = self.resolve_session_file(session_id)?;
        let file = File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(session_id.to_string()),
            _ => StorageError::ReadFailed { path: path.clone(), source: e },
        })?;
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        let mut line_no = 0u64;
        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .map_err(|e| StorageError::ReadFailed { path: path.clone(), source: e })?;
            if n == 0 || buf.last() != Some(&b'\n') {
                break;
            }
            let text = String::from_utf8_lossy(&buf);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            line_no += 1;
            match serde_json::from_str::<LogEntry>(text) {
                Ok(entry) => {
                    if visit(line_no, entry).is_break() {
                        break;
                    }
                }
                Err(e) => debug!("Skipping unparsable line {} of {}: {}", line_no, path.display(), e),
            }
        }
        Ok(())
    }

    /// Filtered, paged read of one session.
    pub fn read_entries(&self, session_id: &str, query: &EntryQuery) -> Result<EntryPage, StorageError> {
        let mut entries = Vec::new();
        let mut total = 0usize;
        self.scan_session(session_id, |line, entry| {
            if query.matches(&entry) {
                if total >= query.offset && entries.len() < query.limit {
                    entries.push(IndexedEntry { entry, line });
                }
                total += 1;
            }
            ControlFlow::Continue(())
        })?;
        Ok(EntryPage { entries, total, offset: query.offset, limit: query.limit })
    }

    /// Deletes the file for `session_id`. NotFound if no such session exists.
    pub fn delete_session(&self, session_id: &str) -> Result<SessionMeta, StorageError> {
        let meta = self
            .list_sessions()?
            .into_iter()
            .find(|s| s.id == session_id)
            .ok_or_else(|| StorageError::NotFound(session_id.to_string()))?;
        self.delete_session_file(&meta.filename)?;
        Ok(meta)
    }

    /// Removes one session file. Returns false if it was already gone.
    pub fn delete_session_file(&self, filename: &str) -> Result<bool, StorageError> {
        let path = self.logs_dir.join(filename);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted session file {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Session file {} already gone", path.display());
                Ok(false)
            }
            Err(e) => {
                warn!("Failed to delete {}: {}", path.display(), e);
                Err(StorageError::WriteFailed { path, source: e })
            }
        }
    }
}

/// Append-only writer for one session file, one JSON object per line.
pub struct SessionWriter {
    path: PathBuf,
    file: Option<File>,
}

impl SessionWriter {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EntrySink for SessionWriter {
    fn append(&mut self, entry: &LogEntry) -> Result<(), StorageError> {
        let file = self.file.as_mut().ok_or(StorageError::Closed)?;
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        file.write_all(&line).map_err(|e| {
            error!("Failed to append to {}: {}", self.path.display(), e);
            StorageError::WriteFailed { path: self.path.clone(), source: e }
        })
    }

    fn close(&mut self) -> Result<(), StorageError> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .and_then(|_| file.sync_data())
                .map_err(|e| StorageError::WriteFailed { path: self.path.clone(), source: e })?;
            debug!("Closed session file {}", self.path.display());
        }
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        warn!("Failed to restrict permissions on {}: {}", path.display(), e);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) {}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_capture::types::LogLevel;
    use chrono::{Local, TimeZone};
    use tempfile::TempDir;

    fn session(id: &str, secs: u32) -> SessionInfo {
        let started_at = Local.with_ymd_and_hms(2026, 2, 8, 10, 0, secs).unwrap();
        SessionInfo {
            id: id.into(),
            started_at,
            filename: crate::session_management::session::format_session_filename(&started_at, id),
            git_branch: None,
        }
    }

    fn entry(level: LogLevel, message: &str) -> LogEntry {
        LogEntry {
            timestamp: "2026-02-08T10:00:00.000Z".into(),
            level,
            message: message.into(),
            source: "test".into(),
            project: "/app".into(),
            session_id: "aabbccdd".into(),
            git_branch: None,
            pid: 1,
            raw: true,
            stack: None,
            original: None,
        }
    }

    fn write_session(storage: &FileStorage, info: &SessionInfo, entries: &[LogEntry]) {
        let mut writer = storage.create_writer(info).unwrap();
        for e in entries {
            writer.append(e).unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn missing_dir_lists_no_sessions() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("nope"));
        assert!(storage.list_sessions().unwrap().is_empty());
        assert!(storage.read_entries("aabbccdd", &EntryQuery::default()).unwrap_err().is_not_found());
    }

    #[test]
    fn append_then_read_assigns_physical_lines() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());
        let info = session("aabbccdd", 0);
        write_session(
            &storage,
            &info,
            &[entry(LogLevel::Info, "one"), entry(LogLevel::Error, "two"), entry(LogLevel::Info, "three")],
        );

        let page = storage.read_entries("aabbccdd", &EntryQuery::default()).unwrap();
        assert_eq!(page.total, 3);
        let lines: Vec<_> = page.entries.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![1, 2, 3]);
        assert_eq!(page.entries[1].entry.message, "two");
    }

    #[test]
    fn filters_apply_after_line_numbering() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());
        let info = session("aabbccdd", 0);
        write_session(
            &storage,
            &info,
            &[
                entry(LogLevel::Info, "boot"),
                entry(LogLevel::Error, "Timeout talking to db"),
                entry(LogLevel::Warn, "slow"),
                entry(LogLevel::Error, "disk full"),
            ],
        );

        let query = EntryQuery { levels: Some(vec![LogLevel::Error]), ..Default::default() };
        let page = storage.read_entries("aabbccdd", &query).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.entries.iter().map(|e| e.line).collect::<Vec<_>>(), vec![2, 4]);

        let query = EntryQuery { search: Some("timeout".into()), ..Default::default() };
        let page = storage.read_entries("aabbccdd", &query).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.entries[0].line, 2);

        let query = EntryQuery { offset: 1, limit: 2, ..Default::default() };
        let page = storage.read_entries("aabbccdd", &query).unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(page.entries.iter().map(|e| e.line).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn blank_garbage_and_partial_lines_are_tolerated() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());
        let info = session("aabbccdd", 0);
        let good = serde_json::to_string(&entry(LogLevel::Info, "ok")).unwrap();
        let content = format!("{good}\n\nnot json\n{good}\n{{\"timestamp\":");
        fs::write(dir.path().join(&info.filename), content).unwrap();

        let page = storage.read_entries("aabbccdd", &EntryQuery::default()).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.entries.iter().map(|e| e.line).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn listing_is_newest_first_and_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());
        write_session(&storage, &session("aaaaaaaa", 1), &[entry(LogLevel::Info, "a")]);
        write_session(&storage, &session("bbbbbbbb", 2), &[]);
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let sessions = storage.list_sessions().unwrap();
        let ids: Vec<_> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["bbbbbbbb", "aaaaaaaa"]);
        assert!(sessions[1].size > 0);
        assert_eq!(sessions[0].size, 0);
    }

    #[test]
    fn current_pointer_follows_latest_session() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());
        let first = session("aaaaaaaa", 1);
        let second = session("bbbbbbbb", 2);
        write_session(&storage, &first, &[entry(LogLevel::Info, "first")]);
        storage.update_current_pointer(&first).unwrap();
        write_session(&storage, &second, &[entry(LogLevel::Info, "second")]);
        storage.update_current_pointer(&second).unwrap();

        assert_eq!(storage.latest_session_id().as_deref(), Some("bbbbbbbb"));
        let target = fs::read_link(dir.path().join(CURRENT_POINTER)).unwrap();
        assert_eq!(target, PathBuf::from(&second.filename));

        let page = storage.read_entries(CURRENT_ALIAS, &EntryQuery::default()).unwrap();
        assert_eq!(page.entries[0].entry.message, "second");

        // A fresh store falls back to the symlink.
        let reopened = FileStorage::new(dir.path());
        let page = reopened.read_entries(CURRENT_ALIAS, &EntryQuery::default()).unwrap();
        assert_eq!(page.entries[0].entry.message, "second");
    }

    #[test]
    fn dangling_current_pointer_is_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());
        let info = session("aaaaaaaa", 1);
        write_session(&storage, &info, &[]);
        storage.update_current_pointer(&info).unwrap();
        storage.delete_session("aaaaaaaa").unwrap();

        let reopened = FileStorage::new(dir.path());
        assert!(reopened.read_entries(CURRENT_ALIAS, &EntryQuery::default()).unwrap_err().is_not_found());
    }

    #[test]
    fn delete_tolerates_missing_file_and_reports_unknown_id() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());
        assert!(!storage.delete_session_file("session-20260101-000000-deadbeef.ndjson").unwrap());
        assert!(storage.delete_session("deadbeef").unwrap_err().is_not_found());
    }

    #[test]
    fn writer_rejects_appends_after_close() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());
        let mut writer = storage.create_writer(&session("aaaaaaaa", 1)).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(matches!(writer.append(&entry(LogLevel::Info, "late")), Err(StorageError::Closed)));
    }

    #[cfg(unix)]
    #[test]
    fn files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        let storage = FileStorage::new(&logs);
        let writer = storage.create_writer(&session("aaaaaaaa", 1)).unwrap();
        let file_mode = fs::metadata(writer.path()).unwrap().permissions().mode() & 0o777;
        let dir_mode = fs::metadata(&logs).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode & 0o077, 0);
        assert_eq!(dir_mode, 0o700);
    }
}
