use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use log::{debug, info, warn};
use serde::Serialize;

use crate::configuration::Settings;
use crate::data_capture::recorder::CaptureEngine;
use crate::data_capture::types::CaptureOptions;
use crate::error_handling::types::{CaptureError, ReferenceError, SessionError};
use crate::reference::{ReferenceResolver, ResolvedEntry};
use crate::session_management::live_fanout::{LiveFanout, Subscription};
use crate::session_management::session::create_session;
use crate::storage::file_storage::{FileStorage, SessionWriter};
use crate::storage::retention::{CleanupPolicy, CleanupResult, RetentionManager};
use crate::storage::session_filter::EntryQuery;
use crate::storage::types::{EntryPage, SessionMeta};

/// Body of `GET /api/sessions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsResponse {
    pub sessions: Vec<SessionMeta>,
    pub live_session_id: Option<String>,
}

/// Coordinates sessions across capture, browsing, retention and citations.
///
/// The manager is the only place that knows which session is live: it keeps
/// that id out of every retention pass and refuses to delete it.
///
/// # Fields Overview
///
/// - `storage`: the logs directory shared by every component
/// - `fanout`: live entry fan-out for the capture running in this process
/// - `retention`: age/size eviction over `storage`
/// - `resolver`: `logifai://` reference lookups over `storage`
/// - `settings`: retention policy and web port, replaceable over HTTP
/// - `settings_file`: where replaced settings are persisted, if anywhere
pub struct SessionManager {
    storage: Arc<FileStorage>,
    fanout: Arc<LiveFanout>,
    retention: RetentionManager,
    resolver: ReferenceResolver,
    settings: RwLock<Settings>,
    settings_file: Option<PathBuf>,
}

impl SessionManager {
    pub fn new(storage: Arc<FileStorage>, settings: Settings) -> Self {
        Self {
            retention: RetentionManager::new(Arc::clone(&storage)),
            resolver: ReferenceResolver::new(Arc::clone(&storage)),
            fanout: Arc::new(LiveFanout::new()),
            storage,
            settings: RwLock::new(settings),
            settings_file: None,
        }
    }

    /// Persists settings replaced through [`SessionManager::update_settings`] to `path`.
    pub fn with_settings_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_file = Some(path.into());
        self
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Saves `settings` to the settings file, then makes them current.
    pub fn update_settings(&self, settings: Settings) -> Result<Settings, SessionError> {
        if let Some(path) = &self.settings_file {
            settings.save(path)?;
        }
        if let Ok(mut current) = self.settings.write() {
            *current = settings.clone();
        }
        info!(
            "Settings updated (retention_days={}, max_total_size_mb={}, auto_cleanup={})",
            settings.retention.retention_days, settings.retention.max_total_size_mb, settings.retention.auto_cleanup
        );
        Ok(settings)
    }

    pub fn storage(&self) -> &Arc<FileStorage> {
        &self.storage
    }

    /// Starts a new session: opens its file, repoints `current`, runs the
    /// automatic retention pass and, when `live`, opens it to subscribers.
    pub fn begin_capture(
        &self,
        options: CaptureOptions,
        live: bool,
    ) -> Result<CaptureEngine<SessionWriter>, SessionError> {
        let session = create_session();
        let writer = self.storage.create_writer(&session).map_err(CaptureError::from)?;
        if let Err(e) = self.storage.update_current_pointer(&session) {
            warn!("[{}] Could not update current pointer: {}", session.id, e);
        }
        self.retention.auto_cleanup(&self.settings().retention, &session.id);

        info!(
            "[{}] Capture started (source={}, branch={})",
            session.id,
            options.source,
            session.git_branch.as_deref().unwrap_or("-")
        );
        let mut engine = CaptureEngine::new(session, options, writer);
        if live {
            self.fanout.begin(&engine.session().id);
            engine = engine.with_live(Arc::clone(&self.fanout));
        }
        Ok(engine)
    }

    /// Ends live streaming for `session_id`, if it is the live session.
    pub fn end_capture(&self, session_id: &str) {
        if self.fanout.live_session_id().as_deref() == Some(session_id) {
            self.fanout.finish();
        }
    }

    pub fn live_session_id(&self) -> Option<String> {
        self.fanout.live_session_id()
    }

    pub fn list_sessions(&self) -> Result<SessionsResponse, SessionError> {
        Ok(SessionsResponse {
            sessions: self.storage.list_sessions()?,
            live_session_id: self.live_session_id(),
        })
    }

    pub fn entries(&self, session_id: &str, query: &EntryQuery) -> Result<EntryPage, SessionError> {
        Ok(self.storage.read_entries(session_id, query)?)
    }

    pub fn subscribe(&self, session_id: &str) -> Result<Subscription, SessionError> {
        Ok(self.fanout.subscribe(session_id)?)
    }

    /// Deletes a stored session. The live session cannot be deleted.
    pub fn delete_session(&self, session_id: &str) -> Result<SessionMeta, SessionError> {
        if self.live_session_id().as_deref() == Some(session_id) {
            return Err(SessionError::Conflict(session_id.to_string()));
        }
        let meta = self.storage.delete_session(session_id)?;
        debug!("Deleted session {} ({} bytes)", meta.id, meta.size);
        Ok(meta)
    }

    /// Runs a retention pass with the live session protected.
    pub fn cleanup(&self, policy: CleanupPolicy) -> Result<CleanupResult, SessionError> {
        let policy = match self.live_session_id() {
            Some(id) => policy.protect(id),
            None => policy,
        };
        Ok(self.retention.cleanup(&policy)?)
    }

    /// Retention pass using the settings file policy.
    pub fn cleanup_with_settings(&self) -> Result<CleanupResult, SessionError> {
        self.cleanup(CleanupPolicy::from_settings(&self.settings().retention))
    }

    pub fn resolve_reference(&self, reference: &str) -> Result<Vec<ResolvedEntry>, ReferenceError> {
        self.resolver.resolve_str(reference)
    }
}
