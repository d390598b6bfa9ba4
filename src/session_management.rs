//! Session management core module.
//!
//! This module groups everything that deals with a capture session as a unit:
//! naming and identifying sessions, fanning a live session out to viewers, and
//! the manager that ties capture, browsing and retention together.

/// Submodule for session identifiers, filenames and start-up metadata.
pub mod session;
/// Submodule for live entry fan-out.
pub mod live_fanout;
/// Submodule for session manager implementation.
pub mod session_manager;

pub use live_fanout::{LiveEvent, LiveFanout, Subscription};
pub use session_manager::{SessionManager, SessionsResponse};
