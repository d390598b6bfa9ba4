pub mod types;
pub mod normalizer;
pub mod redactor;
pub mod recorder;
pub mod stdio_capture;

pub use types::{CaptureOptions, IndexedEntry, LogEntry, LogLevel, SessionInfo};
pub use recorder::{CaptureEngine, CaptureSummary};
pub use stdio_capture::StdioCapture;
