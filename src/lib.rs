pub mod configuration;
pub use configuration::{AppPaths, Cli, Settings};

pub mod data_capture;

pub mod error_handling;

pub mod reference;

pub mod session_management;
pub use session_management::SessionManager;

pub mod storage;

pub mod web_interface;
pub use web_interface::WebServer;
