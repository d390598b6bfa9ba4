pub mod cli;
pub mod config;
pub mod paths;
pub mod types;

pub use cli::Cli;
pub use config::Settings;
pub use paths::AppPaths;
pub use types::{RetentionSettings, WebSettings};
