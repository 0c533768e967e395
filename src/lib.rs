pub mod changeset;
pub mod config;
pub mod db;
pub mod scanner;
pub mod schema;
pub mod snapshot;

/// Audio file extensions we support
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "flac"];

/// Application name for XDG paths
pub const APP_NAME: &str = "tabulate";
