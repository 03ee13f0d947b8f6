//! Platform configuration and log paths

use std::path::PathBuf;

/// Name used for the project directories
const APP_NAME: &str = "touch-server";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/touch-server/`
/// - macOS: `~/Library/Application Support/touch-server/`
/// - Windows: `%APPDATA%\touch-server\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the default configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}
