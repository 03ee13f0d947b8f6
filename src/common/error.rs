//! Error types for the touch server
//!
//! Only configuration and bind failures surface as errors. Everything that
//! happens once a run is underway is classified locally into a result code.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the touch server
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    #[error("Failed to write file '{path}': {error}")]
    FileWrite { path: String, error: String },

    #[error("Command '{0}' not found. Pass an absolute path or make sure it is on PATH")]
    CommandNotFound(String),

    #[error("Invalid command arguments '{input}': {reason}")]
    InvalidArguments { input: String, reason: String },

    // === Socket Errors ===
    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid arguments error
    pub fn invalid_arguments(input: &str, reason: impl ToString) -> Self {
        Self::InvalidArguments {
            input: input.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a file read error
    pub fn file_read(path: &std::path::Path, error: &io::Error) -> Self {
        Self::FileRead {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }

    /// Create a file write error
    pub fn file_write(path: &std::path::Path, error: &io::Error) -> Self {
        Self::FileWrite {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }
}
