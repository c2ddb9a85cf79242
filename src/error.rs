//! Error types for plughost
//!
//! This module defines all error types used throughout the plugin subsystem.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use thiserror::Error;

/// The primary error type for plughost operations.
#[derive(Error, Debug)]
pub enum HostError {
    /// Malformed or incomplete manifest, or an archive that cannot be a package
    #[error("Validation error: {0}")]
    Validation(String),

    /// Manifest references a file absent from the archive
    #[error("Missing asset: {0}")]
    AssetMissing(String),

    /// Transport failure fetching code/style or talking to the disk protocol
    #[error("Network error: {0}")]
    Network(String),

    /// Code executed but never populated its namespace entry
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Disk write/delete failure reported by the serving process
    #[error("Server I/O error: {0}")]
    ServerIo(String),

    /// Illegal lifecycle transition (uninstall-while-enabled, block-while-installed)
    #[error("Guard violation: {0}")]
    Guard(String),

    /// Resource not found (installed entries, repository directories, exports)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A specialized `Result` type for plughost operations.
pub type Result<T> = std::result::Result<T, HostError>;
