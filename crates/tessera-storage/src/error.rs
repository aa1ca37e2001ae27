//! Storage error types.
//!
//! Every variant carries the failing key or pattern so a failure can be
//! diagnosed from the log line alone. Values are never included.

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to establish or verify a connection to the backend.
    #[error("failed to connect to '{url}': {reason}")]
    Connect { url: String, reason: String },

    /// A storage command failed against the backend.
    #[error("{command} failed on '{key}': {reason}")]
    Command {
        command: &'static str,
        key: String,
        reason: String,
    },

    /// A key scan failed mid-cursor.
    #[error("scan failed for pattern '{pattern}': {reason}")]
    Scan { pattern: String, reason: String },
}
