//! Error types for tablesync

use thiserror::Error;

/// Result type alias for tablesync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for tablesync
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema fetch failed: {0}")]
    SchemaFetch(String),

    #[error("Record fetch failed: {0}")]
    RecordFetch(String),

    #[error("Remote API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Sheet error: {0}")]
    Sheet(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
}

impl SyncError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Api { status, .. } => Some(*status),
            SyncError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Errors that must stop a run before any create/update/delete is sent.
    ///
    /// An aborted fetch leaves the remote state unknown, so nothing may be
    /// mutated on top of it.
    pub fn is_fatal_before_mutation(&self) -> bool {
        matches!(
            self,
            SyncError::Config(_)
                | SyncError::SchemaFetch(_)
                | SyncError::RecordFetch(_)
                | SyncError::Sheet(_)
        )
    }

    /// Short machine-friendly kind, used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Config(_) => "config",
            SyncError::SchemaFetch(_) => "schema_fetch",
            SyncError::RecordFetch(_) => "record_fetch",
            SyncError::Api { .. } => "api",
            SyncError::Sheet(_) => "sheet",
            SyncError::InvalidInput(_) => "invalid_input",
            SyncError::Serialization(_) => "serialization",
            SyncError::Io(_) => "io",
            SyncError::Http(_) => "http",
        }
    }
}
