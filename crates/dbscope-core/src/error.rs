//! Error types for dbscope.
//!
//! Most failures inside the engine degrade to partial results and a log line.
//! The variants here are the ones that do reach a caller: invalid user input,
//! an unusable export destination, cancellation, and a stale index.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the dbscope engine.
#[derive(Debug, Error)]
pub enum DbscopeError {
    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Export destination {path} is unavailable: {message}")]
    ExportDestination { path: PathBuf, message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Session errors
    #[error("Search index built from catalog generation {index_generation}, catalog is at {catalog_generation}")]
    StaleIndex {
        catalog_generation: u64,
        index_generation: u64,
    },

    #[error("Operation was cancelled")]
    Cancelled,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for dbscope operations.
pub type Result<T> = std::result::Result<T, DbscopeError>;

impl From<std::io::Error> for DbscopeError {
    fn from(err: std::io::Error) -> Self {
        DbscopeError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for DbscopeError {
    fn from(err: serde_json::Error) -> Self {
        DbscopeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for DbscopeError {
    fn from(err: rusqlite::Error) -> Self {
        DbscopeError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl DbscopeError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        DbscopeError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a validation error for a named input.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        DbscopeError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// True when the underlying SQLite error is a busy or locked database.
    pub fn is_lock_contention(&self) -> bool {
        match self {
            DbscopeError::Database {
                source: Some(err), ..
            } => is_lock_error(err),
            _ => false,
        }
    }

    /// True for errors caused by malformed caller input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DbscopeError::Validation { .. } | DbscopeError::InvalidIdentifier(_)
        )
    }
}

/// Check a raw rusqlite error for `SQLITE_BUSY` / `SQLITE_LOCKED`.
pub(crate) fn is_lock_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(inner, _) => matches!(
            inner.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}
