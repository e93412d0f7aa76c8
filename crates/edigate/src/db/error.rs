//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored value could not be decoded.
    #[error("Invalid value '{value}' in column {column}: {reason}")]
    InvalidValue {
        column: &'static str,
        value: String,
        reason: String,
    },

    /// JSON stored in a column could not be (de)serialized.
    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,
}
