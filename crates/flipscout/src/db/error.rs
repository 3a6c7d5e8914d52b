use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database directory could not be created.
    #[error("Cannot prepare database directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema migration {version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A decimal, date or JSON column held text that does not parse.
    #[error("Unreadable value in column '{column}': {reason}")]
    CorruptValue { column: String, reason: String },

    /// The configured cache lifetime pushes the expiry past the supported
    /// date range.
    #[error("Cache lifetime of {ttl_seconds}s overflows the expiry of '{key}'")]
    ExpiryOutOfRange { key: String, ttl_seconds: u64 },

    /// Another thread panicked while holding the connection.
    #[error("Database connection lock poisoned")]
    LockPoisoned,
}
