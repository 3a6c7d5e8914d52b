//! Lookup error types.

use thiserror::Error;

use crate::db::DatabaseError;

/// Errors from external lookups. Each carries the provider name so a
/// truncated fail reason still says which source broke.
#[derive(Error, Debug)]
pub enum LookupError {
    /// Transport failure, including timeouts.
    #[error("{provider} request failed: {message}")]
    Http {
        provider: &'static str,
        message: String,
    },

    /// Non-success HTTP status. `body` is already sanitized.
    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} response could not be decoded: {message}")]
    Decode {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} authentication failed: {message}")]
    Auth {
        provider: &'static str,
        message: String,
    },

    #[error("Credential error: {0}")]
    Credentials(#[from] crate::secrets::SecretError),

    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    #[error("Cache error: {0}")]
    Cache(#[from] DatabaseError),
}

pub type Result<T> = std::result::Result<T, LookupError>;
