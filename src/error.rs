//! Error types for the session store.

use std::sync::Arc;

use sea_orm::DbErr;
use tower_sessions::session_store;

/// Result alias used throughout the crate.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Errors surfaced by [`SqlSessionStore`](crate::SqlSessionStore) operations.
///
/// An absent session is never an error: reads return `Ok(None)` instead.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The session table does not exist and automatic creation is disabled.
    ///
    /// Raised once during bootstrap and then reported by every operation
    /// through [`StoreError::NotReady`].
    #[error("session table `{0}` does not exist and automatic table creation is disabled")]
    SchemaMissing(String),

    /// The database (or the connection pool in front of it) failed.
    #[error("database error: {0}")]
    Database(#[from] DbErr),

    /// A session payload could not be serialized to JSON.
    #[error("failed to encode session payload: {0}")]
    Encode(#[source] serde_json::Error),

    /// A stored `sess` value is not a valid session payload.
    #[error("malformed session payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    /// Schema bootstrap failed earlier; the store cannot serve requests.
    #[error("session store is not ready: {0}")]
    NotReady(#[source] Arc<StoreError>),
}

impl StoreError {
    /// Returns the bootstrap failure behind a [`StoreError::NotReady`], or
    /// `self` for any other variant.
    pub fn root(&self) -> &StoreError {
        match self {
            StoreError::NotReady(inner) => inner.root(),
            other => other,
        }
    }
}

impl From<StoreError> for session_store::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Encode(e) => session_store::Error::Encode(e.to_string()),
            StoreError::MalformedPayload(e) => session_store::Error::Decode(e.to_string()),
            other => session_store::Error::Backend(other.to_string()),
        }
    }
}
