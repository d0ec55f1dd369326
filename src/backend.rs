//! The store contract consumed by connect-style session middleware.

use async_trait::async_trait;

use crate::error::Result;
use crate::session::SessionData;

/// Operations a session middleware performs against its store.
///
/// Absent or expired sessions are reported as `Ok(None)`, never as errors.
#[async_trait]
pub trait SessionBackend: Send + Sync + 'static {
    /// Loads an unexpired session.
    async fn get(&self, sid: &str) -> Result<Option<SessionData>>;

    /// Creates or replaces a session. Its expiry is derived from
    /// `session.cookie.maxAge`, or one day when that is absent.
    async fn set(&self, sid: &str, session: &SessionData) -> Result<()>;

    /// Moves an unexpired session's expiry to `session.cookie.expires`
    /// without rewriting its data. A session without `expires` is left alone.
    ///
    /// Returns the number of rows updated.
    async fn touch(&self, sid: &str, session: &SessionData) -> Result<u64>;

    /// Deletes a session whether or not it has expired. Returns the number of
    /// rows removed (0 or 1).
    async fn destroy(&self, sid: &str) -> Result<u64>;

    /// Number of stored sessions, counting expired ones not yet swept.
    async fn length(&self) -> Result<u64>;

    /// Deletes every session. Returns the number of rows removed.
    async fn clear(&self) -> Result<u64>;

    /// Every unexpired session, in no particular order.
    async fn all(&self) -> Result<Vec<SessionData>>;
}
