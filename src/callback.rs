//! Adapter for callers that want completion callbacks instead of awaiting.

use std::future::Future;

use crate::error::{Result, StoreError};

/// Awaits `operation`, hands a borrowed view of its outcome to `callback`,
/// then returns the outcome to the awaiting caller as well.
///
/// ```no_run
/// use seaorm_session_store::{with_callback, SessionBackend, SqlSessionStore};
///
/// # async fn example(store: SqlSessionStore) {
/// let _ = with_callback(store.get("abc123"), |result| match result {
///     Ok(Some(session)) => println!("found {session:?}"),
///     Ok(None) => println!("no such session"),
///     Err(err) => eprintln!("lookup failed: {err}"),
/// })
/// .await;
/// # }
/// ```
pub async fn with_callback<T, Fut, F>(operation: Fut, callback: F) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
    F: FnOnce(Result<&T, &StoreError>),
{
    let result = operation.await;
    callback(result.as_ref());
    result
}
