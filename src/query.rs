//! Reads, counts and deletes against the session table.
//!
//! Reads apply the dialect's expiration predicate so expired rows stay
//! invisible until they are swept. Deletes and the count do not.

use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, DbErr, QueryResult};
use serde_json::Value as Json;

use crate::error::{Result, StoreError};
use crate::session::{SessionData, StoredPayload};
use crate::table::{SessionTable, COUNT_ALIAS, SESS_COLUMN};

/// Extracts the `sess` column as text, or as native JSON where the column
/// type demands it.
fn stored_payload(row: &QueryResult) -> Result<StoredPayload> {
    let text_err = match row.try_get::<String>("", SESS_COLUMN) {
        Ok(text) => return Ok(StoredPayload::Text(text)),
        Err(err) => err,
    };
    row.try_get::<Json>("", SESS_COLUMN)
        .map(StoredPayload::Json)
        .map_err(|json_err| {
            StoreError::Database(DbErr::Type(format!(
                "`{SESS_COLUMN}` column is neither text ({text_err}) nor JSON ({json_err})"
            )))
        })
}

/// Loads the unexpired session `sid`.
pub async fn fetch_one<C: ConnectionTrait>(
    conn: &C,
    table: &SessionTable,
    sid: &str,
    now: DateTime<Utc>,
) -> Result<Option<SessionData>> {
    match conn.query_one(table.select_one(sid, now)).await? {
        Some(row) => stored_payload(&row)?.decode().map(Some),
        None => Ok(None),
    }
}

/// Loads every unexpired session, in no particular order.
pub async fn fetch_all<C: ConnectionTrait>(
    conn: &C,
    table: &SessionTable,
    now: DateTime<Utc>,
) -> Result<Vec<SessionData>> {
    conn.query_all(table.select_all(now))
        .await?
        .iter()
        .map(|row| stored_payload(row)?.decode())
        .collect()
}

/// Whether a row for `sid` exists, expired or not.
pub async fn exists<C: ConnectionTrait>(conn: &C, table: &SessionTable, sid: &str) -> Result<bool> {
    Ok(conn.query_one(table.select_sid(sid, false)).await?.is_some())
}

/// Number of rows in the table, including expired rows not yet swept.
pub async fn count<C: ConnectionTrait>(conn: &C, table: &SessionTable) -> Result<u64> {
    let count = match conn.query_one(table.count()).await? {
        Some(row) => row.try_get::<i64>("", COUNT_ALIAS)?,
        None => 0,
    };
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Moves the expiry of the unexpired session `sid` to `expires`.
pub async fn touch<C: ConnectionTrait>(
    conn: &C,
    table: &SessionTable,
    sid: &str,
    expires: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = conn.execute(table.touch(sid, expires, now)).await?;
    Ok(result.rows_affected())
}

pub async fn delete_one<C: ConnectionTrait>(conn: &C, table: &SessionTable, sid: &str) -> Result<u64> {
    let result = conn.execute(table.delete_one(sid)).await?;
    Ok(result.rows_affected())
}

pub async fn delete_all<C: ConnectionTrait>(conn: &C, table: &SessionTable) -> Result<u64> {
    let result = conn.execute(table.delete_all()).await?;
    Ok(result.rows_affected())
}

/// Physically removes every row that had expired by `now`.
pub async fn delete_expired<C: ConnectionTrait>(
    conn: &C,
    table: &SessionTable,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = conn.execute(table.delete_expired(now)).await?;
    Ok(result.rows_affected())
}
