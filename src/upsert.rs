//! Atomic insert-or-update of a session row.

use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, TransactionTrait};

use crate::dialect::UpsertStrategy;
use crate::error::Result;
use crate::table::SessionTable;

/// What a write did to the session row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The transactional path found no row and inserted one.
    Inserted,
    /// The transactional path found the row and updated it.
    Updated,
    /// A single-statement upsert ran; the driver reported `rows_affected`.
    Upserted { rows_affected: u64 },
}

/// Writes `payload` and `expires_at` for `sid`, creating or replacing the row.
///
/// Single-statement strategies are atomic on their own. The transactional
/// strategy locks the row with `SELECT ... FOR UPDATE` before deciding between
/// `INSERT` and `UPDATE`, so concurrent writers for one id serialize instead
/// of both inserting.
pub async fn upsert<C>(
    conn: &C,
    table: &SessionTable,
    strategy: UpsertStrategy,
    sid: &str,
    expires_at: DateTime<Utc>,
    payload: &str,
) -> Result<WriteOutcome>
where
    C: ConnectionTrait + TransactionTrait,
{
    if let Some(stmt) = table.upsert(strategy, sid, expires_at, payload) {
        let result = conn.execute(stmt).await?;
        return Ok(WriteOutcome::Upserted {
            rows_affected: result.rows_affected(),
        });
    }

    let txn = conn.begin().await?;

    let existing = txn.query_one(table.select_sid(sid, true)).await?;
    let outcome = match existing {
        None => {
            txn.execute(table.insert(sid, expires_at, payload)).await?;
            WriteOutcome::Inserted
        }
        Some(_) => {
            txn.execute(table.update(sid, expires_at, payload)).await?;
            WriteOutcome::Updated
        }
    };

    txn.commit().await?;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, Value};

    use super::*;
    use crate::dialect::Dialect;

    fn expires() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    fn exec_ok() -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: 1,
        }
    }

    #[tokio::test]
    async fn transactional_path_inserts_missing_row() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<BTreeMap<&str, Value>>::new()])
            .append_exec_results([exec_ok()])
            .into_connection();
        let table = SessionTable::new(Dialect::Oracle, DatabaseBackend::Postgres, "sessions", "sid");

        let outcome = upsert(&db, &table, UpsertStrategy::Transactional, "abc", expires(), "{}")
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Inserted);

        let log = db.into_transaction_log();
        assert_eq!(log.len(), 1);
        let rendered = format!("{log:?}");
        assert!(rendered.contains("FOR UPDATE"));
        assert!(rendered.contains("INSERT INTO"));
        assert!(!rendered.contains("UPDATE \\\"sessions\\\" SET"));
    }

    #[tokio::test]
    async fn transactional_path_updates_locked_row() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![BTreeMap::from([("sid", Value::from("abc"))])]])
            .append_exec_results([exec_ok()])
            .into_connection();
        let table = SessionTable::new(Dialect::Postgres, DatabaseBackend::Postgres, "sessions", "sid");

        let outcome = upsert(&db, &table, UpsertStrategy::Transactional, "abc", expires(), "{}")
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Updated);

        let rendered = format!("{:?}", db.into_transaction_log());
        assert!(rendered.contains("FOR UPDATE"));
        assert!(rendered.contains("UPDATE \\\"sessions\\\" SET"));
        assert!(!rendered.contains("INSERT INTO"));
    }

    #[tokio::test]
    async fn single_statement_strategies_skip_the_transaction() {
        let db = MockDatabase::new(DatabaseBackend::MySql)
            .append_exec_results([exec_ok()])
            .into_connection();
        let table = SessionTable::new(Dialect::Mssql, DatabaseBackend::MySql, "sessions", "sid");

        let outcome = upsert(&db, &table, UpsertStrategy::Merge, "abc", expires(), "{}")
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Upserted { rows_affected: 1 });

        let log = db.into_transaction_log();
        assert_eq!(log.len(), 1);
        let rendered = format!("{log:?}");
        assert!(rendered.contains("MERGE [sessions]"));
        assert!(!rendered.contains("FOR UPDATE"));
    }
}
