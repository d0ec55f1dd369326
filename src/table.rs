//! Statement rendering for the session table.
//!
//! Table and column names are configurable at runtime, so statements are
//! rendered as raw SQL with quoted identifiers and every value bound as a
//! parameter.

use chrono::{DateTime, Utc};
use sea_orm::{DbBackend, Statement, Value};

use crate::dialect::{Dialect, UpsertStrategy};

/// Name of the payload column.
pub const SESS_COLUMN: &str = "sess";

/// Name of the expiration column.
pub const EXPIRED_COLUMN: &str = "expired";

/// Alias of the count column returned by [`SessionTable::count`].
pub(crate) const COUNT_ALIAS: &str = "session_count";

/// Hands out placeholders in bind order.
struct Params {
    dialect: Dialect,
    next: usize,
}

impl Params {
    fn new(dialect: Dialect) -> Self {
        Self { dialect, next: 0 }
    }

    fn next(&mut self) -> String {
        self.next += 1;
        self.dialect.placeholder(self.next)
    }
}

/// A session table on a particular dialect.
#[derive(Debug, Clone)]
pub struct SessionTable {
    dialect: Dialect,
    backend: DbBackend,
    name: String,
    sid_column: String,
}

impl SessionTable {
    pub fn new(
        dialect: Dialect,
        backend: DbBackend,
        name: impl Into<String>,
        sid_column: impl Into<String>,
    ) -> Self {
        Self {
            dialect,
            backend,
            name: name.into(),
            sid_column: sid_column.into(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sid_column(&self) -> &str {
        &self.sid_column
    }

    fn table(&self) -> String {
        self.dialect.quote_identifier(&self.name)
    }

    fn sid(&self) -> String {
        self.dialect.quote_identifier(&self.sid_column)
    }

    fn sess(&self) -> String {
        self.dialect.quote_identifier(SESS_COLUMN)
    }

    fn expired(&self) -> String {
        self.dialect.quote_identifier(EXPIRED_COLUMN)
    }

    fn timestamp(&self, at: DateTime<Utc>) -> Value {
        self.dialect.format_timestamp(at).into()
    }

    fn statement(&self, sql: String, values: Vec<Value>) -> Statement {
        Statement::from_sql_and_values(self.backend, sql.as_str(), values)
    }

    /// Renders the single-statement upsert for `strategy`.
    ///
    /// Returns `None` for [`UpsertStrategy::Transactional`], which needs
    /// [`SessionTable::select_sid`], [`SessionTable::insert`] and
    /// [`SessionTable::update`] inside a transaction instead.
    pub fn upsert(
        &self,
        strategy: UpsertStrategy,
        sid: &str,
        expires_at: DateTime<Utc>,
        payload: &str,
    ) -> Option<Statement> {
        let (table, sid_col, sess, expired) = (self.table(), self.sid(), self.sess(), self.expired());
        let mut p = Params::new(self.dialect);
        let (p1, p2, p3) = (p.next(), p.next(), p.next());

        let sql = match strategy {
            UpsertStrategy::InsertOrReplace => format!(
                "INSERT OR REPLACE INTO {table} ({sid_col}, {expired}, {sess}) VALUES ({p1}, {p2}, {p3})"
            ),
            UpsertStrategy::WritableCte => format!(
                "WITH new_values ({sid_col}, {expired}, {sess}) AS (\
                 VALUES ({p1}, {p2}::timestamp with time zone, {p3}::json)\
                 ), upsert AS (\
                 UPDATE {table} cs SET {expired} = nv.{expired}, {sess} = nv.{sess} \
                 FROM new_values nv WHERE cs.{sid_col} = nv.{sid_col} RETURNING cs.*\
                 ) \
                 INSERT INTO {table} ({sid_col}, {expired}, {sess}) \
                 SELECT {sid_col}, {expired}, {sess} FROM new_values \
                 WHERE NOT EXISTS (SELECT 1 FROM upsert up WHERE up.{sid_col} = new_values.{sid_col})"
            ),
            UpsertStrategy::OnDuplicateKey => format!(
                "INSERT INTO {table} ({sid_col}, {expired}, {sess}) VALUES ({p1}, {p2}, {p3}) \
                 ON DUPLICATE KEY UPDATE {expired} = VALUES({expired}), {sess} = VALUES({sess})"
            ),
            UpsertStrategy::Merge => format!(
                "MERGE {table} AS T USING (VALUES ({p1}, {p2}, {p3})) AS S ({sid_col}, {expired}, {sess}) \
                 ON (T.{sid_col} = S.{sid_col}) \
                 WHEN MATCHED THEN UPDATE SET {expired} = S.{expired}, {sess} = S.{sess} \
                 WHEN NOT MATCHED BY TARGET THEN INSERT ({sid_col}, {expired}, {sess}) \
                 VALUES (S.{sid_col}, S.{expired}, S.{sess}) \
                 OUTPUT INSERTED.*;"
            ),
            UpsertStrategy::Transactional => return None,
        };

        Some(self.statement(
            sql,
            vec![sid.into(), self.timestamp(expires_at), payload.into()],
        ))
    }

    /// Selects the id of the row for `sid`, expired or not, optionally taking
    /// a row lock.
    pub fn select_sid(&self, sid: &str, for_update: bool) -> Statement {
        let mut p = Params::new(self.dialect);
        let mut sql = format!(
            "SELECT {sid_col} FROM {table} WHERE {sid_col} = {p1}",
            sid_col = self.sid(),
            table = self.table(),
            p1 = p.next(),
        );
        if for_update {
            sql.push_str(" FOR UPDATE");
        }
        self.statement(sql, vec![sid.into()])
    }

    /// Wraps the payload parameter so PostgreSQL accepts text for a json column.
    fn payload_param(&self, param: String) -> String {
        match self.dialect {
            Dialect::Postgres => format!("{param}::json"),
            _ => param,
        }
    }

    pub fn insert(&self, sid: &str, expires_at: DateTime<Utc>, payload: &str) -> Statement {
        let mut p = Params::new(self.dialect);
        let (p1, p2, p3) = (p.next(), p.next(), p.next());
        let sql = format!(
            "INSERT INTO {table} ({sid_col}, {expired}, {sess}) VALUES ({p1}, {expires}, {payload})",
            table = self.table(),
            sid_col = self.sid(),
            expired = self.expired(),
            sess = self.sess(),
            expires = self.dialect.cast_timestamp(&p2),
            payload = self.payload_param(p3),
        );
        self.statement(
            sql,
            vec![sid.into(), self.timestamp(expires_at), payload.into()],
        )
    }

    pub fn update(&self, sid: &str, expires_at: DateTime<Utc>, payload: &str) -> Statement {
        let mut p = Params::new(self.dialect);
        let (p1, p2, p3) = (p.next(), p.next(), p.next());
        let sql = format!(
            "UPDATE {table} SET {expired} = {expires}, {sess} = {payload} WHERE {sid_col} = {p3}",
            table = self.table(),
            sid_col = self.sid(),
            expired = self.expired(),
            sess = self.sess(),
            expires = self.dialect.cast_timestamp(&p1),
            payload = self.payload_param(p2),
        );
        self.statement(
            sql,
            vec![self.timestamp(expires_at), payload.into(), sid.into()],
        )
    }

    /// Selects the payload of `sid` if it has not expired at `now`.
    pub fn select_one(&self, sid: &str, now: DateTime<Utc>) -> Statement {
        let mut p = Params::new(self.dialect);
        let (p1, p2) = (p.next(), p.next());
        let sql = format!(
            "SELECT {sess} FROM {table} WHERE {sid_col} = {p1} AND {unexpired}",
            sess = self.sess(),
            table = self.table(),
            sid_col = self.sid(),
            unexpired = self.dialect.unexpired_predicate(&self.expired(), &p2),
        );
        self.statement(sql, vec![sid.into(), self.timestamp(now)])
    }

    /// Selects every payload that has not expired at `now`.
    pub fn select_all(&self, now: DateTime<Utc>) -> Statement {
        let mut p = Params::new(self.dialect);
        let sql = format!(
            "SELECT {sess} FROM {table} WHERE {unexpired}",
            sess = self.sess(),
            table = self.table(),
            unexpired = self.dialect.unexpired_predicate(&self.expired(), &p.next()),
        );
        self.statement(sql, vec![self.timestamp(now)])
    }

    /// Counts all rows, expired ones included.
    pub fn count(&self) -> Statement {
        let sql = format!(
            "SELECT COUNT({sid_col}) AS {COUNT_ALIAS} FROM {table}",
            sid_col = self.sid(),
            table = self.table(),
        );
        self.statement(sql, Vec::new())
    }

    pub fn delete_one(&self, sid: &str) -> Statement {
        let mut p = Params::new(self.dialect);
        let sql = format!(
            "DELETE FROM {table} WHERE {sid_col} = {p1}",
            table = self.table(),
            sid_col = self.sid(),
            p1 = p.next(),
        );
        self.statement(sql, vec![sid.into()])
    }

    pub fn delete_all(&self) -> Statement {
        self.statement(format!("DELETE FROM {}", self.table()), Vec::new())
    }

    /// Moves the expiry of an unexpired row to `expires`, leaving `sess` alone.
    pub fn touch(&self, sid: &str, expires: DateTime<Utc>, now: DateTime<Utc>) -> Statement {
        let mut p = Params::new(self.dialect);
        let (p1, p2, p3) = (p.next(), p.next(), p.next());
        let sql = format!(
            "UPDATE {table} SET {expired} = {expires} WHERE {sid_col} = {p2} AND {unexpired}",
            table = self.table(),
            expired = self.expired(),
            expires = self.dialect.cast_timestamp(&p1),
            sid_col = self.sid(),
            unexpired = self.dialect.unexpired_predicate(&self.expired(), &p3),
        );
        self.statement(
            sql,
            vec![self.timestamp(expires), sid.into(), self.timestamp(now)],
        )
    }

    /// Deletes every row that had expired by `now`.
    pub fn delete_expired(&self, now: DateTime<Utc>) -> Statement {
        let mut p = Params::new(self.dialect);
        let sql = format!(
            "DELETE FROM {table} WHERE {expired}",
            table = self.table(),
            expired = self.dialect.expired_predicate(&self.expired(), &p.next()),
        );
        self.statement(sql, vec![self.timestamp(now)])
    }
}
