//! SQL dialect classification and per-dialect syntax.
//!
//! A connection is classified once into a [`Dialect`]. Everything that differs
//! between database engines (timestamp type names, expiration predicates,
//! bound timestamp formats, identifier quoting, placeholder style and the
//! preferred upsert statement) hangs off that enum, so callers never branch on
//! client identifier strings.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use sea_orm::{DbBackend, Value};

/// Database family a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Sqlite,
    /// MySQL and MariaDB.
    Mysql,
    Mssql,
    Postgres,
    Oracle,
    /// Anything else. Treated conservatively: text payloads, a plain
    /// `timestamp` column and transactional upserts.
    Unknown,
}

/// First MySQL release with a native `JSON` column type.
const MYSQL_JSON_SINCE: ServerVersion = ServerVersion::new(5, 7, 8);

/// First PostgreSQL release the single-statement CTE upsert is used on.
const POSTGRES_CTE_SINCE: ServerVersion = ServerVersion::new(9, 2, 0);

impl Dialect {
    /// Classifies a client/driver identifier.
    ///
    /// Matching is exact and case-sensitive; unrecognized identifiers map to
    /// [`Dialect::Unknown`].
    pub fn from_client(client: &str) -> Self {
        match client {
            "sqlite3" | "sqlite" | "better-sqlite3" => Dialect::Sqlite,
            "mysql" | "mysql2" | "mariasql" | "mariadb" => Dialect::Mysql,
            "mssql" => Dialect::Mssql,
            "postgresql" | "postgres" | "pg" => Dialect::Postgres,
            "oracle" | "oracledb" => Dialect::Oracle,
            _ => Dialect::Unknown,
        }
    }

    /// The dialect implied by a SeaORM backend.
    pub fn from_backend(backend: DbBackend) -> Self {
        match backend {
            DbBackend::Sqlite => Dialect::Sqlite,
            DbBackend::MySql => Dialect::Mysql,
            DbBackend::Postgres => Dialect::Postgres,
        }
    }

    /// Whether the dialect has a native JSON column type.
    ///
    /// For MySQL this depends on the server version; an unknown version is
    /// assumed not to support it.
    pub fn supports_json(self, version: Option<ServerVersion>) -> bool {
        match self {
            Dialect::Mssql | Dialect::Unknown => false,
            Dialect::Mysql => version.is_some_and(|v| v >= MYSQL_JSON_SINCE),
            Dialect::Sqlite | Dialect::Postgres | Dialect::Oracle => true,
        }
    }

    /// Column type used for the `expired` column.
    pub fn timestamp_type(self) -> &'static str {
        match self {
            Dialect::Mysql | Dialect::Mssql => "DATETIME",
            Dialect::Postgres => "timestamp with time zone",
            Dialect::Sqlite | Dialect::Oracle | Dialect::Unknown => "timestamp",
        }
    }

    /// Whether this dialect needs the server version to pick its behavior.
    pub fn needs_server_version(self) -> bool {
        matches!(self, Dialect::Mysql | Dialect::Postgres)
    }

    /// Query returning the server version in a `server_version` column.
    pub(crate) fn server_version_query(self) -> Option<&'static str> {
        match self {
            Dialect::Mysql => Some("SELECT version() AS server_version"),
            Dialect::Postgres => Some("SHOW server_version"),
            _ => None,
        }
    }

    /// Picks the upsert statement shape for this dialect.
    pub fn upsert_strategy(self, version: Option<ServerVersion>) -> UpsertStrategy {
        match self {
            Dialect::Sqlite => UpsertStrategy::InsertOrReplace,
            Dialect::Postgres if version.is_some_and(|v| v >= POSTGRES_CTE_SINCE) => {
                UpsertStrategy::WritableCte
            }
            Dialect::Mysql => UpsertStrategy::OnDuplicateKey,
            Dialect::Mssql => UpsertStrategy::Merge,
            Dialect::Postgres | Dialect::Oracle | Dialect::Unknown => UpsertStrategy::Transactional,
        }
    }

    /// Earliest and latest instants the dialect's `expired` column can hold.
    pub fn timestamp_range(self) -> (DateTime<Utc>, DateTime<Utc>) {
        // 0001-01-01, 1000-01-01 and 1753-01-01 at midnight UTC.
        let floor_secs = match self {
            Dialect::Mysql => -30_610_224_000,
            Dialect::Mssql => -6_847_804_800,
            _ => -62_135_596_800,
        };
        // 9999-12-31T23:59:59Z
        let ceiling_secs = 253_402_300_799;

        (
            DateTime::from_timestamp(floor_secs, 0).unwrap_or(DateTime::<Utc>::MIN_UTC),
            DateTime::from_timestamp(ceiling_secs, 0).unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }

    /// Pulls `at` into [`Dialect::timestamp_range`].
    pub fn clamp_timestamp(self, at: DateTime<Utc>) -> DateTime<Utc> {
        let (floor, ceiling) = self.timestamp_range();
        at.clamp(floor, ceiling)
    }

    /// Normalizes a point in time into the value bound for `expired`,
    /// clamped to what the column can store.
    pub fn format_timestamp(self, at: DateTime<Utc>) -> TimestampParam {
        let at = self.clamp_timestamp(at);
        match self {
            Dialect::Oracle => TimestampParam::Native(at),
            Dialect::Mysql | Dialect::Mssql => {
                TimestampParam::Text(at.format("%Y-%m-%d %H:%M:%S").to_string())
            }
            Dialect::Sqlite | Dialect::Postgres | Dialect::Unknown => {
                TimestampParam::Text(at.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
        }
    }

    /// [`Dialect::format_timestamp`] applied to the current time.
    pub fn format_now(self) -> TimestampParam {
        self.format_timestamp(Utc::now())
    }

    /// Quotes an identifier, doubling any embedded quote characters.
    pub fn quote_identifier(self, ident: &str) -> String {
        match self {
            Dialect::Mysql => format!("`{}`", ident.replace('`', "``")),
            Dialect::Mssql => format!("[{}]", ident.replace(']', "]]")),
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Placeholder text for the `n`th (1-based) bound parameter.
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${n}"),
            Dialect::Mssql => format!("@P{n}"),
            Dialect::Oracle => format!(":{n}"),
            Dialect::Sqlite | Dialect::Mysql | Dialect::Unknown => "?".to_owned(),
        }
    }

    /// Wraps a timestamp placeholder so it is compared or assigned as the
    /// column's timestamp type.
    pub fn cast_timestamp(self, param: &str) -> String {
        match self {
            Dialect::Sqlite => param.to_owned(),
            _ => format!("CAST({param} AS {})", self.timestamp_type()),
        }
    }

    /// Predicate that holds while the row is still valid, i.e. the stored
    /// expiry is at or after the bound `now` parameter.
    pub fn unexpired_predicate(self, column: &str, param: &str) -> String {
        match self {
            Dialect::Sqlite => format!("datetime({param}) <= datetime({column})"),
            _ => format!("{} <= {column}", self.cast_timestamp(param)),
        }
    }

    /// Predicate that holds once the stored expiry lies before `now`.
    pub fn expired_predicate(self, column: &str, param: &str) -> String {
        match self {
            Dialect::Sqlite => format!("datetime({column}) < datetime({param})"),
            _ => format!("{column} < {}", self.cast_timestamp(param)),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Mysql => "mysql",
            Dialect::Mssql => "mssql",
            Dialect::Postgres => "postgres",
            Dialect::Oracle => "oracle",
            Dialect::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// How a dialect writes a session row atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStrategy {
    /// `INSERT OR REPLACE` (SQLite).
    InsertOrReplace,
    /// `WITH ... UPDATE ... RETURNING` falling through to `INSERT ... WHERE NOT EXISTS` (PostgreSQL).
    WritableCte,
    /// `INSERT ... ON DUPLICATE KEY UPDATE` (MySQL family).
    OnDuplicateKey,
    /// `MERGE ... OUTPUT INSERTED.*` (SQL Server).
    Merge,
    /// Transaction with `SELECT ... FOR UPDATE`, then `INSERT` or `UPDATE`.
    Transactional,
}

impl UpsertStrategy {
    /// Whether the write is a single statement.
    pub fn is_single_statement(self) -> bool {
        !matches!(self, UpsertStrategy::Transactional)
    }
}

/// A timestamp in the form a dialect expects as a bound parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampParam {
    Text(String),
    Native(DateTime<Utc>),
}

impl From<TimestampParam> for Value {
    fn from(param: TimestampParam) -> Self {
        match param {
            TimestampParam::Text(text) => text.into(),
            TimestampParam::Native(at) => at.into(),
        }
    }
}

/// A `major.minor.patch` database server version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Extracts the first dotted version number from a version banner such as
    /// `8.0.32-0ubuntu0.22.04.2`, `10.11.2-MariaDB` or
    /// `PostgreSQL 15.2 (Debian 15.2-1.pgdg110+1)`. Missing components are 0.
    pub fn parse(banner: &str) -> Option<Self> {
        let start = banner.find(|c: char| c.is_ascii_digit())?;
        let rest = &banner[start..];
        let end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());

        let mut parts = rest[..end]
            .split('.')
            .filter(|part| !part.is_empty())
            .map(str::parse::<u32>);
        let major = parts.next()?.ok()?;
        let minor = parts.next().and_then(|p| p.ok()).unwrap_or(0);
        let patch = parts.next().and_then(|p| p.ok()).unwrap_or(0);
        Some(Self::new(major, minor, patch))
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap() + chrono::Duration::milliseconds(250)
    }

    #[test]
    fn classifies_client_identifiers() {
        assert_eq!(Dialect::from_client("sqlite3"), Dialect::Sqlite);
        assert_eq!(Dialect::from_client("mariadb"), Dialect::Mysql);
        assert_eq!(Dialect::from_client("mysql2"), Dialect::Mysql);
        assert_eq!(Dialect::from_client("mssql"), Dialect::Mssql);
        assert_eq!(Dialect::from_client("postgresql"), Dialect::Postgres);
        assert_eq!(Dialect::from_client("oracledb"), Dialect::Oracle);
        assert_eq!(Dialect::from_client("cockroachdb"), Dialect::Unknown);
        // Case-sensitive on purpose.
        assert_eq!(Dialect::from_client("MySQL"), Dialect::Unknown);
    }

    #[test]
    fn classifies_seaorm_backends() {
        assert_eq!(Dialect::from_backend(DbBackend::Sqlite), Dialect::Sqlite);
        assert_eq!(Dialect::from_backend(DbBackend::MySql), Dialect::Mysql);
        assert_eq!(Dialect::from_backend(DbBackend::Postgres), Dialect::Postgres);
    }

    #[test]
    fn json_support() {
        assert!(!Dialect::Mssql.supports_json(None));
        assert!(!Dialect::Unknown.supports_json(None));
        assert!(Dialect::Sqlite.supports_json(None));
        assert!(Dialect::Postgres.supports_json(None));
        assert!(Dialect::Oracle.supports_json(None));

        assert!(!Dialect::Mysql.supports_json(None));
        assert!(!Dialect::Mysql.supports_json(ServerVersion::parse("5.7.7")));
        assert!(Dialect::Mysql.supports_json(ServerVersion::parse("5.7.8-log")));
        assert!(Dialect::Mysql.supports_json(ServerVersion::parse("8.0.32")));
        assert!(Dialect::Mysql.supports_json(ServerVersion::parse("10.11.2-MariaDB")));
        assert!(!Dialect::Mysql.supports_json(ServerVersion::parse("5.6.51")));
    }

    #[test]
    fn timestamp_type_names() {
        assert_eq!(Dialect::Mysql.timestamp_type(), "DATETIME");
        assert_eq!(Dialect::Mssql.timestamp_type(), "DATETIME");
        assert_eq!(Dialect::Postgres.timestamp_type(), "timestamp with time zone");
        assert_eq!(Dialect::Sqlite.timestamp_type(), "timestamp");
        assert_eq!(Dialect::Unknown.timestamp_type(), "timestamp");
    }

    #[test]
    fn formats_timestamps_per_dialect() {
        assert_eq!(
            Dialect::Sqlite.format_timestamp(at()),
            TimestampParam::Text("2024-03-09T14:05:07.250Z".into())
        );
        assert_eq!(
            Dialect::Postgres.format_timestamp(at()),
            TimestampParam::Text("2024-03-09T14:05:07.250Z".into())
        );
        assert_eq!(
            Dialect::Mysql.format_timestamp(at()),
            TimestampParam::Text("2024-03-09 14:05:07".into())
        );
        assert_eq!(
            Dialect::Mssql.format_timestamp(at()),
            TimestampParam::Text("2024-03-09 14:05:07".into())
        );
        assert_eq!(Dialect::Oracle.format_timestamp(at()), TimestampParam::Native(at()));
    }

    #[test]
    fn out_of_range_timestamps_are_clamped() {
        assert_eq!(
            Dialect::Sqlite.format_timestamp(DateTime::<Utc>::MAX_UTC),
            TimestampParam::Text("9999-12-31T23:59:59.000Z".into())
        );
        assert_eq!(
            Dialect::Sqlite.format_timestamp(DateTime::<Utc>::MIN_UTC),
            TimestampParam::Text("0001-01-01T00:00:00.000Z".into())
        );
        assert_eq!(
            Dialect::Mysql.format_timestamp(DateTime::<Utc>::MAX_UTC),
            TimestampParam::Text("9999-12-31 23:59:59".into())
        );
        assert_eq!(
            Dialect::Mysql.format_timestamp(DateTime::<Utc>::MIN_UTC),
            TimestampParam::Text("1000-01-01 00:00:00".into())
        );
        assert_eq!(
            Dialect::Mssql.format_timestamp(DateTime::<Utc>::MIN_UTC),
            TimestampParam::Text("1753-01-01 00:00:00".into())
        );
        // In-range values pass through untouched.
        assert_eq!(Dialect::Postgres.clamp_timestamp(at()), at());
    }

    #[test]
    fn expiration_predicates() {
        assert_eq!(
            Dialect::Sqlite.unexpired_predicate("\"expired\"", "?"),
            "datetime(?) <= datetime(\"expired\")"
        );
        assert_eq!(
            Dialect::Sqlite.expired_predicate("\"expired\"", "?"),
            "datetime(\"expired\") < datetime(?)"
        );
        assert_eq!(
            Dialect::Postgres.unexpired_predicate("\"expired\"", "$2"),
            "CAST($2 AS timestamp with time zone) <= \"expired\""
        );
        assert_eq!(
            Dialect::Mysql.expired_predicate("`expired`", "?"),
            "`expired` < CAST(? AS DATETIME)"
        );
        assert_eq!(
            Dialect::Oracle.unexpired_predicate("\"expired\"", ":1"),
            "CAST(:1 AS timestamp) <= \"expired\""
        );
    }

    #[test]
    fn upsert_strategies() {
        let pg_old = ServerVersion::parse("9.1.24");
        let pg_new = ServerVersion::parse("PostgreSQL 9.10.3");
        assert_eq!(Dialect::Sqlite.upsert_strategy(None), UpsertStrategy::InsertOrReplace);
        assert_eq!(Dialect::Postgres.upsert_strategy(pg_new), UpsertStrategy::WritableCte);
        assert_eq!(Dialect::Postgres.upsert_strategy(pg_old), UpsertStrategy::Transactional);
        assert_eq!(Dialect::Postgres.upsert_strategy(None), UpsertStrategy::Transactional);
        assert_eq!(Dialect::Mysql.upsert_strategy(None), UpsertStrategy::OnDuplicateKey);
        assert_eq!(Dialect::Mssql.upsert_strategy(None), UpsertStrategy::Merge);
        assert_eq!(Dialect::Oracle.upsert_strategy(None), UpsertStrategy::Transactional);
        assert_eq!(Dialect::Unknown.upsert_strategy(None), UpsertStrategy::Transactional);
        assert!(!UpsertStrategy::Transactional.is_single_statement());
    }

    #[test]
    fn quoting_and_placeholders() {
        assert_eq!(Dialect::Postgres.quote_identifier("se\"ss"), "\"se\"\"ss\"");
        assert_eq!(Dialect::Mysql.quote_identifier("sid"), "`sid`");
        assert_eq!(Dialect::Mssql.quote_identifier("sid"), "[sid]");
        assert_eq!(Dialect::Postgres.placeholder(3), "$3");
        assert_eq!(Dialect::Mssql.placeholder(1), "@P1");
        assert_eq!(Dialect::Oracle.placeholder(2), ":2");
        assert_eq!(Dialect::Sqlite.placeholder(2), "?");
    }

    #[test]
    fn parses_version_banners() {
        assert_eq!(ServerVersion::parse("8.0.32-0ubuntu0.22.04.2"), Some(ServerVersion::new(8, 0, 32)));
        assert_eq!(
            ServerVersion::parse("PostgreSQL 15.2 (Debian 15.2-1.pgdg110+1)"),
            Some(ServerVersion::new(15, 2, 0))
        );
        assert_eq!(ServerVersion::parse("16"), Some(ServerVersion::new(16, 0, 0)));
        assert_eq!(ServerVersion::parse("no digits here"), None);
        assert_eq!(ServerVersion::new(5, 7, 8).to_string(), "5.7.8");
    }
}
