//! Connection probing and session table bootstrap.

use sea_orm::{ConnectionTrait, DatabaseConnection, Statement};
use sea_orm_migration::prelude::{Alias, ColumnDef, Index, SchemaManager, Table};

use crate::config::SessionStoreConfig;
use crate::dialect::{Dialect, ServerVersion, UpsertStrategy};
use crate::error::{Result, StoreError};
use crate::table::{SessionTable, EXPIRED_COLUMN, SESS_COLUMN};

/// What the store learned about its connection during bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub dialect: Dialect,
    /// Server version, when the dialect needs one and it could be determined.
    pub server_version: Option<ServerVersion>,
}

impl Capabilities {
    pub fn new(dialect: Dialect, server_version: Option<ServerVersion>) -> Self {
        Self {
            dialect,
            server_version,
        }
    }

    /// Classifies `conn` and, for dialects whose behavior depends on it,
    /// determines the server version.
    ///
    /// A configured `client` overrides the identifier implied by the SeaORM
    /// backend and a configured `client_version` replaces the version query.
    pub async fn probe(conn: &DatabaseConnection, config: &SessionStoreConfig) -> Result<Self> {
        let dialect = config
            .client
            .as_deref()
            .map(Dialect::from_client)
            .unwrap_or_else(|| Dialect::from_backend(conn.get_database_backend()));

        let server_version = match config.client_version.as_deref() {
            Some(version) => ServerVersion::parse(version),
            None if dialect.needs_server_version() => query_server_version(conn, dialect).await?,
            None => None,
        };

        tracing::debug!(
            %dialect,
            server_version = ?server_version.map(|v| v.to_string()),
            "probed session store connection"
        );

        Ok(Self::new(dialect, server_version))
    }

    pub fn supports_json(&self) -> bool {
        self.dialect.supports_json(self.server_version)
    }

    pub fn upsert_strategy(&self) -> UpsertStrategy {
        self.dialect.upsert_strategy(self.server_version)
    }
}

async fn query_server_version(
    conn: &DatabaseConnection,
    dialect: Dialect,
) -> Result<Option<ServerVersion>> {
    let Some(sql) = dialect.server_version_query() else {
        return Ok(None);
    };

    let row = conn
        .query_one(Statement::from_string(conn.get_database_backend(), sql))
        .await?;
    let banner = match row {
        Some(row) => row.try_get::<String>("", "server_version")?,
        None => return Ok(None),
    };

    let version = ServerVersion::parse(&banner);
    if version.is_none() {
        tracing::warn!(%banner, "could not parse database server version");
    }
    Ok(version)
}

/// Makes sure the session table exists.
///
/// Returns `true` when the table was already there. When it is missing and
/// `create_table` is off, fails with [`StoreError::SchemaMissing`].
pub async fn ensure_schema(
    conn: &DatabaseConnection,
    capabilities: &Capabilities,
    table: &SessionTable,
    create_table: bool,
) -> Result<bool> {
    let manager = SchemaManager::new(conn);

    if manager.has_table(table.name()).await? {
        return Ok(true);
    }

    if !create_table {
        return Err(StoreError::SchemaMissing(table.name().to_owned()));
    }

    let mut sess = ColumnDef::new(Alias::new(SESS_COLUMN));
    if capabilities.supports_json() {
        sess.json();
    } else {
        sess.text();
    }
    sess.not_null();

    manager
        .create_table(
            Table::create()
                .table(Alias::new(table.name()))
                .if_not_exists()
                .col(
                    ColumnDef::new(Alias::new(table.sid_column()))
                        .string_len(255)
                        .not_null()
                        .primary_key(),
                )
                .col(&mut sess)
                .col(
                    ColumnDef::new(Alias::new(EXPIRED_COLUMN))
                        .custom(Alias::new(capabilities.dialect.timestamp_type()))
                        .not_null(),
                )
                .to_owned(),
        )
        .await?;

    let mut index = Index::create();
    index
        .name(format!("{}_{}_index", table.name(), EXPIRED_COLUMN))
        .table(Alias::new(table.name()))
        .col(Alias::new(EXPIRED_COLUMN));
    // Another bootstrap may have raced us past `has_table`. MySQL has no
    // `CREATE INDEX IF NOT EXISTS`.
    if capabilities.dialect != Dialect::Mysql {
        index.if_not_exists();
    }
    manager.create_index(index).await?;

    tracing::info!(
        table = table.name(),
        json = capabilities.supports_json(),
        "created session table"
    );

    Ok(false)
}
