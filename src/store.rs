use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ConnectionTrait, DatabaseConnection};
use tokio::sync::OnceCell;

use crate::backend::SessionBackend;
use crate::config::SessionStoreConfig;
use crate::error::{Result, StoreError};
use crate::query;
use crate::schema::{self, Capabilities};
use crate::session::SessionData;
use crate::sweeper::{SweepTarget, Sweeper, SweeperState};
use crate::table::SessionTable;
use crate::upsert::{self, WriteOutcome};

/// Everything the store needs once bootstrap has succeeded.
#[derive(Debug, Clone)]
pub(crate) struct Ready {
    pub(crate) capabilities: Capabilities,
    pub(crate) table: SessionTable,
}

struct Inner {
    conn: Arc<DatabaseConnection>,
    config: SessionStoreConfig,
    ready: OnceCell<std::result::Result<Ready, Arc<StoreError>>>,
    sweeper: Sweeper,
}

/// A SQL-backed session store.
///
/// Construction is cheap and never touches the database. The first
/// operation probes the connection, creates the table if needed and arms the
/// expired-session sweeper; every other operation waits for that to finish.
/// A bootstrap failure is remembered and returned from every later call as
/// [`StoreError::NotReady`].
///
/// Clones share the connection, the bootstrap result and the sweeper. The
/// sweeper stops when the last clone is dropped.
///
/// # Example
/// ```no_run
/// use sea_orm::Database;
/// use seaorm_session_store::{SessionBackend, SessionData, SqlSessionStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let conn = Database::connect("sqlite::memory:").await?;
/// let store = SqlSessionStore::new(conn);
///
/// store.set("abc123", &SessionData::with_max_age(60_000).with("user", "alice")).await?;
/// let session = store.get("abc123").await?;
/// assert!(session.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SqlSessionStore {
    inner: Arc<Inner>,
}

impl fmt::Debug for SqlSessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlSessionStore")
            .field("config", &self.inner.config)
            .field("ready", &self.inner.ready.get().map(|r| r.is_ok()))
            .field("cleanup", &self.inner.sweeper.state())
            .finish_non_exhaustive()
    }
}

impl SqlSessionStore {
    /// Creates a store with the default configuration.
    ///
    /// Accepts an owned connection or one already shared through an `Arc`.
    pub fn new(conn: impl Into<Arc<DatabaseConnection>>) -> Self {
        Self::with_config(conn, SessionStoreConfig::default())
    }

    pub fn with_config(conn: impl Into<Arc<DatabaseConnection>>, config: SessionStoreConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                conn: conn.into(),
                config,
                ready: OnceCell::new(),
                sweeper: Sweeper::new(),
            }),
        }
    }

    /// Connects to `url` and creates a store on that connection.
    pub async fn connect(url: &str, config: SessionStoreConfig) -> Result<Self> {
        let conn = sea_orm::Database::connect(url).await?;
        Ok(Self::with_config(conn, config))
    }

    /// Creates a store on the local SQLite file named by
    /// [`DEFAULT_DATABASE_URL`](crate::DEFAULT_DATABASE_URL).
    #[cfg(feature = "sqlite")]
    pub async fn connect_default(config: SessionStoreConfig) -> Result<Self> {
        Self::connect(crate::config::DEFAULT_DATABASE_URL, config).await
    }

    pub fn config(&self) -> &SessionStoreConfig {
        &self.inner.config
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.inner.conn.as_ref()
    }

    /// Waits for bootstrap and returns what it learned about the connection.
    pub async fn ready(&self) -> Result<Capabilities> {
        Ok(self.ready_state().await?.capabilities)
    }

    pub(crate) async fn ready_state(&self) -> Result<&Ready> {
        self.inner
            .ready
            .get_or_init(|| async {
                self.bootstrap().await.map_err(|err| {
                    tracing::error!(error = %err, "session store bootstrap failed");
                    Arc::new(err)
                })
            })
            .await
            .as_ref()
            .map_err(|err| StoreError::NotReady(Arc::clone(err)))
    }

    async fn bootstrap(&self) -> Result<Ready> {
        let conn = self.connection();
        let config = &self.inner.config;

        let capabilities = Capabilities::probe(conn, config).await?;
        let table = SessionTable::new(
            capabilities.dialect,
            conn.get_database_backend(),
            &config.table_name,
            &config.sid_column,
        );

        let existed = schema::ensure_schema(conn, &capabilities, &table, config.create_table).await?;

        if config.cleanup_enabled() {
            // A fresh table has nothing to sweep yet.
            self.arm_sweeper(&table, existed);
        }

        Ok(Ready {
            capabilities,
            table,
        })
    }

    fn arm_sweeper(&self, table: &SessionTable, immediate: bool) {
        let target = SweepTarget {
            conn: Arc::clone(&self.inner.conn),
            table: table.clone(),
        };
        self.inner.sweeper.start(
            target,
            self.inner.config.cleanup_interval,
            self.inner.config.cleanup_error_handler(),
            immediate,
        );
    }

    /// Starts periodic sweeping with the configured interval, sweeping once
    /// right away. Replaces a sweep already armed. Does nothing when the
    /// interval is zero.
    pub async fn start_cleanup(&self) -> Result<()> {
        let ready = self.ready_state().await?;
        if self.inner.config.cleanup_interval.is_zero() {
            return Ok(());
        }
        self.arm_sweeper(&ready.table, true);
        Ok(())
    }

    /// Cancels periodic sweeping. Returns whether a sweep was armed.
    pub fn stop_cleanup(&self) -> bool {
        self.inner.sweeper.stop()
    }

    pub fn cleanup_state(&self) -> SweeperState {
        self.inner.sweeper.state()
    }

    /// Removes every expired session now. Returns the number removed.
    pub async fn delete_expired_sessions(&self) -> Result<u64> {
        let ready = self.ready_state().await?;
        query::delete_expired(self.connection(), &ready.table, Utc::now()).await
    }

    /// Whether a row for `sid` exists, even an expired one.
    pub async fn contains(&self, sid: &str) -> Result<bool> {
        let ready = self.ready_state().await?;
        query::exists(self.connection(), &ready.table, sid).await
    }
}

#[async_trait]
impl SessionBackend for SqlSessionStore {
    async fn get(&self, sid: &str) -> Result<Option<SessionData>> {
        let ready = self.ready_state().await?;
        query::fetch_one(self.connection(), &ready.table, sid, Utc::now()).await
    }

    async fn set(&self, sid: &str, session: &SessionData) -> Result<()> {
        let expires_at = session.expires_at(Utc::now());
        let payload = session.encode()?;

        let ready = self.ready_state().await?;
        let outcome = upsert::upsert(
            self.connection(),
            &ready.table,
            ready.capabilities.upsert_strategy(),
            sid,
            expires_at,
            &payload,
        )
        .await?;

        match outcome {
            WriteOutcome::Inserted => tracing::trace!(sid, "inserted session"),
            WriteOutcome::Updated => tracing::trace!(sid, "updated session"),
            WriteOutcome::Upserted { rows_affected } => {
                tracing::trace!(sid, rows_affected, "upserted session")
            }
        }
        Ok(())
    }

    async fn touch(&self, sid: &str, session: &SessionData) -> Result<u64> {
        let ready = self.ready_state().await?;
        let Some(expires) = session.cookie.expires else {
            return Ok(0);
        };
        query::touch(self.connection(), &ready.table, sid, expires, Utc::now()).await
    }

    async fn destroy(&self, sid: &str) -> Result<u64> {
        let ready = self.ready_state().await?;
        query::delete_one(self.connection(), &ready.table, sid).await
    }

    async fn length(&self) -> Result<u64> {
        let ready = self.ready_state().await?;
        query::count(self.connection(), &ready.table).await
    }

    async fn clear(&self) -> Result<u64> {
        let ready = self.ready_state().await?;
        let removed = query::delete_all(self.connection(), &ready.table).await?;
        tracing::debug!(table = ready.table.name(), removed, "cleared sessions");
        Ok(removed)
    }

    async fn all(&self) -> Result<Vec<SessionData>> {
        let ready = self.ready_state().await?;
        query::fetch_all(self.connection(), &ready.table, Utc::now()).await
    }
}
