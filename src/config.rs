//! Configuration for [`SqlSessionStore`](crate::SqlSessionStore).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreError;

/// Database opened by [`SqlSessionStore::connect_default`](crate::SqlSessionStore::connect_default)
/// when no connection is supplied: a single-file SQLite database in the
/// working directory, created on first use.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://sessions.sqlite?mode=rwc";

/// Callback receiving errors from background cleanup sweeps.
pub type CleanupErrorHandler = Arc<dyn Fn(&StoreError) + Send + Sync>;

/// Settings for a session store.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use seaorm_session_store::SessionStoreConfig;
///
/// let config = SessionStoreConfig::default()
///     .with_table_name("app_sessions")
///     .with_cleanup_interval(Duration::from_secs(300));
/// assert_eq!(config.sid_column, "sid");
/// ```
#[derive(Clone)]
pub struct SessionStoreConfig {
    /// Table holding the sessions.
    pub table_name: String,

    /// Primary key column holding the session id.
    pub sid_column: String,

    /// Create the table when it does not exist.
    pub create_table: bool,

    /// Pause between the end of one expired-session sweep and the start of
    /// the next. Zero disables sweeping.
    pub cleanup_interval: Duration,

    /// Never run expired-session sweeps.
    pub disable_cleanup: bool,

    /// Client identifier (`"pg"`, `"mariadb"`, `"mssql"`, ...) overriding the
    /// dialect implied by the connection.
    pub client: Option<String>,

    /// Server version to assume instead of querying the database.
    pub client_version: Option<String>,

    on_cleanup_error: CleanupErrorHandler,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            table_name: "sessions".to_string(),
            sid_column: "sid".to_string(),
            create_table: true,
            cleanup_interval: Duration::from_secs(60),
            disable_cleanup: false,
            client: None,
            client_version: None,
            on_cleanup_error: Arc::new(|err: &StoreError| {
                tracing::error!(error = %err, "expired session cleanup failed");
            }),
        }
    }
}

impl fmt::Debug for SessionStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStoreConfig")
            .field("table_name", &self.table_name)
            .field("sid_column", &self.sid_column)
            .field("create_table", &self.create_table)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("disable_cleanup", &self.disable_cleanup)
            .field("client", &self.client)
            .field("client_version", &self.client_version)
            .finish_non_exhaustive()
    }
}

impl SessionStoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn with_sid_column(mut self, sid_column: impl Into<String>) -> Self {
        self.sid_column = sid_column.into();
        self
    }

    /// Whether a missing table is created (default) or reported as
    /// [`StoreError::SchemaMissing`].
    pub fn with_create_table(mut self, create_table: bool) -> Self {
        self.create_table = create_table;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_cleanup_disabled(mut self, disabled: bool) -> Self {
        self.disable_cleanup = disabled;
        self
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    pub fn with_client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = Some(version.into());
        self
    }

    /// Replaces the default handler, which logs sweep failures with
    /// `tracing::error!`.
    pub fn on_cleanup_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&StoreError) + Send + Sync + 'static,
    {
        self.on_cleanup_error = Arc::new(handler);
        self
    }

    pub(crate) fn cleanup_error_handler(&self) -> CleanupErrorHandler {
        Arc::clone(&self.on_cleanup_error)
    }

    /// Whether background sweeps should run at all.
    pub fn cleanup_enabled(&self) -> bool {
        !self.disable_cleanup && !self.cleanup_interval.is_zero()
    }
}
