//! Background removal of expired sessions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use sea_orm::DatabaseConnection;
use tokio::task::JoinHandle;

use crate::config::CleanupErrorHandler;
use crate::error::Result;
use crate::query;
use crate::table::SessionTable;

/// Whether a sweep is currently armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweeperState {
    Idle,
    Scheduled,
}

/// The table a sweeper cleans and the connection it uses.
#[derive(Debug, Clone)]
pub struct SweepTarget {
    pub conn: Arc<DatabaseConnection>,
    pub table: SessionTable,
}

impl SweepTarget {
    /// Runs one sweep, returning the number of rows deleted.
    pub async fn sweep(&self) -> Result<u64> {
        query::delete_expired(self.conn.as_ref(), &self.table, Utc::now()).await
    }
}

/// Owns the recurring sweep task of one store.
///
/// The task runs on the tokio runtime and never holds the runtime open on
/// its own. Dropping the sweeper stops it.
#[derive(Debug, Default)]
pub struct Sweeper {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Sweeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the sweeper, replacing any task already running.
    ///
    /// With `immediate` the first sweep starts right away, otherwise after one
    /// `interval`. Each following sweep starts `interval` after the previous
    /// one finished, whether it succeeded or not. Failures go to `on_error`.
    pub fn start(
        &self,
        target: SweepTarget,
        interval: Duration,
        on_error: CleanupErrorHandler,
        immediate: bool,
    ) {
        let handle = tokio::spawn(async move {
            if !immediate {
                tokio::time::sleep(interval).await;
            }
            loop {
                match target.sweep().await {
                    Ok(removed) => tracing::debug!(
                        table = target.table.name(),
                        removed,
                        "swept expired sessions"
                    ),
                    Err(err) => on_error(&err),
                }
                tokio::time::sleep(interval).await;
            }
        });

        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Cancels the armed sweep. Returns whether one was armed.
    pub fn stop(&self) -> bool {
        match self.task.lock().take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn state(&self) -> SweeperState {
        match self.task.lock().as_ref() {
            Some(handle) if !handle.is_finished() => SweeperState::Scheduled,
            _ => SweeperState::Idle,
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
