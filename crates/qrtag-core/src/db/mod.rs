//! Database layer for qrtag
//!
//! One libSQL database holds the local store (`events`, `codes`), the
//! operation log (`operations`) and local settings, so a store write and the
//! matching log change can commit in a single transaction.

mod connection;
mod migrations;
mod operation_log;
mod rows;
mod settings_repository;
mod store;

pub use connection::Database;
pub use operation_log::{LibSqlOperationLog, OperationLog};
pub use settings_repository::{LibSqlSettingsRepository, SettingsRepository};
pub use store::{LibSqlLocalStore, LocalStore};

use libsql::Connection;

use crate::error::Result;

/// Start a write transaction.
///
/// A transaction left open by a cancelled task is rolled back first, so the
/// partial writes of an interrupted unit never commit.
pub(crate) async fn begin(conn: &Connection) -> Result<()> {
    if !conn.is_autocommit() {
        tracing::warn!("Rolling back transaction left open by an interrupted task");
        conn.execute("ROLLBACK", ()).await.ok();
    }
    conn.execute("BEGIN IMMEDIATE", ()).await?;
    Ok(())
}

/// Commit when `result` is Ok, roll back otherwise.
pub(crate) async fn finish<T>(conn: &Connection, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            if let Err(e) = conn.execute("COMMIT", ()).await {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }
            Ok(value)
        }
        Err(error) => {
            conn.execute("ROLLBACK", ()).await.ok();
            Err(error)
        }
    }
}
