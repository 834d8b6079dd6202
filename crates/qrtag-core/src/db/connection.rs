//! Database connection management

use std::path::{Path, PathBuf};

use libsql::{Builder, Connection, Database as LibSqlDatabase};

use super::migrations;
use crate::error::{Error, Result};

/// Process-wide handle to the local libSQL database
///
/// Opened once at startup and closed at shutdown; repositories borrow its
/// connection instead of opening their own.
pub struct Database {
    // Kept alive for the lifetime of the connection.
    _db: LibSqlDatabase,
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically. Any failure to create or open the file
    /// is reported as `StorageUnavailable`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|error| {
                Error::StorageUnavailable(format!(
                    "cannot create {}: {error}",
                    parent.display()
                ))
            })?;
        }

        let path_str = path.to_string_lossy().to_string();
        let db = Builder::new_local(&path_str)
            .build()
            .await
            .map_err(|error| unavailable(&path, &error))?;
        let conn = db.connect().map_err(|error| unavailable(&path, &error))?;

        let database = Self {
            _db: db,
            conn,
            path: Some(path.clone()),
        };
        database
            .configure()
            .await
            .map_err(|error| unavailable(&path, &error))?;
        database.migrate().await?;
        tracing::info!("Opened local store at {}", path.display());
        Ok(database)
    }

    /// Open an in-memory database (tests, and the memory-only fallback)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        let database = Self {
            _db: db,
            conn,
            path: None,
        };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Configure `SQLite` for optimal performance
    async fn configure(&self) -> Result<()> {
        // WAL is not available for in-memory databases
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        self.conn
            .execute("PRAGMA busy_timeout = 5000;", ())
            .await
            .ok();
        Ok(())
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn).await
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// On-disk location, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub const fn is_in_memory(&self) -> bool {
        self.path.is_none()
    }

    /// Flush the WAL and release the handle
    pub async fn close(self) -> Result<()> {
        if self.path.is_some() {
            self.conn
                .query("PRAGMA wal_checkpoint(TRUNCATE);", ())
                .await
                .ok();
        }
        tracing::debug!("Closed local store");
        Ok(())
    }
}

fn unavailable(path: &Path, error: &dyn std::fmt::Display) -> Error {
    Error::StorageUnavailable(format!("cannot open {}: {error}", path.display()))
}
