//! Shared handle to the local database used by the engine and its clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::db::{
    Database, LibSqlLocalStore, LibSqlOperationLog, LibSqlSettingsRepository, LocalStore,
    OperationLog, SettingsRepository,
};
use crate::error::{Error, Result};
use crate::models::{CodeFilter, Event, EventFilter, Operation, ScannedCode};
use crate::remote::Session;
use crate::sync::backoff::BackoffPolicy;

/// Where local data lives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StorageMode {
    /// On-disk database
    #[default]
    Persistent,
    /// In-memory database requested by the caller
    Ephemeral,
    /// On-disk database could not be opened; data is lost on exit
    MemoryOnly { reason: String },
}

impl StorageMode {
    /// Whether local persistence failed and the engine fell back to memory
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::MemoryOnly { .. })
    }
}

/// Thread-safe service over the process-wide database handle.
///
/// Store, operation log and settings share one connection, so the engine can
/// commit a store write together with its log change.
#[derive(Clone)]
pub struct StoreService {
    db: Arc<Mutex<Database>>,
    mode: StorageMode,
    backoff: BackoffPolicy,
}

impl StoreService {
    /// Open the database at `db_path`.
    ///
    /// A file that is not a database is moved aside and recreated once.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local store at {} is corrupted: {error}. Moving it aside and starting fresh.",
                    db_path.display()
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };
        Self::from_database(db, StorageMode::Persistent).await
    }

    /// Open the database at `db_path`, falling back to memory when local
    /// persistence is unavailable.
    pub async fn open_or_degrade(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        match Self::open_path(&db_path).await {
            Ok(service) => Ok(service),
            Err(error @ (Error::StorageUnavailable(_) | Error::Io(_))) => {
                tracing::warn!(
                    "Local storage unavailable ({error}); running memory-only, changes will not survive a restart"
                );
                let db = Database::open_in_memory().await?;
                Self::from_database(
                    db,
                    StorageMode::MemoryOnly {
                        reason: error.to_string(),
                    },
                )
                .await
            }
            Err(error) => Err(error),
        }
    }

    /// Open an in-memory database service (tests and throwaway sessions).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Self::from_database(db, StorageMode::Ephemeral).await
    }

    async fn from_database(db: Database, mode: StorageMode) -> Result<Self> {
        LibSqlOperationLog::new(db.connection())
            .recover_in_flight()
            .await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            mode,
            backoff: BackoffPolicy::default(),
        })
    }

    /// Use `backoff` for failures recorded through this handle
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database") || message.contains("malformed")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let file_name = db_path
                .file_name()
                .map_or_else(|| "qrtag.db".into(), |name| name.to_string_lossy());
            let backup_path = db_path.with_file_name(format!("{file_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local store from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        // WAL and shared-memory sidecars belong to the old file
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = db_path.as_os_str().to_owned();
            sidecar.push(suffix);
            let sidecar = PathBuf::from(sidecar);
            if sidecar.exists() {
                std::fs::remove_file(&sidecar)?;
                tracing::warn!("Removed stale sidecar file {}", sidecar.display());
            }
        }

        Ok(())
    }

    pub const fn mode(&self) -> &StorageMode {
        &self.mode
    }

    pub const fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock().await
    }

    /// List events (newest first).
    pub async fn list_events(&self, filter: EventFilter) -> Result<Vec<Event>> {
        let db = self.db.lock().await;
        LibSqlLocalStore::new(db.connection())
            .list_events(filter)
            .await
    }

    pub async fn get_event(&self, id: &str) -> Result<Option<Event>> {
        let db = self.db.lock().await;
        LibSqlLocalStore::new(db.connection()).get_event(id).await
    }

    /// List codes in insertion order.
    pub async fn list_codes(&self, filter: &CodeFilter) -> Result<Vec<ScannedCode>> {
        let db = self.db.lock().await;
        LibSqlLocalStore::new(db.connection())
            .list_codes(filter)
            .await
    }

    pub async fn get_code(&self, id: &str) -> Result<Option<ScannedCode>> {
        let db = self.db.lock().await;
        LibSqlLocalStore::new(db.connection()).get_code(id).await
    }

    /// Queued and in-flight operations, oldest first.
    pub async fn pending_operations(&self) -> Result<Vec<Operation>> {
        let db = self.db.lock().await;
        LibSqlOperationLog::with_backoff(db.connection(), self.backoff.clone())
            .pending()
            .await
    }

    pub async fn dead_letters(&self) -> Result<Vec<Operation>> {
        let db = self.db.lock().await;
        LibSqlOperationLog::with_backoff(db.connection(), self.backoff.clone())
            .dead_letters()
            .await
    }

    /// `(pending, dead-lettered)` operation counts.
    pub async fn operation_counts(&self) -> Result<(u64, u64)> {
        let db = self.db.lock().await;
        let log = LibSqlOperationLog::with_backoff(db.connection(), self.backoff.clone());
        Ok((log.pending_count().await?, log.dead_letter_count().await?))
    }

    pub async fn load_session(&self) -> Result<Option<Session>> {
        let db = self.db.lock().await;
        LibSqlSettingsRepository::new(db.connection())
            .load_session()
            .await
    }

    pub async fn save_session(&self, session: &Session) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSettingsRepository::new(db.connection())
            .save_session(session)
            .await
    }

    pub async fn clear_session(&self) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSettingsRepository::new(db.connection())
            .clear_session()
            .await
    }

    pub async fn last_sync_at(&self) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        LibSqlSettingsRepository::new(db.connection())
            .last_sync_at()
            .await
    }

    pub async fn set_last_sync_at(&self, timestamp: i64) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSettingsRepository::new(db.connection())
            .set_last_sync_at(timestamp)
            .await
    }

    /// Release the database handle.
    ///
    /// The file is only checkpointed and closed by the last clone.
    pub async fn close(self) -> Result<()> {
        match Arc::try_unwrap(self.db) {
            Ok(db) => db.into_inner().close().await,
            Err(_) => {
                tracing::debug!("Local store still shared; leaving it open");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::models::OperationPayload;

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_service_lists_events() {
        let service = StoreService::open_in_memory().await.unwrap();
        assert_eq!(service.mode(), &StorageMode::Ephemeral);

        {
            let db = service.lock().await;
            LibSqlLocalStore::new(db.connection())
                .put_event(&Event::new_local("Expo", 1))
                .await
                .unwrap();
        }

        let events = service.list_events(EventFilter::Live).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "Expo");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unusable_path_degrades_to_memory() {
        let tmp = tempdir().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let service = StoreService::open_or_degrade(blocker.join("qrtag.db"))
            .await
            .unwrap();
        assert!(service.mode().is_degraded());
        assert!(service.list_events(EventFilter::All).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reopening_requeues_in_flight_operations() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("qrtag.db");

        let service = StoreService::open_path(&path).await.unwrap();
        {
            let db = service.lock().await;
            let log = LibSqlOperationLog::new(db.connection());
            let id = log
                .enqueue(
                    &OperationPayload::ProcessCodes {
                        event_id: "e1".to_string(),
                    },
                    0,
                )
                .await
                .unwrap();
            log.mark_in_flight(id).await.unwrap();
        }
        service.close().await.unwrap();

        let reopened = StoreService::open_path(&path).await.unwrap();
        let pending = reopened.pending_operations().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].state, crate::models::OperationState::Queued);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn corrupted_file_is_moved_aside() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("qrtag.db");
        std::fs::write(&path, b"this is definitely not sqlite, just some bytes").unwrap();

        let service = StoreService::open_path(&path).await.unwrap();
        assert_eq!(service.mode(), &StorageMode::Persistent);

        let backups = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".corrupt-"))
            .count();
        assert_eq!(backups, 1);
    }
}
