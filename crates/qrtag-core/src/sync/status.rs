//! Sync status snapshots and user notices

use std::fmt;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::models::OperationKind;
use crate::services::StorageMode;
use crate::state::SyncState;

/// What presentation shows about synchronization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub state: SyncState,
    /// Queued and in-flight operations
    pub pending_count: u64,
    pub dead_letter_count: u64,
    /// Completion of the last pass that ran without errors (Unix ms)
    pub last_sync_at: Option<i64>,
    pub last_error: Option<String>,
    pub passes_completed: u64,
    pub online: bool,
    pub storage_mode: StorageMode,
}

impl SyncStatus {
    /// Nothing left to send and nothing waiting for the user
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.pending_count == 0 && self.dead_letter_count == 0
    }
}

/// Something the user should be told about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotice {
    /// The remote refused a change; the local write was rolled back
    Rejected {
        local_id: i64,
        kind: OperationKind,
        entity: String,
        reason: String,
    },
    /// A change ran out of retries and waits in dead-letter
    Abandoned {
        local_id: i64,
        kind: OperationKind,
        attempts: u32,
        reason: String,
    },
    /// The bearer token was refused; sign in again
    SessionExpired,
}

impl fmt::Display for SyncNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected {
                local_id,
                kind,
                entity,
                reason,
            } => write!(f, "{kind} #{local_id} for {entity} was rejected: {reason}"),
            Self::Abandoned {
                local_id,
                kind,
                attempts,
                reason,
            } => write!(
                f,
                "{kind} #{local_id} gave up after {attempts} attempts: {reason}"
            ),
            Self::SessionExpired => f.write_str("Session expired, sign in again to keep syncing"),
        }
    }
}

/// Handle for a status callback; dropping it unsubscribes
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    /// Call `callback` with the current status and with every change after it
    pub(crate) fn spawn<F>(mut receiver: watch::Receiver<SyncStatus>, mut callback: F) -> Self
    where
        F: FnMut(&SyncStatus) + Send + 'static,
    {
        let current = receiver.borrow_and_update().clone();
        callback(&current);
        let task = tokio::spawn(async move {
            while receiver.changed().await.is_ok() {
                let status = receiver.borrow_and_update().clone();
                callback(&status);
            }
        });
        Self { task }
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
