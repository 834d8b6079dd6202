//! Deciding when reconciliation runs
//!
//! A single worker task owns the pass loop. Triggers only wake the worker;
//! a wake-up that arrives while a pass is running is remembered once, so any
//! burst of triggers during a pass yields exactly one follow-up pass.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use super::reconciler::{PassReport, Reconciler};
use super::status::SyncStatus;
use crate::config::SyncSettings;
use crate::error::Result;
use crate::services::StoreService;
use crate::state::SyncState;
use crate::util::now_millis;

/// Why a pass was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// App became visible
    Foreground,
    /// Network went from offline to online
    ConnectivityRestored,
    /// Periodic tick while online
    Interval,
    /// A local mutation was enqueued
    LocalMutation,
    /// Explicit user request
    Manual,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Foreground => "foreground",
            Self::ConnectivityRestored => "connectivity restored",
            Self::Interval => "interval",
            Self::LocalMutation => "local mutation",
            Self::Manual => "manual",
        })
    }
}

struct Inner {
    reconciler: Reconciler,
    store: StoreService,
    settings: SyncSettings,
    wake: Notify,
    stop: Notify,
    stopping: AtomicBool,
    online: AtomicBool,
    last_trigger: std::sync::Mutex<Option<SyncTrigger>>,
    pass_lock: Mutex<()>,
    passes: AtomicU64,
    status: watch::Sender<SyncStatus>,
}

/// Schedules reconciliation passes and publishes sync status
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncOrchestrator {
    /// Spawn the worker. Must be called inside a tokio runtime.
    pub async fn start(
        reconciler: Reconciler,
        store: StoreService,
        settings: SyncSettings,
        online: bool,
    ) -> Result<Self> {
        let (status, _) = watch::channel(SyncStatus {
            online,
            storage_mode: store.mode().clone(),
            last_sync_at: store.last_sync_at().await?,
            ..SyncStatus::default()
        });

        let inner = Arc::new(Inner {
            reconciler,
            store,
            settings,
            wake: Notify::new(),
            stop: Notify::new(),
            stopping: AtomicBool::new(false),
            online: AtomicBool::new(online),
            last_trigger: std::sync::Mutex::new(None),
            pass_lock: Mutex::new(()),
            passes: AtomicU64::new(0),
            status,
        });
        inner.refresh_status().await?;

        let worker = tokio::spawn(Inner::run(Arc::clone(&inner)));
        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Request a pass. Ignored while offline unless `Manual`.
    pub fn trigger(&self, reason: SyncTrigger) {
        if !self.is_online() && reason != SyncTrigger::Manual {
            return;
        }
        if let Ok(mut last) = self.inner.last_trigger.lock() {
            *last = Some(reason);
        }
        self.inner.wake.notify_one();
    }

    /// Report connectivity; going online triggers a pass
    pub fn set_online(&self, online: bool) {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        self.inner.status.send_modify(|status| {
            status.online = online;
            if !online {
                status.state = SyncState::Offline;
            }
        });
        if online && !was_online {
            tracing::info!("Connectivity restored");
            self.trigger(SyncTrigger::ConnectivityRestored);
        } else if !online && was_online {
            tracing::info!("Connectivity lost; changes stay queued");
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    pub fn foreground(&self) {
        self.trigger(SyncTrigger::Foreground);
    }

    /// Run a pass now and wait for it; `None` while offline
    pub async fn sync_now(&self) -> Result<Option<PassReport>> {
        self.inner.execute(SyncTrigger::Manual).await
    }

    /// Recompute queue counts after an out-of-band change
    pub async fn refresh_status(&self) -> Result<()> {
        self.inner.refresh_status().await
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// Stop the worker, waiting for a running pass to finish
    pub async fn shutdown(&self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.stop.notify_one();
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(error) = worker.await {
                tracing::warn!("Sync worker ended abnormally: {error}");
            }
        }
        tracing::debug!("Sync orchestrator stopped");
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        let mut ticker = self.settings.interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            let trigger = tokio::select! {
                () = self.stop.notified() => break,
                () = self.wake.notified() => self.take_trigger(),
                () = next_tick(&mut ticker) => SyncTrigger::Interval,
            };
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
            if let Err(error) = self.execute(trigger).await {
                tracing::warn!("Sync pass failed: {error}");
            }
        }
    }

    fn take_trigger(&self) -> SyncTrigger {
        self.last_trigger
            .lock()
            .ok()
            .and_then(|mut last| last.take())
            .unwrap_or(SyncTrigger::Manual)
    }

    async fn execute(&self, trigger: SyncTrigger) -> Result<Option<PassReport>> {
        if !self.online.load(Ordering::SeqCst) {
            tracing::debug!("Skipping {trigger} pass while offline");
            self.status.send_modify(|status| status.state = SyncState::Offline);
            return Ok(None);
        }

        let _pass = self.pass_lock.lock().await;
        tracing::debug!("Starting sync pass ({trigger})");
        self.status.send_modify(|status| status.state = SyncState::Syncing);

        let result = self.reconciler.run_pass().await;
        let passes = self.passes.fetch_add(1, Ordering::SeqCst) + 1;

        let mut last_sync_at = None;
        let (state, last_error) = match &result {
            Ok(report) if report.halted => (SyncState::Error, report.last_error.clone()),
            Ok(report) => {
                if report.is_clean() {
                    let now = now_millis();
                    if let Err(error) = self.store.set_last_sync_at(now).await {
                        tracing::warn!("Could not persist last sync time: {error}");
                    }
                    last_sync_at = Some(now);
                }
                let state = if report.retried > 0 || report.abandoned > 0 {
                    SyncState::Error
                } else {
                    SyncState::Synced
                };
                (state, report.last_error.clone())
            }
            Err(error) => (SyncState::Error, Some(error.to_string())),
        };

        self.status.send_modify(|status| {
            status.state = state;
            status.last_error = last_error;
            status.passes_completed = passes;
            if last_sync_at.is_some() {
                status.last_sync_at = last_sync_at;
            }
        });
        self.refresh_status().await?;

        result.map(Some)
    }

    async fn refresh_status(&self) -> Result<()> {
        let (pending_count, dead_letter_count) = self.store.operation_counts().await?;
        let online = self.online.load(Ordering::SeqCst);
        self.status.send_modify(|status| {
            status.pending_count = pending_count;
            status.dead_letter_count = dead_letter_count;
            status.online = online;
            if !online {
                status.state = SyncState::Offline;
            } else if status.state == SyncState::Offline {
                status.state = SyncState::Synced;
            }
            if dead_letter_count > 0 && status.state == SyncState::Synced {
                status.state = SyncState::Error;
            }
        });
        Ok(())
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::sync::broadcast;

    use super::*;
    use crate::remote::{MemoryRemote, RemoteClient};

    async fn orchestrator(store: &StoreService) -> SyncOrchestrator {
        let remote: Arc<dyn RemoteClient> = Arc::new(MemoryRemote::new());
        let settings = SyncSettings::default().without_interval();
        let (notices, _) = broadcast::channel(8);
        let reconciler = Reconciler::new(store.clone(), remote, settings.clone(), notices);
        SyncOrchestrator::start(reconciler, store.clone(), settings, true)
            .await
            .unwrap()
    }

    fn require_send<T: Send>(_: &T) {}

    #[tokio::test(flavor = "multi_thread")]
    async fn pass_futures_can_move_between_threads() {
        let store = StoreService::open_in_memory().await.unwrap();
        let orchestrator = orchestrator(&store).await;

        let pass = orchestrator.sync_now();
        require_send(&pass);
        assert!(pass.await.unwrap().is_some());

        orchestrator.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_leaves_syncing_when_sync_time_cannot_be_saved() {
        let store = StoreService::open_in_memory().await.unwrap();
        let orchestrator = orchestrator(&store).await;
        store
            .lock()
            .await
            .connection()
            .execute("DROP TABLE settings", ())
            .await
            .unwrap();

        let report = orchestrator.sync_now().await.unwrap().unwrap();
        assert!(report.is_clean());

        let status = orchestrator.status();
        assert_eq!(status.state, SyncState::Synced);
        assert_eq!(status.passes_completed, 1);
        assert!(status.last_sync_at.is_some());

        orchestrator.shutdown().await;
    }
}
