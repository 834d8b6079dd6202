//! The engine facade used by presentation layers.
//!
//! Reads come straight from local store snapshots. Writes go through
//! [`QrTagService::enqueue_mutation`], which applies them optimistically and
//! wakes the orchestrator.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use super::mutations;
use super::StoreService;
use crate::config::SyncSettings;
use crate::db::{LibSqlOperationLog, OperationLog};
use crate::error::{Error, Result};
use crate::models::{
    is_temporary_id, CodeFilter, Event, EventFilter, Mutation, MutationReceipt, Operation,
    ScannedCode,
};
use crate::remote::{ExportFormat, RemoteClient, Session};
use crate::sync::{
    self, BackoffPolicy, PassReport, Reconciler, Subscription, SyncNotice, SyncOrchestrator,
    SyncStatus, SyncTrigger,
};
use crate::util::now_millis;

const NOTICE_CAPACITY: usize = 64;

/// Offline-first access to events and scanned codes
pub struct QrTagService {
    store: StoreService,
    remote: Arc<dyn RemoteClient>,
    orchestrator: SyncOrchestrator,
    notices: broadcast::Sender<SyncNotice>,
}

impl QrTagService {
    /// Start the engine with connectivity assumed.
    pub async fn start(
        store: StoreService,
        remote: Arc<dyn RemoteClient>,
        settings: SyncSettings,
    ) -> Result<Self> {
        Self::launch(store, remote, settings, true).await
    }

    /// Start the engine without connectivity; no pass runs until
    /// [`Self::set_online`] reports the network back.
    pub async fn start_offline(
        store: StoreService,
        remote: Arc<dyn RemoteClient>,
        settings: SyncSettings,
    ) -> Result<Self> {
        Self::launch(store, remote, settings, false).await
    }

    async fn launch(
        store: StoreService,
        remote: Arc<dyn RemoteClient>,
        settings: SyncSettings,
        online: bool,
    ) -> Result<Self> {
        let store = store.with_backoff(BackoffPolicy::from_settings(&settings));

        if let Some(session) = store.load_session().await? {
            tracing::debug!("Restored session for {}", session.email);
            remote.set_token(Some(&session.token));
        }

        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let reconciler = Reconciler::new(
            store.clone(),
            Arc::clone(&remote),
            settings.clone(),
            notices.clone(),
        );
        let orchestrator = SyncOrchestrator::start(reconciler, store.clone(), settings, online).await?;

        Ok(Self {
            store,
            remote,
            orchestrator,
            notices,
        })
    }

    pub const fn store(&self) -> &StoreService {
        &self.store
    }

    /// Live events, newest first
    pub async fn snapshot_events(&self) -> Result<Vec<Event>> {
        self.store.list_events(EventFilter::Live).await
    }

    /// Live codes of an event, in scan order
    pub async fn snapshot_codes(&self, event_id: &str) -> Result<Vec<ScannedCode>> {
        self.store.list_codes(&CodeFilter::for_event(event_id)).await
    }

    /// Apply a change locally, journal it, and request a pass
    pub async fn enqueue_mutation(&self, mutation: Mutation) -> Result<MutationReceipt> {
        let receipt = {
            let db = self.store.lock().await;
            mutations::apply_local(db.connection(), &mutation, now_millis()).await?
        };
        self.orchestrator.refresh_status().await?;
        self.orchestrator.trigger(SyncTrigger::LocalMutation);
        Ok(receipt)
    }

    /// Create an event; it carries a temporary id until the remote confirms it
    pub async fn create_event(&self, name: &str) -> Result<Event> {
        let receipt = self
            .enqueue_mutation(Mutation::CreateEvent {
                name: name.to_string(),
            })
            .await?;
        match receipt {
            MutationReceipt::EventCreated { event, .. } => Ok(event),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn delete_event(&self, event_id: &str) -> Result<i64> {
        let receipt = self
            .enqueue_mutation(Mutation::DeleteEvent {
                event_id: event_id.to_string(),
            })
            .await?;
        Ok(receipt.local_id())
    }

    pub async fn add_code(&self, event_id: &str, content: &str) -> Result<ScannedCode> {
        let receipt = self
            .enqueue_mutation(Mutation::AddCode {
                event_id: event_id.to_string(),
                content: content.to_string(),
            })
            .await?;
        match receipt {
            MutationReceipt::CodeAdded { code, .. } => Ok(code),
            other => Err(unexpected(&other)),
        }
    }

    /// Queue AI processing; `None` when every code is already processed
    pub async fn process_codes(&self, event_id: &str) -> Result<Option<i64>> {
        let unprocessed = self
            .store
            .list_codes(&CodeFilter::for_event(event_id).unprocessed())
            .await?;
        let live = self
            .store
            .get_event(event_id)
            .await?
            .is_some_and(|event| event.is_live());
        if live && unprocessed.is_empty() {
            return Ok(None);
        }

        let receipt = self
            .enqueue_mutation(Mutation::ProcessCodes {
                event_id: event_id.to_string(),
            })
            .await?;
        Ok(Some(receipt.local_id()))
    }

    /// Call `callback` with the current status and on every change
    pub fn subscribe_to_sync_status<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(&SyncStatus) + Send + 'static,
    {
        Subscription::spawn(self.orchestrator.watch_status(), callback)
    }

    pub fn status(&self) -> SyncStatus {
        self.orchestrator.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.orchestrator.watch_status()
    }

    /// Rejections, abandoned operations and expired sessions
    pub fn notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.notices.subscribe()
    }

    pub fn set_online(&self, online: bool) {
        self.orchestrator.set_online(online);
    }

    pub fn foreground(&self) {
        self.orchestrator.foreground();
    }

    /// Run a pass and wait for it; `None` while offline
    pub async fn sync_now(&self) -> Result<Option<PassReport>> {
        self.orchestrator.sync_now().await
    }

    /// Queued and in-flight operations, oldest first
    pub async fn pending_operations(&self) -> Result<Vec<Operation>> {
        self.store.pending_operations().await
    }

    pub async fn dead_letters(&self) -> Result<Vec<Operation>> {
        self.store.dead_letters().await
    }

    /// Give a dead-lettered operation a fresh set of attempts
    pub async fn retry_dead_letter(&self, local_id: i64) -> Result<()> {
        {
            let db = self.store.lock().await;
            LibSqlOperationLog::with_backoff(db.connection(), self.store.backoff().clone())
                .retry_dead_letter(local_id, now_millis())
                .await?;
        }
        tracing::info!("Operation #{local_id} requeued");
        self.orchestrator.refresh_status().await?;
        self.orchestrator.trigger(SyncTrigger::Manual);
        Ok(())
    }

    /// Drop a dead-lettered operation and roll back its local effect
    pub async fn discard_dead_letter(&self, local_id: i64) -> Result<Operation> {
        let operation = {
            let db = self.store.lock().await;
            sync::discard(db.connection(), local_id).await?
        };
        tracing::info!("Discarded {} #{local_id}", operation.kind());
        self.orchestrator.refresh_status().await?;
        Ok(operation)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let session = self.remote.login(email, password).await?;
        self.adopt_session(&session).await?;
        Ok(session)
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<Session> {
        let session = self.remote.register(email, password).await?;
        self.adopt_session(&session).await?;
        Ok(session)
    }

    async fn adopt_session(&self, session: &Session) -> Result<()> {
        self.store.save_session(session).await?;
        self.remote.set_token(Some(&session.token));
        tracing::info!("Signed in as {}", session.email);
        self.orchestrator.trigger(SyncTrigger::Manual);
        Ok(())
    }

    /// Forget the session; queued changes stay for the next sign-in
    pub async fn logout(&self) -> Result<()> {
        self.store.clear_session().await?;
        self.remote.set_token(None);
        tracing::info!("Signed out");
        Ok(())
    }

    pub async fn session(&self) -> Result<Option<Session>> {
        self.store.load_session().await
    }

    /// Download an export of a confirmed event
    pub async fn export_event(&self, event_id: &str, format: ExportFormat) -> Result<Vec<u8>> {
        if is_temporary_id(event_id) {
            return Err(Error::InvalidInput(format!(
                "Event {event_id} has not reached the server yet; sync before exporting"
            )));
        }
        Ok(self.remote.export_event(event_id, format).await?)
    }

    /// Stop background sync, waiting for a running pass
    pub async fn shutdown(self) -> Result<()> {
        self.orchestrator.shutdown().await;
        drop(self.orchestrator);
        self.store.close().await
    }
}

fn unexpected(receipt: &MutationReceipt) -> Error {
    Error::Database(format!("Unexpected mutation receipt: {receipt:?}"))
}
