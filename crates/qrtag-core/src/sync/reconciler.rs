//! Draining the operation log against the remote authority

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::broadcast;

use super::apply::{self, RemoteOutcome};
use super::merge::{self, MergeReport, RemoteSnapshot};
use super::status::SyncNotice;
use crate::config::SyncSettings;
use crate::db::{begin, finish, LibSqlOperationLog, OperationLog};
use crate::error::{Error, Result};
use crate::models::{FailureOutcome, Operation, OperationPayload, ScannedCode};
use crate::remote::{RemoteClient, RemoteError, RemoteResult};
use crate::services::StoreService;
use crate::util::now_millis;

/// Tally of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub succeeded: usize,
    pub rejected: usize,
    /// Transient failures rescheduled with backoff
    pub retried: usize,
    /// Operations moved to dead-letter
    pub abandoned: usize,
    /// The remote refused the session; the pass stopped early
    pub halted: bool,
    /// Merge result when the pass ended with a pull
    pub pulled: Option<MergeReport>,
    pub last_error: Option<String>,
}

impl PassReport {
    /// Every attempted operation was settled without a failure
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        !self.halted && self.retried == 0 && self.abandoned == 0 && self.last_error.is_none()
    }

    #[must_use]
    pub const fn attempted(&self) -> usize {
        self.succeeded + self.rejected + self.retried + self.abandoned
    }
}

/// Turns queued operations into remote calls and merges the answers
pub struct Reconciler {
    store: StoreService,
    remote: Arc<dyn RemoteClient>,
    settings: SyncSettings,
    notices: broadcast::Sender<SyncNotice>,
}

impl Reconciler {
    pub fn new(
        store: StoreService,
        remote: Arc<dyn RemoteClient>,
        settings: SyncSettings,
        notices: broadcast::Sender<SyncNotice>,
    ) -> Self {
        Self {
            store,
            remote,
            settings,
            notices,
        }
    }

    /// Run one pass: send every eligible operation, then optionally pull.
    ///
    /// Up to `concurrency` calls run at once, never two for the same event.
    /// Storage errors end the pass after the calls already sent have settled.
    pub async fn run_pass(&self) -> Result<PassReport> {
        let mut report = PassReport::default();
        let mut in_flight = FuturesUnordered::new();
        let mut storage_error: Option<Error> = None;
        let concurrency = self.settings.concurrency.max(1);

        loop {
            if !report.halted && storage_error.is_none() && in_flight.len() < concurrency {
                match self.claim(concurrency - in_flight.len()).await {
                    Ok(operations) => {
                        for operation in operations {
                            in_flight.push(self.dispatch(operation));
                        }
                    }
                    Err(error) => storage_error = Some(error),
                }
            }

            let Some((operation, result)) = in_flight.next().await else {
                break;
            };
            if let Err(error) = self.settle(&operation, result, &mut report).await {
                tracing::error!("Failed to record result of operation #{}: {error}", operation.local_id);
                self.release_quietly(operation.local_id).await;
                storage_error.get_or_insert(error);
            }
        }

        if let Some(error) = storage_error {
            return Err(error);
        }

        if self.settings.pull_after_push && !report.halted {
            let (pending, _) = self.store.operation_counts().await?;
            if pending == 0 {
                report.pulled = self.pull(&mut report).await?;
            }
        }

        if report.attempted() > 0 || report.halted {
            tracing::info!(
                "Sync pass: {} sent, {} rejected, {} retrying, {} abandoned",
                report.succeeded,
                report.rejected,
                report.retried,
                report.abandoned
            );
        }
        Ok(report)
    }

    /// Mark up to `limit` eligible operations in flight
    async fn claim(&self, limit: usize) -> Result<Vec<Operation>> {
        let db = self.store.lock().await;
        let conn = db.connection();
        let log = LibSqlOperationLog::with_backoff(conn, self.store.backoff().clone());

        begin(conn).await?;
        let result = async {
            let operations = log.ready(now_millis(), limit).await?;
            for operation in &operations {
                log.mark_in_flight(operation.local_id).await?;
            }
            Ok(operations)
        }
        .await;
        finish(conn, result).await
    }

    async fn dispatch(&self, operation: Operation) -> (Operation, RemoteResult<RemoteOutcome>) {
        tracing::debug!(
            "Sending {} #{} for {}",
            operation.kind(),
            operation.local_id,
            operation.entity_key()
        );
        let result = self.call_remote(&operation.payload).await;
        (operation, result)
    }

    async fn call_remote(&self, payload: &OperationPayload) -> RemoteResult<RemoteOutcome> {
        match payload {
            OperationPayload::CreateEvent { name, .. } => self
                .timed(self.remote.create_event(name))
                .await
                .map(RemoteOutcome::EventCreated),
            OperationPayload::DeleteEvent { event_id } => {
                match self.timed(self.remote.delete_event(event_id)).await {
                    Ok(()) => Ok(RemoteOutcome::EventDeleted),
                    Err(RemoteError::NotFound(_)) => {
                        tracing::debug!("Event {event_id} was already gone remotely");
                        Ok(RemoteOutcome::EventDeleted)
                    }
                    Err(error) => Err(error),
                }
            }
            OperationPayload::AddCode {
                event_id, content, ..
            } => self
                .timed(self.remote.add_code(event_id, content))
                .await
                .map(RemoteOutcome::CodeAdded),
            OperationPayload::ProcessCodes { event_id } => {
                self.timed(self.remote.process_codes(event_id)).await?;
                let refreshed = match self.timed(self.remote.list_codes(event_id)).await {
                    Ok(codes) => Some(codes),
                    Err(error) => {
                        tracing::warn!("Processed codes of {event_id} but could not refresh them: {error}");
                        None
                    }
                };
                Ok(RemoteOutcome::CodesProcessed(refreshed))
            }
        }
    }

    /// Bound a remote call by the configured timeout
    async fn timed<T>(&self, call: impl Future<Output = RemoteResult<T>>) -> RemoteResult<T> {
        let limit = self.settings.remote_timeout;
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(RemoteError::Timeout(limit)))
    }

    async fn settle(
        &self,
        operation: &Operation,
        result: RemoteResult<RemoteOutcome>,
        report: &mut PassReport,
    ) -> Result<()> {
        let db = self.store.lock().await;
        let conn = db.connection();
        let log = LibSqlOperationLog::with_backoff(conn, self.store.backoff().clone());

        let error = match result {
            Ok(outcome) => match apply::confirm(conn, operation, outcome).await {
                Ok(()) => {
                    report.succeeded += 1;
                    return Ok(());
                }
                Err(Error::Integrity(reason)) => {
                    tracing::warn!(
                        "Refusing remote answer for {} #{}: {reason}",
                        operation.kind(),
                        operation.local_id
                    );
                    apply::reject(conn, operation, None).await?;
                    report.rejected += 1;
                    self.notify(SyncNotice::Rejected {
                        local_id: operation.local_id,
                        kind: operation.kind(),
                        entity: operation.entity_key().to_string(),
                        reason,
                    });
                    return Ok(());
                }
                Err(error) => return Err(error),
            },
            Err(error) => error,
        };

        report.last_error = Some(error.to_string());

        match error {
            RemoteError::Unauthorized => {
                log.release(operation.local_id).await?;
                if !report.halted {
                    tracing::warn!("Remote refused the session; stopping sync until sign-in");
                    self.notify(SyncNotice::SessionExpired);
                }
                report.halted = true;
            }
            error if error.is_transient() => {
                match log
                    .mark_failed(operation.local_id, &error.to_string(), now_millis())
                    .await?
                {
                    FailureOutcome::Rescheduled { .. } => report.retried += 1,
                    FailureOutcome::Abandoned { attempt } => {
                        report.abandoned += 1;
                        self.notify(SyncNotice::Abandoned {
                            local_id: operation.local_id,
                            kind: operation.kind(),
                            attempts: attempt,
                            reason: error.to_string(),
                        });
                    }
                }
            }
            error => {
                tracing::warn!(
                    "{} #{} rejected by remote: {error}",
                    operation.kind(),
                    operation.local_id
                );
                let reason = error.to_string();
                let existing = match error {
                    RemoteError::Conflict { existing, .. } => existing.map(|code| *code),
                    _ => None,
                };
                apply::reject(conn, operation, existing).await?;
                report.rejected += 1;
                self.notify(SyncNotice::Rejected {
                    local_id: operation.local_id,
                    kind: operation.kind(),
                    entity: operation.entity_key().to_string(),
                    reason,
                });
            }
        }
        Ok(())
    }

    /// Fetch remote events and codes and merge them
    async fn pull(&self, report: &mut PassReport) -> Result<Option<MergeReport>> {
        let snapshot = match self.fetch_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(RemoteError::Unauthorized) => {
                self.notify(SyncNotice::SessionExpired);
                report.halted = true;
                report.last_error = Some(RemoteError::Unauthorized.to_string());
                return Ok(None);
            }
            Err(error) => {
                tracing::warn!("Skipping merge of remote changes: {error}");
                report.last_error = Some(error.to_string());
                return Ok(None);
            }
        };

        let db = self.store.lock().await;
        let merged = merge::apply_snapshot(db.connection(), &snapshot).await?;
        tracing::debug!("Merged remote snapshot: {merged:?}");
        Ok(Some(merged))
    }

    async fn fetch_snapshot(&self) -> RemoteResult<RemoteSnapshot> {
        let events = self.timed(self.remote.list_events()).await?;

        let limit = self.settings.concurrency.max(1);
        let mut queued = events
            .iter()
            .map(|event| event.id.clone())
            .collect::<Vec<_>>()
            .into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut listings = Vec::with_capacity(events.len());

        loop {
            while in_flight.len() < limit {
                let Some(event_id) = queued.next() else {
                    break;
                };
                in_flight.push(self.list_event_codes(event_id));
            }
            let Some(listing) = in_flight.next().await else {
                break;
            };
            listings.push(listing);
        }

        let mut codes = HashMap::with_capacity(listings.len());
        for (event_id, listing) in listings {
            match listing {
                Ok(list) => {
                    codes.insert(event_id, list);
                }
                // Deleted between the two calls; the next pull drops it
                Err(RemoteError::NotFound(_)) => {}
                Err(error) => return Err(error),
            }
        }

        Ok(RemoteSnapshot { events, codes })
    }

    async fn list_event_codes(&self, event_id: String) -> (String, RemoteResult<Vec<ScannedCode>>) {
        let codes = self.timed(self.remote.list_codes(&event_id)).await;
        (event_id, codes)
    }

    async fn release_quietly(&self, local_id: i64) {
        let db = self.store.lock().await;
        let log = LibSqlOperationLog::new(db.connection());
        if let Err(error) = log.release(local_id).await {
            tracing::warn!("Operation #{local_id} stays in flight until restart: {error}");
        }
    }

    fn notify(&self, notice: SyncNotice) {
        // No subscribers is fine
        self.notices.send(notice).ok();
    }
}
