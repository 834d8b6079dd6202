//! Applying remote answers to the local store and the log
//!
//! Each function runs in one transaction: the store change and the removal
//! (or rewrite) of the operation commit together or not at all.

use libsql::Connection;

use super::merge::merge_event_codes;
use crate::db::{begin, finish, LibSqlLocalStore, LibSqlOperationLog, LocalStore, OperationLog};
use crate::error::{Error, Result};
use crate::models::{Event, Operation, OperationPayload, OperationState, ScannedCode};

/// What the remote authority answered for one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    EventCreated(Event),
    /// Also used when the event was already gone remotely
    EventDeleted,
    CodeAdded(ScannedCode),
    /// Refreshed codes of the event, when the follow-up listing succeeded
    CodesProcessed(Option<Vec<ScannedCode>>),
}

/// Apply a successful remote call and retire the operation.
///
/// Fails with `Integrity` when the confirmed record would break the
/// reference rules of the store; nothing is written in that case.
pub async fn confirm(conn: &Connection, operation: &Operation, outcome: RemoteOutcome) -> Result<()> {
    begin(conn).await?;
    let result = confirm_in_tx(conn, operation, outcome).await;
    finish(conn, result).await
}

async fn confirm_in_tx(conn: &Connection, operation: &Operation, outcome: RemoteOutcome) -> Result<()> {
    let store = LibSqlLocalStore::new(conn);
    let log = LibSqlOperationLog::new(conn);

    match (&operation.payload, outcome) {
        (OperationPayload::CreateEvent { event_id, .. }, RemoteOutcome::EventCreated(remote)) => {
            if store.get_event(event_id).await?.is_some() {
                store.replace_event_id(event_id, &remote).await?;
            } else {
                store.put_event(&remote).await?;
            }
            let rewritten = log.substitute_entity_id(event_id, &remote.id).await?;
            tracing::debug!(
                "Event {event_id} confirmed as {}; rewrote {rewritten} queued operation(s)",
                remote.id
            );
        }
        (OperationPayload::DeleteEvent { event_id }, RemoteOutcome::EventDeleted) => {
            store.delete_event(event_id).await?;
        }
        (OperationPayload::AddCode { event_id, code_id, .. }, RemoteOutcome::CodeAdded(remote)) => {
            let event = store
                .get_event(event_id)
                .await?
                .ok_or_else(|| Error::Integrity(format!("event {event_id} no longer exists locally")))?;
            let confirmed = ScannedCode {
                is_deleted: event.is_deleted,
                is_confirmed: true,
                ..remote
            };
            store.replace_code_id(code_id, &confirmed).await?;
            store.refresh_event_count(event_id).await?;
        }
        (OperationPayload::ProcessCodes { event_id }, RemoteOutcome::CodesProcessed(refreshed)) => {
            let live = store
                .get_event(event_id)
                .await?
                .is_some_and(|event| event.is_live());
            if let (true, Some(codes)) = (live, refreshed) {
                merge_event_codes(&store, event_id, &codes).await?;
            }
        }
        (payload, outcome) => {
            return Err(Error::Database(format!(
                "{} cannot be confirmed with {outcome:?}",
                payload.kind()
            )));
        }
    }

    log.mark_succeeded(operation.local_id).await
}

/// Undo the optimistic write of a rejected operation and retire it.
///
/// `existing` is the record the remote reported as already holding the
/// rejected content; it replaces the optimistic code.
pub async fn reject(conn: &Connection, operation: &Operation, existing: Option<ScannedCode>) -> Result<()> {
    begin(conn).await?;
    let result = reject_in_tx(conn, operation, existing).await;
    finish(conn, result).await
}

async fn reject_in_tx(conn: &Connection, operation: &Operation, existing: Option<ScannedCode>) -> Result<()> {
    let store = LibSqlLocalStore::new(conn);
    let log = LibSqlOperationLog::new(conn);

    match &operation.payload {
        OperationPayload::CreateEvent { event_id, .. } => {
            // Everything queued against the temporary event dies with it
            let cancelled = log.cancel_for_entity(event_id, None).await?;
            store.delete_event(event_id).await?;
            tracing::debug!("Dropped temporary event {event_id} and {cancelled} operation(s)");
        }
        OperationPayload::DeleteEvent { event_id } => {
            store.restore_event(event_id).await?;
        }
        OperationPayload::AddCode { event_id, code_id, .. } => {
            store.delete_code(code_id).await?;
            if let Some(existing) = existing {
                let live = store
                    .get_event(&existing.event_id)
                    .await?
                    .is_some_and(|event| event.is_live());
                if live {
                    store
                        .put_code(&ScannedCode {
                            is_deleted: false,
                            is_confirmed: true,
                            ..existing
                        })
                        .await?;
                }
            }
            store.refresh_event_count(event_id).await?;
        }
        OperationPayload::ProcessCodes { .. } => {}
    }

    log.mark_succeeded(operation.local_id).await
}

/// Drop a dead-lettered operation and roll back its optimistic write.
pub async fn discard(conn: &Connection, local_id: i64) -> Result<Operation> {
    let operation = LibSqlOperationLog::new(conn)
        .get(local_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("operation {local_id}")))?;
    if operation.state != OperationState::DeadLetter {
        return Err(Error::InvalidInput(format!(
            "operation {local_id} is {}, not dead-lettered",
            operation.state.as_str()
        )));
    }
    reject(conn, &operation, None).await?;
    Ok(operation)
}
