//! Optimistic local writes and their log entries
//!
//! Every accepted mutation changes the local store and appends its operation
//! in the same transaction, so a crash never leaves an unjournaled write.

use libsql::Connection;

use crate::db::{begin, finish, LibSqlLocalStore, LibSqlOperationLog, LocalStore, OperationLog};
use crate::error::{Error, Result};
use crate::models::{
    CodeFilter, Event, Mutation, MutationReceipt, OperationPayload, ScannedCode,
};

/// Apply `mutation` locally and journal it
pub(crate) async fn apply_local(
    conn: &Connection,
    mutation: &Mutation,
    now: i64,
) -> Result<MutationReceipt> {
    begin(conn).await?;
    let result = apply_in_tx(conn, mutation, now).await;
    finish(conn, result).await
}

async fn apply_in_tx(conn: &Connection, mutation: &Mutation, now: i64) -> Result<MutationReceipt> {
    let store = LibSqlLocalStore::new(conn);
    let log = LibSqlOperationLog::new(conn);

    match mutation {
        Mutation::CreateEvent { name } => {
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::InvalidInput("Event name cannot be empty".to_string()));
            }

            let event = Event::new_local(name, now);
            store.put_event(&event).await?;
            let local_id = log
                .enqueue(
                    &OperationPayload::CreateEvent {
                        event_id: event.id.clone(),
                        name: event.name.clone(),
                    },
                    now,
                )
                .await?;
            tracing::debug!("Created event {} locally", event.id);
            Ok(MutationReceipt::EventCreated { local_id, event })
        }
        Mutation::DeleteEvent { event_id } => {
            require_live_event(&store, event_id).await?;
            store.tombstone_event(event_id).await?;
            let local_id = log
                .enqueue(
                    &OperationPayload::DeleteEvent {
                        event_id: event_id.clone(),
                    },
                    now,
                )
                .await?;
            tracing::debug!("Tombstoned event {event_id}");
            Ok(MutationReceipt::EventDeleted { local_id })
        }
        Mutation::AddCode { event_id, content } => {
            if content.trim().is_empty() {
                return Err(Error::InvalidInput("QR content cannot be empty".to_string()));
            }
            require_live_event(&store, event_id).await?;

            let code = ScannedCode::new_local(event_id.as_str(), content.as_str(), now);
            store.put_code(&code).await?;
            store.refresh_event_count(event_id).await?;
            let local_id = log
                .enqueue(
                    &OperationPayload::AddCode {
                        event_id: event_id.clone(),
                        code_id: code.id.clone(),
                        content: content.clone(),
                    },
                    now,
                )
                .await?;
            Ok(MutationReceipt::CodeAdded { local_id, code })
        }
        Mutation::ProcessCodes { event_id } => {
            require_live_event(&store, event_id).await?;
            let unprocessed = store
                .list_codes(&CodeFilter::for_event(event_id.as_str()).unprocessed())
                .await?;
            if unprocessed.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "Event {event_id} has no unprocessed codes"
                )));
            }

            let local_id = log
                .enqueue(
                    &OperationPayload::ProcessCodes {
                        event_id: event_id.clone(),
                    },
                    now,
                )
                .await?;
            Ok(MutationReceipt::ProcessingQueued { local_id })
        }
    }
}

async fn require_live_event(store: &LibSqlLocalStore<'_>, event_id: &str) -> Result<Event> {
    store
        .get_event(event_id)
        .await?
        .filter(Event::is_live)
        .ok_or_else(|| Error::NotFound(format!("Event {event_id}")))
}
