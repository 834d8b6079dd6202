//! Merging remote listings into the local store

use std::collections::{HashMap, HashSet};

use libsql::Connection;

use crate::db::{begin, finish, LibSqlLocalStore, LibSqlOperationLog, LocalStore, OperationLog};
use crate::error::Result;
use crate::models::{CodeFilter, Event, EventFilter, ScannedCode};

/// Remote events and the codes of each
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub events: Vec<Event>,
    pub codes: HashMap<String, Vec<ScannedCode>>,
}

/// What a merge changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub events_updated: usize,
    pub events_removed: usize,
    pub codes_updated: usize,
    pub codes_removed: usize,
    /// Events left alone because local work on them is still queued
    pub events_skipped: usize,
}

/// Merge a full remote snapshot in one transaction.
///
/// Entities with operations still in the log keep their local state, as do
/// temporary records. Confirmed local records the remote no longer has are
/// removed.
pub async fn apply_snapshot(conn: &Connection, snapshot: &RemoteSnapshot) -> Result<MergeReport> {
    begin(conn).await?;
    let result = apply_snapshot_in_tx(conn, snapshot).await;
    finish(conn, result).await
}

async fn apply_snapshot_in_tx(conn: &Connection, snapshot: &RemoteSnapshot) -> Result<MergeReport> {
    let store = LibSqlLocalStore::new(conn);
    let pending: HashSet<String> = LibSqlOperationLog::new(conn)
        .pending_entities()
        .await?
        .into_iter()
        .collect();
    let mut report = MergeReport::default();

    for remote in &snapshot.events {
        if pending.contains(&remote.id) {
            report.events_skipped += 1;
            continue;
        }

        let local = store.get_event(&remote.id).await?;
        if local.as_ref().is_some_and(|local| local.is_deleted) {
            report.events_skipped += 1;
            continue;
        }
        if local.as_ref().map_or(true, |local| local.revision <= remote.revision) {
            store
                .put_event(&Event {
                    is_deleted: false,
                    is_confirmed: true,
                    ..remote.clone()
                })
                .await?;
            report.events_updated += 1;
        }

        if let Some(codes) = snapshot.codes.get(&remote.id) {
            let (updated, removed) = merge_event_codes(&store, &remote.id, codes).await?;
            report.codes_updated += updated;
            report.codes_removed += removed;
        } else {
            store.refresh_event_count(&remote.id).await?;
        }
    }

    let remote_ids: HashSet<&str> = snapshot.events.iter().map(|event| event.id.as_str()).collect();
    for local in store.list_events(EventFilter::All).await? {
        if local.is_confirmed && !remote_ids.contains(local.id.as_str()) && !pending.contains(&local.id)
        {
            store.delete_event(&local.id).await?;
            report.events_removed += 1;
        }
    }

    Ok(report)
}

/// Merge the remote codes of one event; returns `(updated, removed)`.
///
/// Never lowers a revision and never reverts `processed`. Temporary codes
/// stay untouched.
pub async fn merge_event_codes(
    store: &LibSqlLocalStore<'_>,
    event_id: &str,
    remote_codes: &[ScannedCode],
) -> Result<(usize, usize)> {
    let mut updated = 0;

    for remote in remote_codes {
        let local = store.get_code(&remote.id).await?;
        if local.as_ref().is_some_and(|local| local.revision > remote.revision) {
            continue;
        }

        let mut merged = ScannedCode {
            event_id: event_id.to_string(),
            is_deleted: false,
            is_confirmed: true,
            ..remote.clone()
        };
        if let Some(local) = local.filter(|local| local.processed && !remote.processed) {
            merged.processed = true;
            merged.category = local.category;
            merged.summary = local.summary;
        }

        if local_differs(store, &merged).await? {
            store.put_code(&merged).await?;
            updated += 1;
        }
    }

    let remote_ids: HashSet<&str> = remote_codes.iter().map(|code| code.id.as_str()).collect();
    let mut removed = 0;
    for local in store
        .list_codes(&CodeFilter::for_event(event_id).with_deleted())
        .await?
    {
        if local.is_confirmed && !remote_ids.contains(local.id.as_str()) {
            store.delete_code(&local.id).await?;
            removed += 1;
        }
    }

    store.refresh_event_count(event_id).await?;
    Ok((updated, removed))
}

async fn local_differs(store: &LibSqlLocalStore<'_>, merged: &ScannedCode) -> Result<bool> {
    Ok(store.get_code(&merged.id).await?.as_ref() != Some(merged))
}
