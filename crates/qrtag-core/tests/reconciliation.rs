//! End-to-end reconciliation against the in-process authority

mod support;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use qrtag_core::db::{Database, LibSqlOperationLog, OperationLog};
use qrtag_core::models::{CodeFilter, FailureOutcome, OperationKind, OperationPayload};
use qrtag_core::remote::{MemoryRemote, RemoteCall, RemoteError};
use qrtag_core::sync::{BackoffPolicy, SyncNotice};
use qrtag_core::SyncState;

use support::{
    collect_notices, drain, fast_settings, start, start_offline, sync_until, wait_for_status,
};

#[tokio::test(flavor = "multi_thread")]
async fn local_store_converges_with_remote_after_drain() {
    let remote = Arc::new(MemoryRemote::new());
    let service = start_offline(&remote, fast_settings()).await;

    let expo = service.create_event("Expo").await.unwrap();
    service.add_code(&expo.id, "https://example.com").await.unwrap();
    service.add_code(&expo.id, "WIFI:S:expo;T:WPA;P:secret;;").await.unwrap();
    let meetup = service.create_event("Meetup").await.unwrap();
    service.add_code(&meetup.id, "BEGIN:VCARD\nFN:Ana\nEND:VCARD").await.unwrap();
    service.process_codes(&expo.id).await.unwrap();

    service.set_online(true);
    drain(&service).await;

    let mut local = service
        .snapshot_events()
        .await
        .unwrap()
        .into_iter()
        .map(|event| (event.id, event.name, event.qr_count))
        .collect::<Vec<_>>();
    let mut authoritative = remote
        .events()
        .into_iter()
        .map(|event| (event.id, event.name, event.qr_count))
        .collect::<Vec<_>>();
    local.sort();
    authoritative.sort();
    assert_eq!(local, authoritative);

    for event in remote.events() {
        let local_codes = service
            .snapshot_codes(&event.id)
            .await
            .unwrap()
            .into_iter()
            .map(|code| (code.id, code.content, code.processed, code.category))
            .collect::<Vec<_>>();
        let remote_codes = remote
            .codes(&event.id)
            .into_iter()
            .map(|code| (code.id, code.content, code.processed, code.category))
            .collect::<Vec<_>>();
        assert_eq!(local_codes, remote_codes);
    }

    let status = service.status();
    assert_eq!(status.pending_count, 0);
    assert_eq!(status.state, SyncState::Synced);
    assert!(status.last_sync_at.is_some());

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn mark_succeeded_is_idempotent() {
    let db = Database::open_in_memory().await.unwrap();
    let log = LibSqlOperationLog::new(db.connection());

    let id = log
        .enqueue(
            &OperationPayload::CreateEvent {
                event_id: "tmp-1".to_string(),
                name: "Expo".to_string(),
            },
            0,
        )
        .await
        .unwrap();
    log.mark_in_flight(id).await.unwrap();

    log.mark_succeeded(id).await.unwrap();
    log.mark_succeeded(id).await.unwrap();

    assert_eq!(log.pending_count().await.unwrap(), 0);
    assert_eq!(log.get(id).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn create_event_is_confirmed_before_its_codes_are_sent() {
    let remote = Arc::new(MemoryRemote::new());
    let service = start_offline(&remote, fast_settings()).await;

    let event = service.create_event("Career fair").await.unwrap();
    assert!(event.is_temporary());
    service.add_code(&event.id, "first").await.unwrap();
    service.add_code(&event.id, "second").await.unwrap();

    service.set_online(true);
    drain(&service).await;

    let remote_event = remote.events().pop().unwrap();
    assert_eq!(
        remote.mutating_calls(),
        vec![
            RemoteCall::CreateEvent {
                name: "Career fair".to_string()
            },
            RemoteCall::AddCode {
                event_id: remote_event.id.clone(),
                content: "first".to_string()
            },
            RemoteCall::AddCode {
                event_id: remote_event.id.clone(),
                content: "second".to_string()
            },
        ]
    );

    assert!(service.store().get_event(&event.id).await.unwrap().is_none());
    let local = service.store().get_event(&remote_event.id).await.unwrap().unwrap();
    assert!(local.is_confirmed);
    assert_eq!(local.qr_count, 2);

    let codes = service.snapshot_codes(&remote_event.id).await.unwrap();
    assert_eq!(codes.len(), 2);
    assert!(codes.iter().all(|code| code.is_confirmed && !code.is_temporary()));
    assert_eq!(codes[0].content, "first");

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_content_resolves_to_the_existing_code() {
    let remote = Arc::new(MemoryRemote::new());
    let settings = fast_settings().with_pull_after_push(false);
    let service = start(&remote, settings).await;

    let event = service.create_event("Expo").await.unwrap();
    drain(&service).await;
    let event_id = remote.events().pop().unwrap().id;
    assert_ne!(event_id, event.id);

    // Another device scanned it first
    let existing = remote.seed_code(&event_id, "https://dup.example.com").unwrap();

    let mut notices = service.notices();
    let optimistic = service
        .add_code(&event_id, "https://dup.example.com")
        .await
        .unwrap();
    drain(&service).await;

    let codes = service
        .store()
        .list_codes(&CodeFilter::for_event(event_id.as_str()).with_deleted())
        .await
        .unwrap();
    assert_eq!(codes.len(), 1);
    assert_eq!(codes[0].id, existing.id);
    assert!(service.store().get_code(&optimistic.id).await.unwrap().is_none());
    assert!(service.pending_operations().await.unwrap().is_empty());
    assert_eq!(remote.codes(&event_id).len(), 1);

    let rejected = collect_notices(&mut notices)
        .into_iter()
        .filter(|notice| matches!(notice, SyncNotice::Rejected { kind: OperationKind::AddCode, .. }))
        .count();
    assert_eq!(rejected, 1);

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_failures_back_off_then_dead_letter() {
    let db = Database::open_in_memory().await.unwrap();
    let log = LibSqlOperationLog::with_backoff(db.connection(), BackoffPolicy::default());
    let id = log
        .enqueue(
            &OperationPayload::ProcessCodes {
                event_id: "e1".to_string(),
            },
            0,
        )
        .await
        .unwrap();

    let mut now = 0;
    let expected_secs = [2.0, 4.0, 8.0];
    for attempt in 1..=8_u32 {
        log.mark_in_flight(id).await.unwrap();
        let outcome = log.mark_failed(id, "HTTP 503", now).await.unwrap();

        match outcome {
            FailureOutcome::Rescheduled {
                attempt: counted,
                delay,
                next_retry_at,
            } => {
                assert!(attempt < 8, "attempt {attempt} should have been abandoned");
                assert_eq!(counted, attempt);
                if let Some(nominal) = expected_secs.get(attempt as usize - 1) {
                    let secs = delay.as_secs_f64();
                    assert!(
                        secs >= nominal * 0.8 - 0.001 && secs <= nominal * 1.2 + 0.001,
                        "attempt {attempt}: {secs}s outside {nominal}s ±20%"
                    );
                }
                assert!(log.ready(now, 10).await.unwrap().is_empty());
                now = next_retry_at;
            }
            FailureOutcome::Abandoned { attempt: counted } => {
                assert_eq!(attempt, 8);
                assert_eq!(counted, 8);
            }
        }
    }

    let dead = log.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempt_count, 8);
    assert_eq!(log.pending_count().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_failure_keeps_local_state_and_retries() {
    let remote = Arc::new(MemoryRemote::new());
    let settings = fast_settings().with_backoff(Duration::from_millis(200), Duration::from_secs(1));
    let service = start_offline(&remote, settings).await;
    let event = service.create_event("Expo").await.unwrap();

    remote.fail_next(RemoteError::Server {
        status: 503,
        message: "unavailable".to_string(),
    });
    service.set_online(true);
    // Whichever of the two passes runs first consumes the failure
    service.sync_now().await.unwrap();

    let pending = service.pending_operations().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempt_count, 1);
    assert!(pending[0].last_error.as_deref().unwrap().contains("503"));
    assert!(service.store().get_event(&event.id).await.unwrap().is_some());
    assert!(remote.events().is_empty());

    drain(&service).await;
    assert!(service.store().get_event(&event.id).await.unwrap().is_none());
    assert_eq!(remote.events().len(), 1);
    assert_eq!(
        remote
            .mutating_calls()
            .iter()
            .filter(|call| matches!(call, RemoteCall::CreateEvent { .. }))
            .count(),
        2
    );

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_remote_times_out_and_is_retried_later() {
    let remote = Arc::new(MemoryRemote::new());
    let settings = fast_settings()
        .with_remote_timeout(Duration::from_millis(50))
        .with_backoff(Duration::from_secs(1), Duration::from_secs(2));
    let service = start_offline(&remote, settings).await;
    let event = service.create_event("Expo").await.unwrap();
    remote.set_latency(Some(Duration::from_millis(200)));

    service.set_online(true);
    wait_for_status(&service, |status| status.passes_completed >= 1).await;

    let pending = service.pending_operations().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempt_count, 1);
    assert!(pending[0].last_error.as_deref().unwrap().contains("timed out"));
    let status = service.status();
    assert_eq!(status.state, SyncState::Error);
    assert!(status.last_error.as_deref().unwrap().contains("timed out"));
    assert!(remote.events().is_empty());
    assert!(service.store().get_event(&event.id).await.unwrap().is_some());

    remote.set_latency(None);
    tokio::time::sleep(Duration::from_millis(1100)).await;
    drain(&service).await;
    assert_eq!(remote.events().len(), 1);

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_operation_waits_in_dead_letter_until_retried() {
    let remote = Arc::new(MemoryRemote::new());
    let settings = fast_settings().with_max_attempts(2);
    let service = start_offline(&remote, settings).await;
    let mut notices = service.notices();

    let event = service.create_event("Expo").await.unwrap();
    remote.fail_next_n(&RemoteError::Network("connection reset".to_string()), 2);
    service.set_online(true);
    sync_until(&service, |status| status.dead_letter_count == 1).await;

    let dead = service.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].kind(), OperationKind::CreateEvent);
    assert_eq!(service.status().pending_count, 0);
    assert_eq!(service.status().state, SyncState::Error);
    assert!(service.store().get_event(&event.id).await.unwrap().is_some());
    assert!(collect_notices(&mut notices)
        .iter()
        .any(|notice| matches!(notice, SyncNotice::Abandoned { attempts: 2, .. })));

    service.retry_dead_letter(dead[0].local_id).await.unwrap();
    drain(&service).await;
    assert!(service.dead_letters().await.unwrap().is_empty());
    assert_eq!(remote.events().len(), 1);

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn discarding_a_dead_letter_rolls_back_the_optimistic_write() {
    let remote = Arc::new(MemoryRemote::new());
    let settings = fast_settings().with_max_attempts(1);
    let service = start_offline(&remote, settings).await;

    let event = service.create_event("Expo").await.unwrap();
    remote.fail_next(RemoteError::Timeout(Duration::from_secs(15)));
    service.set_online(true);
    sync_until(&service, |status| status.dead_letter_count == 1).await;

    let dead = service.dead_letters().await.unwrap();
    let discarded = service.discard_dead_letter(dead[0].local_id).await.unwrap();
    assert_eq!(discarded.kind(), OperationKind::CreateEvent);

    assert!(service.store().get_event(&event.id).await.unwrap().is_none());
    assert!(service.dead_letters().await.unwrap().is_empty());
    assert!(remote.events().is_empty());

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn deleting_an_event_collects_its_codes() {
    let remote = Arc::new(MemoryRemote::new());
    let service = start(&remote, fast_settings()).await;

    let event = service.create_event("Expo").await.unwrap();
    drain(&service).await;
    let event_id = remote.events().pop().unwrap().id;
    service.add_code(&event_id, "a").await.unwrap();
    service.add_code(&event_id, "b").await.unwrap();
    drain(&service).await;
    assert_eq!(remote.codes(&event_id).len(), 2);
    assert_ne!(event.id, event_id);

    service.delete_event(&event_id).await.unwrap();
    assert!(service.snapshot_events().await.unwrap().is_empty());
    drain(&service).await;

    assert!(service.store().get_event(&event_id).await.unwrap().is_none());
    let leftovers = service
        .store()
        .list_codes(&CodeFilter::for_event(event_id.as_str()).with_deleted())
        .await
        .unwrap();
    assert!(leftovers.is_empty());
    assert!(remote.events().is_empty());

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn deleting_before_sync_never_uploads_the_codes() {
    let remote = Arc::new(MemoryRemote::new());
    let service = start_offline(&remote, fast_settings()).await;

    let event = service.create_event("Expo").await.unwrap();
    service.add_code(&event.id, "a").await.unwrap();
    service.delete_event(&event.id).await.unwrap();

    let kinds = service
        .pending_operations()
        .await
        .unwrap()
        .iter()
        .map(|operation| operation.kind())
        .collect::<Vec<_>>();
    assert_eq!(kinds, vec![OperationKind::CreateEvent, OperationKind::DeleteEvent]);

    service.set_online(true);
    drain(&service).await;

    assert!(remote
        .mutating_calls()
        .iter()
        .all(|call| !matches!(call, RemoteCall::AddCode { .. })));
    assert!(remote.events().is_empty());
    let events = service
        .store()
        .list_events(qrtag_core::models::EventFilter::All)
        .await
        .unwrap();
    assert!(events.is_empty());

    service.shutdown().await.unwrap();
}
