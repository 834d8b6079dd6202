//! Shared setup for the engine scenarios

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use qrtag_core::config::SyncSettings;
use qrtag_core::remote::{MemoryRemote, RemoteClient};
use qrtag_core::sync::{SyncNotice, SyncStatus};
use qrtag_core::{QrTagService, StoreService};
use tokio::sync::broadcast;

/// Settings with no periodic trigger and near-instant retries
pub fn fast_settings() -> SyncSettings {
    SyncSettings::default()
        .without_interval()
        .with_backoff(Duration::from_millis(5), Duration::from_millis(20))
        .with_jitter(0.0)
}

pub async fn start(remote: &Arc<MemoryRemote>, settings: SyncSettings) -> QrTagService {
    let store = StoreService::open_in_memory().await.unwrap();
    QrTagService::start(store, as_client(remote), settings)
        .await
        .unwrap()
}

pub async fn start_offline(remote: &Arc<MemoryRemote>, settings: SyncSettings) -> QrTagService {
    let store = StoreService::open_in_memory().await.unwrap();
    QrTagService::start_offline(store, as_client(remote), settings)
        .await
        .unwrap()
}

pub fn as_client(remote: &Arc<MemoryRemote>) -> Arc<dyn RemoteClient> {
    Arc::clone(remote) as Arc<dyn RemoteClient>
}

/// Run passes until the log is empty
pub async fn drain(service: &QrTagService) {
    for _ in 0..20 {
        service.sync_now().await.unwrap();
        if service.status().pending_count == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("log did not drain: {:?}", service.status());
}

/// Run passes until the status satisfies `done`
pub async fn sync_until(service: &QrTagService, done: impl Fn(&SyncStatus) -> bool) {
    for _ in 0..40 {
        service.sync_now().await.unwrap();
        if done(&service.status()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("status never settled: {:?}", service.status());
}

/// Wait, without running passes, until the status satisfies `done`
pub async fn wait_for_status(service: &QrTagService, done: impl Fn(&SyncStatus) -> bool) {
    let mut receiver = service.watch_status();
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if done(&receiver.borrow_and_update()) {
                return;
            }
            if receiver.changed().await.is_err() {
                return;
            }
        }
    })
    .await;
    assert!(waited.is_ok(), "status never settled: {:?}", service.status());
}

pub fn collect_notices(receiver: &mut broadcast::Receiver<SyncNotice>) -> Vec<SyncNotice> {
    let mut notices = Vec::new();
    while let Ok(notice) = receiver.try_recv() {
        notices.push(notice);
    }
    notices
}
