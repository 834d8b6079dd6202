//! Reconciliation of the operation log against the remote authority
//!
//! The [`Reconciler`] drains the log in passes; the [`SyncOrchestrator`]
//! decides when a pass runs and publishes [`SyncStatus`] snapshots.

mod apply;
pub mod backoff;
mod merge;
mod orchestrator;
mod reconciler;
mod status;

pub use backoff::BackoffPolicy;
pub use merge::{MergeReport, RemoteSnapshot};
pub use orchestrator::{SyncOrchestrator, SyncTrigger};
pub use reconciler::{PassReport, Reconciler};
pub use status::{Subscription, SyncNotice, SyncStatus};

pub(crate) use apply::discard;
