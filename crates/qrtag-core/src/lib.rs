//! qrtag-core - Core library for qrtag
//!
//! This crate contains the offline-first data layer shared by every qrtag
//! interface: the local store for events and scanned codes, the operation log
//! of unconfirmed mutations, the reconciler that drains it against the remote
//! API, and the orchestrator that decides when reconciliation runs.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Event, Mutation, Operation, OperationKind, ScannedCode};
pub use services::{QrTagService, StorageMode, StoreService};
pub use state::SyncState;
