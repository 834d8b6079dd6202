//! Services shared by qrtag interfaces

mod mutations;
mod qrtag;
mod store_service;

pub use qrtag::QrTagService;
pub use store_service::{StorageMode, StoreService};
