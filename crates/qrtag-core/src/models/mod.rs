//! Data models for qrtag

mod code;
mod event;
mod id;
mod operation;

pub use code::{CodeFilter, ScannedCode};
pub use event::{Event, EventFilter};
pub use id::{is_temporary_id, temporary_id, TEMP_ID_PREFIX};
pub use operation::{
    FailureOutcome, Mutation, MutationReceipt, Operation, OperationKind, OperationPayload,
    OperationState,
};
