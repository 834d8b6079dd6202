//! Operation log entries and the mutations that produce them

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Event, ScannedCode};

/// Kind of a queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateEvent,
    DeleteEvent,
    AddCode,
    ProcessCodes,
}

impl OperationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateEvent => "create_event",
            Self::DeleteEvent => "delete_event",
            Self::AddCode => "add_code",
            Self::ProcessCodes => "process_codes",
        }
    }

    /// Operations that a `DeleteEvent` on the same event makes pointless
    #[must_use]
    pub const fn is_superseded_by_delete(self) -> bool {
        matches!(self, Self::AddCode | Self::ProcessCodes)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_event" => Ok(Self::CreateEvent),
            "delete_event" => Ok(Self::DeleteEvent),
            "add_code" => Ok(Self::AddCode),
            "process_codes" => Ok(Self::ProcessCodes),
            other => Err(format!("unknown operation kind '{other}'")),
        }
    }
}

/// What the remote call needs, as persisted in the log
///
/// Every payload targets exactly one event; that event id is the entity key
/// used for FIFO ordering and in-flight exclusion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationPayload {
    CreateEvent {
        /// Temporary id of the optimistic local event
        event_id: String,
        name: String,
    },
    DeleteEvent {
        event_id: String,
    },
    AddCode {
        event_id: String,
        /// Temporary id of the optimistic local code
        code_id: String,
        content: String,
    },
    ProcessCodes {
        event_id: String,
    },
}

impl OperationPayload {
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::CreateEvent { .. } => OperationKind::CreateEvent,
            Self::DeleteEvent { .. } => OperationKind::DeleteEvent,
            Self::AddCode { .. } => OperationKind::AddCode,
            Self::ProcessCodes { .. } => OperationKind::ProcessCodes,
        }
    }

    /// The event this operation targets
    #[must_use]
    pub fn event_id(&self) -> &str {
        match self {
            Self::CreateEvent { event_id, .. }
            | Self::DeleteEvent { event_id }
            | Self::AddCode { event_id, .. }
            | Self::ProcessCodes { event_id } => event_id,
        }
    }

    /// Rewrite a temporary event id to the confirmed one.
    ///
    /// Returns `true` when the payload referenced `from`.
    pub fn substitute_event_id(&mut self, from: &str, to: &str) -> bool {
        let event_id = match self {
            Self::CreateEvent { event_id, .. }
            | Self::DeleteEvent { event_id }
            | Self::AddCode { event_id, .. }
            | Self::ProcessCodes { event_id } => event_id,
        };
        if event_id == from {
            *event_id = to.to_string();
            true
        } else {
            false
        }
    }
}

/// Lifecycle state of a log entry
///
/// `Succeeded`, `Rejected` and discarded entries leave the log, so only the
/// non-terminal states and the dead-letter state are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Queued,
    InFlight,
    DeadLetter,
}

impl OperationState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InFlight => "in_flight",
            Self::DeadLetter => "dead_letter",
        }
    }
}

impl FromStr for OperationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "in_flight" => Ok(Self::InFlight),
            "dead_letter" => Ok(Self::DeadLetter),
            other => Err(format!("unknown operation state '{other}'")),
        }
    }
}

/// A journaled local mutation awaiting remote confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Auto-increment key, defines FIFO order
    pub local_id: i64,
    pub payload: OperationPayload,
    pub state: OperationState,
    /// Enqueue timestamp (Unix ms)
    pub created_at: i64,
    /// Failed remote attempts so far
    pub attempt_count: u32,
    /// Earliest time the next attempt may start (Unix ms)
    pub next_retry_at: i64,
    /// Most recent failure, if any
    pub last_error: Option<String>,
}

impl Operation {
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.payload.kind()
    }

    #[must_use]
    pub fn entity_key(&self) -> &str {
        self.payload.event_id()
    }
}

/// Result of recording a transient failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back in the queue, eligible again at `next_retry_at`
    Rescheduled {
        attempt: u32,
        delay: Duration,
        next_retry_at: i64,
    },
    /// Retry ceiling reached; moved to dead-letter
    Abandoned { attempt: u32 },
}

/// A user-initiated change, as accepted from presentation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateEvent { name: String },
    DeleteEvent { event_id: String },
    AddCode { event_id: String, content: String },
    ProcessCodes { event_id: String },
}

/// Optimistic result of an accepted mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationReceipt {
    EventCreated { local_id: i64, event: Event },
    EventDeleted { local_id: i64 },
    CodeAdded { local_id: i64, code: ScannedCode },
    ProcessingQueued { local_id: i64 },
}

impl MutationReceipt {
    /// Key of the operation that was appended to the log
    #[must_use]
    pub const fn local_id(&self) -> i64 {
        match self {
            Self::EventCreated { local_id, .. }
            | Self::EventDeleted { local_id }
            | Self::CodeAdded { local_id, .. }
            | Self::ProcessingQueued { local_id } => *local_id,
        }
    }
}
