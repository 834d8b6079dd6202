//! Event model

use serde::{Deserialize, Serialize};

use super::id::{is_temporary_id, temporary_id};

/// An event that scanned codes are collected under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Remote id, or a `tmp-` id until the remote confirms creation
    pub id: String,
    /// Display name
    pub name: String,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Number of live codes in the local store
    #[serde(default)]
    pub qr_count: i64,
    /// Remote revision counter, used to detect stale merges
    #[serde(default)]
    pub revision: i64,
    /// Tombstone: deleted locally, remote delete not yet confirmed
    #[serde(default)]
    pub is_deleted: bool,
    /// Record came from the remote authority
    #[serde(default)]
    pub is_confirmed: bool,
}

impl Event {
    /// Create an optimistic local event with a temporary id
    #[must_use]
    pub fn new_local(name: impl Into<String>, now: i64) -> Self {
        Self {
            id: temporary_id(),
            name: name.into(),
            created_at: now,
            qr_count: 0,
            revision: 0,
            is_deleted: false,
            is_confirmed: false,
        }
    }

    /// Whether the id is still a local placeholder
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        is_temporary_id(&self.id)
    }

    /// Visible to presentation (not tombstoned)
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !self.is_deleted
    }
}

/// Which events a listing returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EventFilter {
    /// Non-tombstoned events
    #[default]
    Live,
    /// Events pending remote deletion
    Tombstoned,
    /// Live events still waiting for remote confirmation
    Unconfirmed,
    /// Everything, tombstones included
    All,
}

impl EventFilter {
    pub(crate) const fn where_clause(self) -> &'static str {
        match self {
            Self::Live => "WHERE is_deleted = 0",
            Self::Tombstoned => "WHERE is_deleted = 1",
            Self::Unconfirmed => "WHERE is_deleted = 0 AND is_confirmed = 0",
            Self::All => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_local_event_is_temporary_and_live() {
        let event = Event::new_local("Career fair", 42);
        assert!(event.is_temporary());
        assert!(event.is_live());
        assert!(!event.is_confirmed);
        assert_eq!(event.created_at, 42);
        assert_eq!(event.qr_count, 0);
    }

    #[test]
    fn event_deserializes_without_local_flags() {
        let event: Event = serde_json::from_str(
            r#"{"id":"abc","name":"Expo","created_at":10,"qr_count":3,"revision":2}"#,
        )
        .unwrap();
        assert!(!event.is_deleted);
        assert!(!event.is_confirmed);
        assert_eq!(event.qr_count, 3);
    }
}
