//! Scanned code model

use serde::{Deserialize, Serialize};

use super::id::{is_temporary_id, temporary_id};

/// A QR code scanned at an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedCode {
    /// Remote id, or a `tmp-` id until the remote confirms it
    pub id: String,
    /// Owning event
    pub event_id: String,
    /// Decoded QR payload (immutable)
    pub content: String,
    /// AI-assigned category, once processed
    #[serde(default)]
    pub category: Option<String>,
    /// AI-written summary, once processed
    #[serde(default)]
    pub summary: Option<String>,
    /// Set once by AI processing, never reverted
    #[serde(default)]
    pub processed: bool,
    /// Scan timestamp (Unix ms)
    pub scanned_at: i64,
    /// Remote revision counter
    #[serde(default)]
    pub revision: i64,
    /// Tombstone: owning event is pending remote deletion
    #[serde(default)]
    pub is_deleted: bool,
    /// Record came from the remote authority
    #[serde(default)]
    pub is_confirmed: bool,
}

impl ScannedCode {
    /// Create an optimistic local code with a temporary id
    #[must_use]
    pub fn new_local(event_id: impl Into<String>, content: impl Into<String>, now: i64) -> Self {
        Self {
            id: temporary_id(),
            event_id: event_id.into(),
            content: content.into(),
            category: None,
            summary: None,
            processed: false,
            scanned_at: now,
            revision: 0,
            is_deleted: false,
            is_confirmed: false,
        }
    }

    #[must_use]
    pub fn is_temporary(&self) -> bool {
        is_temporary_id(&self.id)
    }

    /// First line of the content, truncated to `max_len` characters
    #[must_use]
    pub fn preview(&self, max_len: usize) -> String {
        let first_line = self.content.lines().next().unwrap_or("");
        if first_line.chars().count() <= max_len {
            return first_line.to_string();
        }
        let truncated: String = first_line.chars().take(max_len.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

/// Filter for code listings; results are always in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeFilter {
    pub event_id: Option<String>,
    pub processed: Option<bool>,
    pub include_deleted: bool,
}

impl CodeFilter {
    /// Live codes of one event
    #[must_use]
    pub fn for_event(event_id: impl Into<String>) -> Self {
        Self {
            event_id: Some(event_id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn unprocessed(mut self) -> Self {
        self.processed = Some(false);
        self
    }

    #[must_use]
    pub const fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }
}
