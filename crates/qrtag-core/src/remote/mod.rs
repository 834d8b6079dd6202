//! Remote API client abstraction
//!
//! The remote authority owns ids, revisions, uniqueness of code content per
//! event, and AI enrichment. Everything local talks to it through
//! [`RemoteClient`], which has an HTTP implementation for the real API and an
//! in-process one for tests and demos.

mod http;
mod memory;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Event, ScannedCode};

pub use http::HttpRemoteClient;
pub use memory::{classify_content, MemoryRemote, RemoteCall};

/// Errors returned by the remote API, split into transient and permanent
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Connection refused, DNS failure, connection reset
    #[error("Network error: {0}")]
    Network(String),

    /// No response within the configured timeout
    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    /// 5xx response
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Response body did not have the expected shape
    #[error("Invalid response payload: {0}")]
    InvalidPayload(String),

    /// 409: the code already exists in the event
    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        /// The record that already holds the content, when the server says so
        existing: Option<Box<ScannedCode>>,
    },

    /// 404 on the targeted record
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other 4xx
    #[error("Rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Login or registration refused
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Bearer token missing or expired
    #[error("Unauthorized: sign in again")]
    Unauthorized,
}

impl RemoteError {
    /// Whether retrying the same call later may succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::Server { .. } | Self::InvalidPayload(_)
        )
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Authenticated session returned by login/register
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub email: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Session")
            .field("token", &"[REDACTED]")
            .field("email", &self.email)
            .finish()
    }
}

/// Export formats offered by the API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unsupported export format '{other}'")),
        }
    }
}

/// Interface to the remote authority
///
/// Records returned by the client are authoritative and come back with
/// `is_confirmed` set.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Install or clear the bearer token used by subsequent calls
    fn set_token(&self, token: Option<&str>);

    fn has_token(&self) -> bool;

    async fn login(&self, email: &str, password: &str) -> RemoteResult<Session>;

    async fn register(&self, email: &str, password: &str) -> RemoteResult<Session>;

    async fn list_events(&self) -> RemoteResult<Vec<Event>>;

    async fn create_event(&self, name: &str) -> RemoteResult<Event>;

    async fn delete_event(&self, event_id: &str) -> RemoteResult<()>;

    async fn list_codes(&self, event_id: &str) -> RemoteResult<Vec<ScannedCode>>;

    /// Fails with `Conflict` when the event already holds `content`
    async fn add_code(&self, event_id: &str, content: &str) -> RemoteResult<ScannedCode>;

    /// Ask the server to categorize and summarize unprocessed codes
    async fn process_codes(&self, event_id: &str) -> RemoteResult<()>;

    async fn export_event(&self, event_id: &str, format: ExportFormat) -> RemoteResult<Vec<u8>>;
}

fn validate_credentials(email: &str, password: &str) -> RemoteResult<()> {
    if email.trim().is_empty() {
        return Err(RemoteError::Auth("Email is required".to_string()));
    }
    if password.trim().is_empty() {
        return Err(RemoteError::Auth("Password is required".to_string()));
    }
    Ok(())
}
