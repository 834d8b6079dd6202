//! In-process remote authority
//!
//! Behaves like the REST API (id assignment, per-event content uniqueness,
//! AI enrichment, bearer sessions) and records every call, with hooks to
//! inject failures and latency.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{validate_credentials, ExportFormat, RemoteClient, RemoteError, RemoteResult, Session};
use crate::models::{Event, ScannedCode};
use crate::util::now_millis;

/// A call as observed by the in-process authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Login { email: String },
    Register { email: String },
    ListEvents,
    CreateEvent { name: String },
    DeleteEvent { event_id: String },
    ListCodes { event_id: String },
    AddCode { event_id: String, content: String },
    ProcessCodes { event_id: String },
    ExportEvent { event_id: String, format: ExportFormat },
}

impl RemoteCall {
    /// Calls that change remote state
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::CreateEvent { .. }
                | Self::DeleteEvent { .. }
                | Self::AddCode { .. }
                | Self::ProcessCodes { .. }
        )
    }
}

#[derive(Default)]
struct State {
    users: HashMap<String, String>,
    sessions: HashSet<String>,
    events: Vec<Event>,
    codes: Vec<ScannedCode>,
    next_id: u64,
    clock: i64,
    calls: Vec<RemoteCall>,
    failures: VecDeque<RemoteError>,
    offline: bool,
    latency: Option<Duration>,
    in_flight: usize,
    max_in_flight: usize,
}

impl State {
    fn mint_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:024x}", self.next_id)
    }

    fn tick(&mut self) -> i64 {
        self.clock = self.clock.max(now_millis()) + 1;
        self.clock
    }

    fn event_exists(&self, event_id: &str) -> bool {
        self.events.iter().any(|event| event.id == event_id)
    }

    fn event_with_count(&self, event: &Event) -> Event {
        let qr_count = self
            .codes
            .iter()
            .filter(|code| code.event_id == event.id)
            .count();
        Event {
            qr_count: i64::try_from(qr_count).unwrap_or(i64::MAX),
            ..event.clone()
        }
    }

    fn event_codes(&self, event_id: &str) -> Vec<ScannedCode> {
        self.codes
            .iter()
            .filter(|code| code.event_id == event_id)
            .cloned()
            .collect()
    }

    fn insert_event(&mut self, name: &str) -> Event {
        let event = Event {
            id: self.mint_id(),
            name: name.trim().to_string(),
            created_at: self.tick(),
            qr_count: 0,
            revision: 1,
            is_deleted: false,
            is_confirmed: true,
        };
        self.events.push(event.clone());
        event
    }

    fn insert_code(&mut self, event_id: &str, content: &str) -> RemoteResult<ScannedCode> {
        if !self.event_exists(event_id) {
            return Err(RemoteError::NotFound("Event not found".to_string()));
        }
        if let Some(existing) = self
            .codes
            .iter()
            .find(|code| code.event_id == event_id && code.content == content)
        {
            return Err(RemoteError::Conflict {
                message: "QR code already scanned".to_string(),
                existing: Some(Box::new(existing.clone())),
            });
        }

        let code = ScannedCode {
            id: self.mint_id(),
            event_id: event_id.to_string(),
            content: content.to_string(),
            category: None,
            summary: None,
            processed: false,
            scanned_at: self.tick(),
            revision: 1,
            is_deleted: false,
            is_confirmed: true,
        };
        self.codes.push(code.clone());
        Ok(code)
    }

    fn issue_session(&mut self, email: &str) -> Session {
        let token = format!("session-{}", self.mint_id());
        self.sessions.insert(token.clone());
        Session {
            token,
            email: email.to_string(),
        }
    }
}

/// In-process `RemoteClient`
pub struct MemoryRemote {
    state: Mutex<State>,
    token: RwLock<Option<String>>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// An authority with one signed-in session, ready for data calls
    #[must_use]
    pub fn new() -> Self {
        let remote = Self::signed_out();
        let session = remote.state().issue_session("tester@example.com");
        remote.set_token(Some(&session.token));
        remote
    }

    /// An authority without any session; data calls fail `Unauthorized`
    #[must_use]
    pub fn signed_out() -> Self {
        Self {
            state: Mutex::new(State::default()),
            token: RwLock::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an account for login tests
    pub fn add_user(&self, email: &str, password: &str) {
        self.state()
            .users
            .insert(email.trim().to_string(), password.to_string());
    }

    /// Create an event directly, without recording a call
    pub fn seed_event(&self, name: &str) -> Event {
        self.state().insert_event(name)
    }

    /// Add a code directly, without recording a call
    pub fn seed_code(&self, event_id: &str, content: &str) -> RemoteResult<ScannedCode> {
        self.state().insert_code(event_id, content)
    }

    /// Fail the next call with `error`
    pub fn fail_next(&self, error: RemoteError) {
        self.state().failures.push_back(error);
    }

    /// Fail the next `count` calls with `error`
    pub fn fail_next_n(&self, error: &RemoteError, count: usize) {
        let mut state = self.state();
        for _ in 0..count {
            state.failures.push_back(error.clone());
        }
    }

    /// While offline every call fails with a network error
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state().latency = latency;
    }

    /// Invalidate every issued session
    pub fn expire_sessions(&self) {
        self.state().sessions.clear();
    }

    pub fn events(&self) -> Vec<Event> {
        let state = self.state();
        state
            .events
            .iter()
            .map(|event| state.event_with_count(event))
            .collect()
    }

    pub fn codes(&self, event_id: &str) -> Vec<ScannedCode> {
        self.state().event_codes(event_id)
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    /// Recorded calls that change remote state, in order
    pub fn mutating_calls(&self) -> Vec<RemoteCall> {
        self.state()
            .calls
            .iter()
            .filter(|call| call.is_mutating())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Highest number of calls observed running at once
    pub fn max_concurrent_calls(&self) -> usize {
        self.state().max_in_flight
    }

    fn current_token(&self) -> Option<String> {
        self.token.read().ok().and_then(|token| token.clone())
    }

    /// Record the call, wait out the latency, then apply injected failures
    async fn enter(&self, call: RemoteCall, authorized: bool) -> RemoteResult<InFlight<'_>> {
        let latency = {
            let mut state = self.state();
            state.calls.push(call);
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.latency
        };
        let guard = InFlight(self);

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let token = self.current_token();
        let mut state = self.state();
        if state.offline {
            return Err(RemoteError::Network("connection refused".to_string()));
        }
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        if authorized && !token.is_some_and(|token| state.sessions.contains(&token)) {
            return Err(RemoteError::Unauthorized);
        }
        drop(state);
        Ok(guard)
    }
}

struct InFlight<'a>(&'a MemoryRemote);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state();
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    fn set_token(&self, token: Option<&str>) {
        if let Ok(mut current) = self.token.write() {
            *current = token.map(ToString::to_string);
        }
    }

    fn has_token(&self) -> bool {
        self.current_token().is_some()
    }

    async fn login(&self, email: &str, password: &str) -> RemoteResult<Session> {
        let _call = self
            .enter(RemoteCall::Login { email: email.to_string() }, false)
            .await?;
        validate_credentials(email, password)?;

        let mut state = self.state();
        let email = email.trim();
        match state.users.get(email) {
            Some(stored) if stored == password => Ok(state.issue_session(email)),
            _ => Err(RemoteError::Auth("Invalid email or password".to_string())),
        }
    }

    async fn register(&self, email: &str, password: &str) -> RemoteResult<Session> {
        let _call = self
            .enter(RemoteCall::Register { email: email.to_string() }, false)
            .await?;
        validate_credentials(email, password)?;

        let mut state = self.state();
        let email = email.trim();
        if state.users.contains_key(email) {
            return Err(RemoteError::Auth("User already exists".to_string()));
        }
        state.users.insert(email.to_string(), password.to_string());
        Ok(state.issue_session(email))
    }

    async fn list_events(&self) -> RemoteResult<Vec<Event>> {
        let _call = self.enter(RemoteCall::ListEvents, true).await?;
        let state = self.state();
        let mut events: Vec<Event> = state
            .events
            .iter()
            .map(|event| state.event_with_count(event))
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(events)
    }

    async fn create_event(&self, name: &str) -> RemoteResult<Event> {
        let _call = self
            .enter(RemoteCall::CreateEvent { name: name.to_string() }, true)
            .await?;
        if name.trim().is_empty() {
            return Err(RemoteError::Rejected {
                status: 400,
                message: "Event name is required".to_string(),
            });
        }
        let event = self.state().insert_event(name);
        Ok(event)
    }

    async fn delete_event(&self, event_id: &str) -> RemoteResult<()> {
        let _call = self
            .enter(
                RemoteCall::DeleteEvent {
                    event_id: event_id.to_string(),
                },
                true,
            )
            .await?;
        let mut state = self.state();
        if !state.event_exists(event_id) {
            return Err(RemoteError::NotFound("Event not found".to_string()));
        }
        state.events.retain(|event| event.id != event_id);
        state.codes.retain(|code| code.event_id != event_id);
        Ok(())
    }

    async fn list_codes(&self, event_id: &str) -> RemoteResult<Vec<ScannedCode>> {
        let _call = self
            .enter(
                RemoteCall::ListCodes {
                    event_id: event_id.to_string(),
                },
                true,
            )
            .await?;
        let state = self.state();
        if !state.event_exists(event_id) {
            return Err(RemoteError::NotFound("Event not found".to_string()));
        }
        Ok(state.event_codes(event_id))
    }

    async fn add_code(&self, event_id: &str, content: &str) -> RemoteResult<ScannedCode> {
        let _call = self
            .enter(
                RemoteCall::AddCode {
                    event_id: event_id.to_string(),
                    content: content.to_string(),
                },
                true,
            )
            .await?;
        if content.is_empty() {
            return Err(RemoteError::Rejected {
                status: 400,
                message: "Content is required".to_string(),
            });
        }
        let result = self.state().insert_code(event_id, content);
        result
    }

    async fn process_codes(&self, event_id: &str) -> RemoteResult<()> {
        let _call = self
            .enter(
                RemoteCall::ProcessCodes {
                    event_id: event_id.to_string(),
                },
                true,
            )
            .await?;
        let mut state = self.state();
        if !state.event_exists(event_id) {
            return Err(RemoteError::NotFound("Event not found".to_string()));
        }
        for code in state
            .codes
            .iter_mut()
            .filter(|code| code.event_id == event_id && !code.processed)
        {
            let (category, summary) = classify_content(&code.content);
            code.category = Some(category.to_string());
            code.summary = Some(summary);
            code.processed = true;
            code.revision += 1;
        }
        Ok(())
    }

    async fn export_event(&self, event_id: &str, format: ExportFormat) -> RemoteResult<Vec<u8>> {
        let _call = self
            .enter(
                RemoteCall::ExportEvent {
                    event_id: event_id.to_string(),
                    format,
                },
                true,
            )
            .await?;
        let state = self.state();
        let event = state
            .events
            .iter()
            .find(|event| event.id == event_id)
            .map(|event| state.event_with_count(event))
            .ok_or_else(|| RemoteError::NotFound("Event not found".to_string()))?;
        let codes = state.event_codes(event_id);

        match format {
            ExportFormat::Json => {
                let body = json!({ "event": event, "qr_codes": codes });
                serde_json::to_vec_pretty(&body)
                    .map_err(|error| RemoteError::InvalidPayload(error.to_string()))
            }
            ExportFormat::Csv => Ok(render_csv(&codes).into_bytes()),
        }
    }
}

/// Deterministic stand-in for the AI categorizer.
///
/// Returns one of the categories the API assigns and a short summary.
#[must_use]
pub fn classify_content(content: &str) -> (&'static str, String) {
    let trimmed = content.trim();
    let lower = trimmed.to_ascii_lowercase();

    let category = if lower.starts_with("begin:vcard") || lower.starts_with("mecard:") {
        "Business Contact"
    } else if lower.starts_with("wifi:") {
        "WiFi"
    } else if lower.starts_with("geo:") {
        "Location"
    } else if lower.starts_with("begin:vevent") {
        "Event Info"
    } else if ["bitcoin:", "upi:", "paypal"]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
    {
        "Payment"
    } else if lower.starts_with("http://") || lower.starts_with("https://") {
        let social = ["linkedin.com", "twitter.com", "x.com/", "instagram.com", "facebook.com"];
        if social.iter().any(|host| lower.contains(host)) {
            "Social Media"
        } else {
            "Website"
        }
    } else {
        "Other"
    };

    let preview: String = trimmed.chars().take(100).collect();
    let summary = if trimmed.chars().count() > 100 {
        format!("{category}: {preview}...")
    } else {
        format!("{category}: {preview}")
    };
    (category, summary)
}

fn render_csv(codes: &[ScannedCode]) -> String {
    let mut out = String::from("id,content,category,summary,processed,scanned_at\n");
    for code in codes {
        let row = [
            code.id.clone(),
            code.content.clone(),
            code.category.clone().unwrap_or_default(),
            code.summary.clone().unwrap_or_default(),
            code.processed.to_string(),
            code.scanned_at.to_string(),
        ];
        let escaped: Vec<String> = row.iter().map(|field| csv_field(field)).collect();
        out.push_str(&escaped.join(","));
        out.push('\n');
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_duplicate_content_conflicts_with_existing_record() {
        let remote = MemoryRemote::new();
        let event = remote.create_event("Expo").await.unwrap();

        let first = remote.add_code(&event.id, "dup").await.unwrap();
        let Err(RemoteError::Conflict { existing, .. }) = remote.add_code(&event.id, "dup").await
        else {
            panic!("expected conflict");
        };
        assert_eq!(existing.unwrap().id, first.id);
        assert_eq!(remote.codes(&event.id).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_process_codes_enriches_once() {
        let remote = MemoryRemote::new();
        let event = remote.seed_event("Expo");
        remote.seed_code(&event.id, "WIFI:S:guest;T:WPA;P:pw;;").unwrap();

        remote.process_codes(&event.id).await.unwrap();
        remote.process_codes(&event.id).await.unwrap();

        let codes = remote.codes(&event.id);
        assert!(codes[0].processed);
        assert_eq!(codes[0].category.as_deref(), Some("WiFi"));
        assert_eq!(codes[0].revision, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_calls_are_recorded_and_failures_injected() {
        let remote = MemoryRemote::new();
        remote.fail_next(RemoteError::Server {
            status: 503,
            message: "busy".to_string(),
        });

        assert!(remote.create_event("Expo").await.is_err());
        assert!(remote.create_event("Expo").await.is_ok());
        assert_eq!(remote.mutating_calls().len(), 2);
        assert_eq!(remote.events().len(), 1);

        remote.set_offline(true);
        assert!(matches!(
            remote.list_events().await,
            Err(RemoteError::Network(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sessions_gate_data_calls() {
        let remote = MemoryRemote::signed_out();
        assert_eq!(remote.list_events().await, Err(RemoteError::Unauthorized));

        remote.add_user("jane@example.com", "hunter2");
        assert!(matches!(
            remote.login("jane@example.com", "wrong").await,
            Err(RemoteError::Auth(_))
        ));
        let session = remote.login("jane@example.com", "hunter2").await.unwrap();
        remote.set_token(Some(&session.token));
        assert!(remote.list_events().await.is_ok());

        remote.expire_sessions();
        assert_eq!(remote.list_events().await, Err(RemoteError::Unauthorized));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_event_removes_codes() {
        let remote = MemoryRemote::new();
        let event = remote.seed_event("Expo");
        remote.seed_code(&event.id, "a").unwrap();

        remote.delete_event(&event.id).await.unwrap();
        assert!(remote.codes(&event.id).is_empty());
        assert!(matches!(
            remote.delete_event(&event.id).await,
            Err(RemoteError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_export_csv_escapes_fields() {
        let remote = MemoryRemote::new();
        let event = remote.seed_event("Expo");
        remote.seed_code(&event.id, "hello, \"world\"").unwrap();

        let csv = remote.export_event(&event.id, ExportFormat::Csv).await.unwrap();
        let csv = String::from_utf8(csv).unwrap();
        assert!(csv.starts_with("id,content,category"));
        assert!(csv.contains("\"hello, \"\"world\"\"\""));
    }

    #[test]
    fn classify_content_matches_categories() {
        assert_eq!(classify_content("https://example.com").0, "Website");
        assert_eq!(classify_content("https://www.linkedin.com/in/jane").0, "Social Media");
        assert_eq!(classify_content("BEGIN:VCARD\nFN:Jane").0, "Business Contact");
        assert_eq!(classify_content("geo:52.1,4.3").0, "Location");
        assert_eq!(classify_content("just text").0, "Other");

        let long = "x".repeat(150);
        assert!(classify_content(&long).1.ends_with("..."));
    }
}
