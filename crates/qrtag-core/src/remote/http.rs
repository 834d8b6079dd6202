//! HTTP client for the qrtag REST API

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::{validate_credentials, ExportFormat, RemoteClient, RemoteError, RemoteResult, Session};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::models::{Event, ScannedCode};
use crate::util::{excerpt, now_millis, parse_timestamp_millis};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ERROR_EXCERPT_CHARS: usize = 180;

/// `RemoteClient` over the REST API
///
/// Request timeouts are left to the caller (the reconciler wraps every call).
pub struct HttpRemoteClient {
    base_url: String,
    client: reqwest::Client,
    token: RwLock<Option<String>>,
}

impl HttpRemoteClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base_url = config
            .resolve_api_base_url()
            .map_err(Error::InvalidInput)?;
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|error| Error::InvalidInput(format!("HTTP client setup failed: {error}")))?;

        Ok(Self {
            base_url,
            client,
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn event_path(event_id: &str, suffix: &str) -> String {
        format!("/events/{}{suffix}", urlencoding::encode(event_id))
    }

    fn current_token(&self) -> Option<String> {
        self.token.read().ok().and_then(|token| token.clone())
    }

    /// Send an authenticated request; non-2xx responses become errors
    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let token = self.current_token().ok_or(RemoteError::Unauthorized)?;
        let response = request
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, &body))
    }

    async fn authenticate(&self, path: &str, email: &str, password: &str) -> RemoteResult<Session> {
        validate_credentials(email, password)?;

        let response = self
            .client
            .post(self.url(path))
            .header("Accept", "application/json")
            .json(&json!({ "email": email.trim(), "password": password }))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Auth(parse_api_error(status, &body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }

        let payload: AuthResponse = read_json(response).await?;
        let token = payload
            .token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| RemoteError::InvalidPayload("response did not include token".into()))?;

        Ok(Session {
            token,
            email: payload.email.unwrap_or_else(|| email.trim().to_string()),
        })
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    fn set_token(&self, token: Option<&str>) {
        if let Ok(mut current) = self.token.write() {
            *current = token.map(ToString::to_string);
        }
    }

    fn has_token(&self) -> bool {
        self.current_token().is_some()
    }

    async fn login(&self, email: &str, password: &str) -> RemoteResult<Session> {
        self.authenticate("/auth/login", email, password).await
    }

    async fn register(&self, email: &str, password: &str) -> RemoteResult<Session> {
        self.authenticate("/auth/register", email, password).await
    }

    async fn list_events(&self) -> RemoteResult<Vec<Event>> {
        let response = self.send(self.client.get(self.url("/events"))).await?;
        let payload: EventsResponse = read_json(response).await?;
        payload.events.into_iter().map(WireEvent::into_event).collect()
    }

    async fn create_event(&self, name: &str) -> RemoteResult<Event> {
        let response = self
            .send(
                self.client
                    .post(self.url("/events"))
                    .json(&json!({ "name": name })),
            )
            .await?;
        let payload: EventResponse = read_json(response).await?;
        payload.event.into_event()
    }

    async fn delete_event(&self, event_id: &str) -> RemoteResult<()> {
        self.send(
            self.client
                .delete(self.url(&Self::event_path(event_id, ""))),
        )
        .await?;
        Ok(())
    }

    async fn list_codes(&self, event_id: &str) -> RemoteResult<Vec<ScannedCode>> {
        let response = self
            .send(
                self.client
                    .get(self.url(&Self::event_path(event_id, "/qrcodes"))),
            )
            .await?;
        let payload: CodesResponse = read_json(response).await?;
        let mut codes = payload
            .qr_codes
            .into_iter()
            .map(|code| code.into_code(event_id))
            .collect::<RemoteResult<Vec<_>>>()?;
        // The API lists newest first
        codes.sort_by_key(|code| code.scanned_at);
        Ok(codes)
    }

    async fn add_code(&self, event_id: &str, content: &str) -> RemoteResult<ScannedCode> {
        let response = self
            .send(
                self.client
                    .post(self.url(&Self::event_path(event_id, "/qrcodes")))
                    .json(&json!({ "content": content })),
            )
            .await?;
        let payload: CodeResponse = read_json(response).await?;
        payload.qr_code.into_code(event_id)
    }

    async fn process_codes(&self, event_id: &str) -> RemoteResult<()> {
        self.send(
            self.client
                .post(self.url(&Self::event_path(event_id, "/qrcodes/process"))),
        )
        .await?;
        Ok(())
    }

    async fn export_event(&self, event_id: &str, format: ExportFormat) -> RemoteResult<Vec<u8>> {
        let response = self
            .send(
                self.client
                    .get(self.url(&Self::event_path(event_id, "/export")))
                    .query(&[("format", format.as_str())]),
            )
            .await?;
        let bytes = response.bytes().await.map_err(map_transport_error)?;
        Ok(bytes.to_vec())
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> RemoteResult<T> {
    let body = response.text().await.map_err(map_transport_error)?;
    serde_json::from_str(&body).map_err(|error| {
        let snippet = excerpt(&body, ERROR_EXCERPT_CHARS);
        RemoteError::InvalidPayload(format!("{error} in '{snippet}'"))
    })
}

fn map_transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout(CONNECT_TIMEOUT)
    } else if error.is_decode() {
        RemoteError::InvalidPayload(error.to_string())
    } else {
        RemoteError::Network(error.to_string())
    }
}

fn map_status(status: StatusCode, body: &str) -> RemoteError {
    let message = parse_api_error(status, body);
    match status {
        StatusCode::UNAUTHORIZED => RemoteError::Unauthorized,
        StatusCode::CONFLICT => RemoteError::Conflict {
            message,
            existing: parse_conflict_record(body),
        },
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        status if status.is_server_error() => RemoteError::Server {
            status: status.as_u16(),
            message,
        },
        status => RemoteError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.error.or(payload.message) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = excerpt(body, ERROR_EXCERPT_CHARS);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} ({})", status.as_u16())
    }
}

fn parse_conflict_record(body: &str) -> Option<Box<ScannedCode>> {
    #[derive(Deserialize)]
    struct ConflictBody {
        qr_code: Option<WireCode>,
    }

    let payload: ConflictBody = serde_json::from_str(body).ok()?;
    let wire = payload.qr_code?;
    let event_id = wire.event_id.clone()?;
    wire.into_code(&event_id).ok().map(Box::new)
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<WireEvent>,
}

#[derive(Debug, Deserialize)]
struct EventResponse {
    event: WireEvent,
}

#[derive(Debug, Deserialize)]
struct CodesResponse {
    #[serde(default)]
    qr_codes: Vec<WireCode>,
}

#[derive(Debug, Deserialize)]
struct CodeResponse {
    qr_code: WireCode,
}

/// Timestamps arrive as ISO strings from the API, as millis from newer builds
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Millis(i64),
    Text(String),
}

impl WireTimestamp {
    fn to_millis(&self) -> RemoteResult<i64> {
        match self {
            Self::Millis(value) => Ok(*value),
            Self::Text(text) => parse_timestamp_millis(text)
                .ok_or_else(|| RemoteError::InvalidPayload(format!("invalid timestamp '{text}'"))),
        }
    }
}

fn timestamp_or_now(value: Option<&WireTimestamp>) -> RemoteResult<i64> {
    value.map_or_else(|| Ok(now_millis()), WireTimestamp::to_millis)
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    id: String,
    name: String,
    created_at: Option<WireTimestamp>,
    #[serde(default)]
    qr_count: Option<i64>,
    #[serde(default)]
    revision: Option<i64>,
}

impl WireEvent {
    fn into_event(self) -> RemoteResult<Event> {
        Ok(Event {
            created_at: timestamp_or_now(self.created_at.as_ref())?,
            id: self.id,
            name: self.name,
            qr_count: self.qr_count.unwrap_or(0),
            revision: self.revision.unwrap_or(1),
            is_deleted: false,
            is_confirmed: true,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireCode {
    id: String,
    event_id: Option<String>,
    content: String,
    category: Option<String>,
    summary: Option<String>,
    #[serde(default)]
    processed: bool,
    scanned_at: Option<WireTimestamp>,
    #[serde(default)]
    revision: Option<i64>,
}

impl WireCode {
    fn into_code(self, event_id: &str) -> RemoteResult<ScannedCode> {
        Ok(ScannedCode {
            scanned_at: timestamp_or_now(self.scanned_at.as_ref())?,
            id: self.id,
            event_id: self.event_id.unwrap_or_else(|| event_id.to_string()),
            content: self.content,
            category: self.category,
            summary: self.summary,
            processed: self.processed,
            revision: self.revision.unwrap_or(1),
            is_deleted: false,
            is_confirmed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn status_mapping_classifies_errors() {
        assert_eq!(map_status(StatusCode::UNAUTHORIZED, ""), RemoteError::Unauthorized);
        assert!(matches!(
            map_status(StatusCode::NOT_FOUND, r#"{"error":"Event not found"}"#),
            RemoteError::NotFound(message) if message == "Event not found (404)"
        ));
        assert!(map_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(matches!(
            map_status(StatusCode::BAD_REQUEST, r#"{"message":"name required"}"#),
            RemoteError::Rejected { status: 400, .. }
        ));
    }

    #[test]
    fn conflict_carries_existing_record() {
        let body = r#"{
            "error": "QR code already scanned",
            "qr_code": {
                "id": "c1",
                "event_id": "e1",
                "content": "dup",
                "processed": false,
                "scanned_at": "2024-03-01T10:00:00"
            }
        }"#;

        let RemoteError::Conflict { message, existing } = map_status(StatusCode::CONFLICT, body)
        else {
            panic!("expected conflict");
        };
        assert_eq!(message, "QR code already scanned (409)");
        let existing = existing.unwrap();
        assert_eq!(existing.id, "c1");
        assert_eq!(existing.event_id, "e1");
        assert!(existing.is_confirmed);
    }

    #[test]
    fn conflict_without_record() {
        let error = map_status(StatusCode::CONFLICT, r#"{"error":"QR code already scanned"}"#);
        assert!(matches!(error, RemoteError::Conflict { existing: None, .. }));
    }

    #[test]
    fn wire_event_accepts_iso_timestamps() {
        let wire: WireEvent = serde_json::from_str(
            r#"{"id":"e1","name":"Expo","created_at":"1970-01-01T00:00:01","user_email":"a@b.c"}"#,
        )
        .unwrap();
        let event = wire.into_event().unwrap();
        assert_eq!(event.created_at, 1_000);
        assert_eq!(event.revision, 1);
        assert!(event.is_confirmed);
    }

    #[test]
    fn wire_code_rejects_garbage_timestamp() {
        let wire: WireCode = serde_json::from_str(
            r#"{"id":"c1","content":"x","scanned_at":"not a date"}"#,
        )
        .unwrap();
        assert!(matches!(
            wire.into_code("e1"),
            Err(RemoteError::InvalidPayload(_))
        ));
    }

    #[test]
    fn new_rejects_invalid_base_url() {
        assert!(HttpRemoteClient::new(&ClientConfig::new("localhost:5000")).is_err());
        let client = HttpRemoteClient::new(&ClientConfig::new("http://localhost:5000/api/")).unwrap();
        assert_eq!(client.base_url(), "http://localhost:5000/api");
        assert!(!client.has_token());
        client.set_token(Some("abc"));
        assert!(client.has_token());
    }

    #[test]
    fn event_paths_are_encoded() {
        assert_eq!(
            HttpRemoteClient::event_path("a/b c", "/qrcodes"),
            "/events/a%2Fb%20c/qrcodes"
        );
    }
}
