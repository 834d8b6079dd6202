use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use qrtag_core::config::SyncSettings;
use qrtag_core::models::Operation;
use qrtag_core::remote::{HttpRemoteClient, RemoteClient};
use qrtag_core::sync::{PassReport, SyncNotice, SyncStatus};
use qrtag_core::util::format_timestamp;
use qrtag_core::{Event, QrTagService, ScannedCode, StoreService};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config_profiles::CliConfig;
use crate::error::CliError;

/// Global options shared by every command
pub struct Context {
    pub db_path: PathBuf,
    pub offline: bool,
    pub api_url: Option<String>,
}

impl Context {
    /// Start the engine, online unless `--offline`
    pub async fn open(&self) -> Result<QrTagService, CliError> {
        self.open_with(!self.offline).await
    }

    /// Start the engine without contacting the server
    pub async fn open_local(&self) -> Result<QrTagService, CliError> {
        self.open_with(false).await
    }

    async fn open_with(&self, online: bool) -> Result<QrTagService, CliError> {
        let store = StoreService::open_or_degrade(&self.db_path).await?;
        if let qrtag_core::StorageMode::MemoryOnly { reason } = store.mode() {
            eprintln!("Warning: local storage unavailable ({reason}); changes will not be kept");
        }

        let config = CliConfig::load().map_err(CliError::Config)?;
        let client_config = config.client_config(self.api_url.as_deref());
        let remote: Arc<dyn RemoteClient> = Arc::new(HttpRemoteClient::new(&client_config)?);
        // Passes are driven by the command itself
        let settings = SyncSettings::from_env().without_interval();

        let service = if online {
            QrTagService::start(store, remote, settings).await?
        } else {
            QrTagService::start_offline(store, remote, settings).await?
        };
        Ok(service)
    }
}

#[derive(Debug, Serialize)]
pub struct EventListItem {
    pub id: String,
    pub name: String,
    pub qr_count: i64,
    pub created_at: i64,
    pub relative_time: String,
    pub synced: bool,
}

#[derive(Debug, Serialize)]
pub struct CodeListItem {
    pub id: String,
    pub content: String,
    pub category: Option<String>,
    pub summary: Option<String>,
    pub processed: bool,
    pub scanned_at: i64,
    pub synced: bool,
}

#[derive(Debug, Serialize)]
pub struct OperationItem {
    pub id: i64,
    pub kind: String,
    pub event_id: String,
    pub state: String,
    pub attempts: u32,
    pub created_at: i64,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub state: String,
    pub pending: u64,
    pub dead_letters: u64,
    pub last_sync_at: Option<i64>,
    pub last_sync_at_iso: Option<String>,
    pub last_error: Option<String>,
}

/// Find a live event by exact id, unique id prefix, or case-insensitive name
pub async fn resolve_event(query: &str, service: &QrTagService) -> Result<Event, CliError> {
    let query = normalize_event_ref(query)?;
    let events = service.snapshot_events().await?;
    pick_event(&query, events)
}

pub fn pick_event(query: &str, events: Vec<Event>) -> Result<Event, CliError> {
    if let Some(event) = events.iter().find(|event| event.id == query) {
        return Ok(event.clone());
    }

    let by_prefix = events
        .iter()
        .filter(|event| event.id.starts_with(query))
        .collect::<Vec<_>>();
    match by_prefix.len() {
        1 => return Ok(by_prefix[0].clone()),
        0 => {}
        _ => {
            let options = by_prefix
                .iter()
                .take(3)
                .map(|event| short_id(&event.id))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(CliError::AmbiguousEvent(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )));
        }
    }

    let mut by_name = events
        .into_iter()
        .filter(|event| event.name.eq_ignore_ascii_case(query))
        .collect::<Vec<_>>();
    match by_name.len() {
        0 => Err(CliError::EventNotFound(query.to_string())),
        1 => Ok(by_name.remove(0)),
        _ => Err(CliError::AmbiguousEvent(format!(
            "Several events are named '{query}'; use an ID prefix instead"
        ))),
    }
}

pub fn normalize_event_ref(query: &str) -> Result<String, CliError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyEventRef)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// QR content from the arguments, or from piped stdin
pub fn resolve_code_content(content_parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }

    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }

    Err(CliError::EmptyContent)
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

/// Run a pass unless offline, then print what happened
pub async fn sync_after_change(service: &QrTagService, offline: bool) -> Result<(), CliError> {
    if offline {
        println!("Saved locally; run `qrtag sync` when back online.");
        return Ok(());
    }

    let mut notices = service.notices();
    let report = service.sync_now().await?;
    print_notices(&mut notices);
    if let Some(report) = report {
        for line in format_pass_report(&report) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn print_notices(notices: &mut broadcast::Receiver<SyncNotice>) {
    while let Ok(notice) = notices.try_recv() {
        eprintln!("Warning: {notice}");
    }
}

pub fn format_pass_report(report: &PassReport) -> Vec<String> {
    let mut lines = Vec::new();
    if report.attempted() > 0 {
        lines.push(format!(
            "Sync: {} sent, {} rejected, {} retrying, {} abandoned",
            report.succeeded, report.rejected, report.retried, report.abandoned
        ));
    }
    if report.halted {
        lines.push("Session expired; run `qrtag auth login` to keep syncing.".to_string());
    } else if let Some(error) = report.last_error.as_deref() {
        lines.push(format!("Last error: {error} (changes are kept and will be retried)"));
    } else if report.attempted() == 0 {
        lines.push("Everything is up to date.".to_string());
    }
    lines
}

pub fn format_event_lines(events: &[Event]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    events
        .iter()
        .map(|event| {
            let short_id = short_id(&event.id);
            let marker = if event.is_confirmed { ' ' } else { '*' };
            let relative_time = format_relative_time(event.created_at, now_ms);
            format!(
                "{short_id:<13}{marker} {:<32}  {:>4} codes  {relative_time}",
                truncate(&event.name, 32),
                event.qr_count
            )
        })
        .collect()
}

pub fn format_code_lines(codes: &[ScannedCode]) -> Vec<String> {
    codes
        .iter()
        .map(|code| {
            let short_id = short_id(&code.id);
            let marker = if code.is_confirmed { ' ' } else { '*' };
            let category = code.category.as_deref().unwrap_or("-");
            format!("{short_id:<13}{marker} {category:<16}  {}", code.preview(60))
        })
        .collect()
}

pub fn format_operation_lines(operations: &[Operation]) -> Vec<String> {
    operations
        .iter()
        .map(|operation| {
            let error = operation.last_error.as_deref().unwrap_or("-");
            format!(
                "#{:<5} {:<14} event={}  attempts={}  {}",
                operation.local_id,
                operation.kind(),
                short_id(operation.entity_key()),
                operation.attempt_count,
                error
            )
        })
        .collect()
}

pub fn format_status_lines(status: &SyncStatus) -> Vec<String> {
    let last_sync = status
        .last_sync_at
        .map_or_else(|| "never".to_string(), format_timestamp);
    let mut lines = vec![
        format!("State:        {}", status.state.label()),
        format!("Pending:      {}", status.pending_count),
        format!("Dead letters: {}", status.dead_letter_count),
        format!("Last sync:    {last_sync}"),
    ];
    if let Some(error) = status.last_error.as_deref() {
        lines.push(format!("Last error:   {error}"));
    }
    lines
}

pub fn event_to_list_item(event: &Event) -> EventListItem {
    let now_ms = Utc::now().timestamp_millis();
    EventListItem {
        id: event.id.clone(),
        name: event.name.clone(),
        qr_count: event.qr_count,
        created_at: event.created_at,
        relative_time: format_relative_time(event.created_at, now_ms),
        synced: event.is_confirmed,
    }
}

pub fn code_to_list_item(code: &ScannedCode) -> CodeListItem {
    CodeListItem {
        id: code.id.clone(),
        content: code.content.clone(),
        category: code.category.clone(),
        summary: code.summary.clone(),
        processed: code.processed,
        scanned_at: code.scanned_at,
        synced: code.is_confirmed,
    }
}

pub fn operation_to_item(operation: &Operation) -> OperationItem {
    OperationItem {
        id: operation.local_id,
        kind: operation.kind().to_string(),
        event_id: operation.entity_key().to_string(),
        state: operation.state.as_str().to_string(),
        attempts: operation.attempt_count,
        created_at: operation.created_at,
        last_error: operation.last_error.clone(),
    }
}

pub fn status_to_item(status: &SyncStatus) -> StatusItem {
    StatusItem {
        state: status.state.label().to_string(),
        pending: status.pending_count,
        dead_letters: status.dead_letter_count,
        last_sync_at: status.last_sync_at,
        last_sync_at_iso: status.last_sync_at.map(format_timestamp),
        last_error: status.last_error.clone(),
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated = value
        .chars()
        .take(max_chars.saturating_sub(3))
        .collect::<String>();
    truncated.push_str("...");
    truncated
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("QRTAG_DB_PATH").map(PathBuf::from)) {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("qrtag").join("qrtag.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}
