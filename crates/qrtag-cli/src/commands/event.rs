use crate::cli::EventCommands;
use crate::commands::common::{
    event_to_list_item, format_event_lines, normalize_content, resolve_event, sync_after_change,
    Context, EventListItem,
};
use crate::error::CliError;

pub async fn run_event(command: EventCommands, context: &Context) -> Result<(), CliError> {
    match command {
        EventCommands::Create { name } => run_event_create(&name, context).await,
        EventCommands::List { json } => run_event_list(json, context).await,
        EventCommands::Delete { event } => run_event_delete(&event, context).await,
    }
}

pub async fn run_event_create(name_parts: &[String], context: &Context) -> Result<(), CliError> {
    let name = normalize_content(&name_parts.join(" ")).ok_or(CliError::EmptyEventName)?;

    let service = context.open().await?;
    let event = service.create_event(&name).await?;
    println!("{}", event.id);
    sync_after_change(&service, context.offline).await?;
    service.shutdown().await?;
    Ok(())
}

pub async fn run_event_list(as_json: bool, context: &Context) -> Result<(), CliError> {
    let service = context.open_local().await?;
    let events = service.snapshot_events().await?;
    service.shutdown().await?;

    if as_json {
        let json_items = events
            .iter()
            .map(event_to_list_item)
            .collect::<Vec<EventListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if events.is_empty() {
        println!("No events yet. Create one with `qrtag event create <name>`.");
    } else {
        for line in format_event_lines(&events) {
            println!("{line}");
        }
    }

    Ok(())
}

pub async fn run_event_delete(query: &str, context: &Context) -> Result<(), CliError> {
    let service = context.open().await?;
    let event = resolve_event(query, &service).await?;
    service.delete_event(&event.id).await?;
    println!("{}", event.id);
    sync_after_change(&service, context.offline).await?;
    service.shutdown().await?;
    Ok(())
}
