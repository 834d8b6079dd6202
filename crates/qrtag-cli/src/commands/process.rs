use crate::commands::common::{resolve_event, sync_after_change, Context};
use crate::error::CliError;

pub async fn run_process(event_query: &str, context: &Context) -> Result<(), CliError> {
    let service = context.open().await?;
    let event = resolve_event(event_query, &service).await?;

    if service.process_codes(&event.id).await?.is_none() {
        println!("Every code in '{}' is already processed.", event.name);
        service.shutdown().await?;
        return Ok(());
    }

    println!("Queued AI processing for '{}'", event.name);
    sync_after_change(&service, context.offline).await?;
    service.shutdown().await?;
    Ok(())
}
