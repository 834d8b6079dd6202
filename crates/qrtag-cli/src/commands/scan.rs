use crate::commands::common::{resolve_code_content, resolve_event, sync_after_change, Context};
use crate::error::CliError;

pub async fn run_scan(
    event_query: &str,
    content_parts: &[String],
    context: &Context,
) -> Result<(), CliError> {
    let content = resolve_code_content(content_parts)?;

    let service = context.open().await?;
    let event = resolve_event(event_query, &service).await?;
    let code = service.add_code(&event.id, &content).await?;
    println!("{}", code.id);
    sync_after_change(&service, context.offline).await?;

    // The id changes once the server confirms the scan
    if let Some(confirmed) = service
        .snapshot_codes(&event.id)
        .await?
        .into_iter()
        .find(|candidate| candidate.content == content && candidate.is_confirmed)
    {
        if confirmed.id != code.id {
            println!("Confirmed as {}", confirmed.id);
        }
    }

    service.shutdown().await?;
    Ok(())
}
