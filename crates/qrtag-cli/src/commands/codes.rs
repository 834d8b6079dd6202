use crate::commands::common::{
    code_to_list_item, format_code_lines, resolve_event, CodeListItem, Context,
};
use crate::error::CliError;

pub async fn run_codes(
    event_query: &str,
    unprocessed_only: bool,
    as_json: bool,
    context: &Context,
) -> Result<(), CliError> {
    let service = context.open_local().await?;
    let event = resolve_event(event_query, &service).await?;
    let mut codes = service.snapshot_codes(&event.id).await?;
    service.shutdown().await?;

    if unprocessed_only {
        codes.retain(|code| !code.processed);
    }

    if as_json {
        let json_items = codes
            .iter()
            .map(code_to_list_item)
            .collect::<Vec<CodeListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if codes.is_empty() {
        println!("No codes in '{}'.", event.name);
    } else {
        for line in format_code_lines(&codes) {
            println!("{line}");
        }
    }

    Ok(())
}
