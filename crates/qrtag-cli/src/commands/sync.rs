use crate::cli::SyncCommands;
use crate::commands::common::{
    format_operation_lines, format_pass_report, format_status_lines, operation_to_item,
    print_notices, status_to_item, Context, OperationItem,
};
use crate::error::CliError;

pub async fn run_sync(command: Option<SyncCommands>, context: &Context) -> Result<(), CliError> {
    match command {
        None => run_sync_pass(context).await,
        Some(SyncCommands::Status { json }) => run_sync_status(json, context).await,
        Some(SyncCommands::DeadLetters { json }) => run_dead_letters(json, context).await,
        Some(SyncCommands::Retry { id }) => run_retry(id, context).await,
        Some(SyncCommands::Discard { id }) => run_discard(id, context).await,
    }
}

pub async fn run_sync_pass(context: &Context) -> Result<(), CliError> {
    if context.offline {
        return Err(CliError::RequiresNetwork);
    }

    let service = context.open().await?;
    let mut notices = service.notices();
    let report = service.sync_now().await;
    print_notices(&mut notices);
    let status = service.status();
    service.shutdown().await?;

    if let Some(report) = report? {
        for line in format_pass_report(&report) {
            println!("{line}");
        }
    }
    if status.pending_count > 0 {
        println!("{} change(s) still queued.", status.pending_count);
    }
    Ok(())
}

pub async fn run_sync_status(as_json: bool, context: &Context) -> Result<(), CliError> {
    let service = context.open().await?;
    let status = service.status();
    service.shutdown().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status_to_item(&status))?);
    } else {
        for line in format_status_lines(&status) {
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn run_dead_letters(as_json: bool, context: &Context) -> Result<(), CliError> {
    let service = context.open_local().await?;
    let operations = service.dead_letters().await?;
    service.shutdown().await?;

    if as_json {
        let json_items = operations
            .iter()
            .map(operation_to_item)
            .collect::<Vec<OperationItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!("No failed changes.");
        return Ok(());
    }

    for line in format_operation_lines(&operations) {
        println!("{line}");
    }
    println!("Use `qrtag sync retry <id>` or `qrtag sync discard <id>`.");
    Ok(())
}

pub async fn run_retry(id: i64, context: &Context) -> Result<(), CliError> {
    let service = context.open().await?;
    service.retry_dead_letter(id).await?;
    println!("Requeued #{id}");

    if !context.offline {
        let mut notices = service.notices();
        let report = service.sync_now().await?;
        print_notices(&mut notices);
        if let Some(report) = report {
            for line in format_pass_report(&report) {
                println!("{line}");
            }
        }
    }
    service.shutdown().await?;
    Ok(())
}

pub async fn run_discard(id: i64, context: &Context) -> Result<(), CliError> {
    let service = context.open_local().await?;
    let operation = service.discard_dead_letter(id).await;
    service.shutdown().await?;

    let operation = operation?;
    println!(
        "Discarded #{} ({} for {})",
        operation.local_id,
        operation.kind(),
        operation.entity_key()
    );
    Ok(())
}
