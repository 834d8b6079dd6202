use std::io::{self, Write};
use std::path::Path;

use crate::cli::ExportFormat;
use crate::commands::common::{resolve_event, Context};
use crate::error::CliError;

pub async fn run_export(
    event_query: &str,
    format: ExportFormat,
    output_path: Option<&Path>,
    context: &Context,
) -> Result<(), CliError> {
    if context.offline {
        return Err(CliError::RequiresNetwork);
    }

    let service = context.open().await?;
    let event = resolve_event(event_query, &service).await?;
    let rendered = service.export_event(&event.id, format.into()).await;
    service.shutdown().await?;
    let rendered = rendered?;

    if let Some(path) = output_path {
        std::fs::write(path, rendered)?;
        println!("{}", path.display());
    } else {
        io::stdout().write_all(&rendered)?;
    }

    Ok(())
}
