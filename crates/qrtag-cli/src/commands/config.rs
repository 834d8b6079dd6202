use qrtag_core::config::ClientConfig;

use crate::cli::ConfigCommands;
use crate::commands::common::Context;
use crate::config_profiles::{default_config_path, CliConfig};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, context: &Context) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init { api_base_url } => run_config_init(&api_base_url),
        ConfigCommands::Show => run_config_show(context),
    }
}

pub fn run_config_init(api_base_url: &str) -> Result<(), CliError> {
    let api_base_url = normalize_api_base_url(api_base_url)?;

    let mut config = CliConfig::load().map_err(CliError::Config)?;
    config.api_base_url = Some(api_base_url.clone());
    let path = config.save().map_err(CliError::Config)?;

    println!("Saved API base URL {api_base_url} to {}", path.display());
    println!("Run `qrtag auth login --email <email> --password <password>` to sign in.");
    Ok(())
}

pub fn run_config_show(context: &Context) -> Result<(), CliError> {
    let config = CliConfig::load().map_err(CliError::Config)?;
    let api_base_url = config
        .client_config(context.api_url.as_deref())
        .resolve_api_base_url()
        .map_err(CliError::Config)?;
    let config_path = default_config_path().map_err(CliError::Config)?;

    println!("Config file:  {}", config_path.display());
    println!("Database:     {}", context.db_path.display());
    println!("API base URL: {api_base_url}");
    Ok(())
}

pub fn normalize_api_base_url(url: &str) -> Result<String, CliError> {
    if url.trim().is_empty() {
        return Err(CliError::Config("api_base_url must not be empty".to_string()));
    }
    ClientConfig::new(url)
        .resolve_api_base_url()
        .map_err(CliError::Config)
}
