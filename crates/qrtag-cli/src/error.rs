use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] qrtag_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No QR content provided")]
    EmptyContent,
    #[error("Event name cannot be empty")]
    EmptyEventName,
    #[error("Event reference cannot be empty")]
    EmptyEventRef,
    #[error("Event not found for id/prefix/name: {0}")]
    EventNotFound(String),
    #[error("{0}")]
    AmbiguousEvent(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("This command needs the server; drop --offline to run it")]
    RequiresNetwork,
}
