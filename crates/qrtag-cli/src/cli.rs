use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "qrtag")]
#[command(about = "Scan QR codes into events, offline first")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Keep changes local; do not contact the server
    #[arg(long, global = true)]
    pub offline: bool,

    /// API base URL override (e.g. <https://qrtag.example.com/api>)
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in, register, or sign out
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Manage events
    Event {
        #[command(subcommand)]
        command: EventCommands,
    },
    /// Record a scanned QR code
    Scan {
        /// Event ID, unique ID prefix, or name
        event: String,
        /// Decoded QR content (read from stdin when omitted)
        content: Vec<String>,
    },
    /// List scanned codes of an event
    Codes {
        /// Event ID, unique ID prefix, or name
        event: String,
        /// Only codes that still need AI processing
        #[arg(long)]
        unprocessed: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Queue AI categorization of unprocessed codes
    Process {
        /// Event ID, unique ID prefix, or name
        event: String,
    },
    /// Send queued changes and fetch remote updates
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Export an event from the server
    Export {
        /// Event ID, unique ID prefix, or name
        event: String,
        /// Export format
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Configure the CLI
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl From<ExportFormat> for qrtag_core::remote::ExportFormat {
    fn from(format: ExportFormat) -> Self {
        match format {
            ExportFormat::Json => Self::Json,
            ExportFormat::Csv => Self::Csv,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}

impl From<CompletionShell> for clap_complete::Shell {
    fn from(shell: CompletionShell) -> Self {
        match shell {
            CompletionShell::Bash => Self::Bash,
            CompletionShell::Zsh => Self::Zsh,
            CompletionShell::Fish => Self::Fish,
            CompletionShell::PowerShell => Self::PowerShell,
        }
    }
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Sign in with email and password
    Login {
        #[arg(long, value_name = "EMAIL")]
        email: String,
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Create an account and sign in
    Register {
        #[arg(long, value_name = "EMAIL")]
        email: String,
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Forget the stored session
    Logout,
    /// Show who is signed in
    Status,
}

#[derive(Subcommand)]
pub enum EventCommands {
    /// Create an event
    #[command(alias = "new")]
    Create {
        /// Event name
        name: Vec<String>,
    },
    /// List events
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an event and its codes
    Delete {
        /// Event ID, unique ID prefix, or name
        event: String,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Show queue and last sync
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List operations that ran out of retries
    DeadLetters {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Give a dead-lettered operation another round of attempts
    Retry {
        /// Operation number
        id: i64,
    },
    /// Drop a dead-lettered operation and undo its local change
    Discard {
        /// Operation number
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Save the API base URL
    Init {
        /// API base URL
        #[arg(long, value_name = "URL")]
        api_base_url: String,
    },
    /// Print the effective configuration
    Show,
}
