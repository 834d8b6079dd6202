use std::io::{self, Write};
use std::path::Path;

use clap::CommandFactory;
use clap_complete::Shell;

use crate::cli::{Cli, CompletionShell};
use crate::error::CliError;

const BIN_NAME: &str = "qrtag";

/// Print or write the completion script for `shell`
pub fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let script = completion_script(shell);

    let Some(path) = output_path else {
        io::stdout().write_all(&script)?;
        return Ok(());
    };

    std::fs::write(path, &script)?;
    println!("{}", path.display());
    eprintln!("{}", install_hint(shell, path));
    Ok(())
}

pub fn completion_script(shell: CompletionShell) -> Vec<u8> {
    let mut command = Cli::command();
    let mut script = Vec::new();
    clap_complete::generate(Shell::from(shell), &mut command, BIN_NAME, &mut script);
    script
}

fn install_hint(shell: CompletionShell, path: &Path) -> String {
    let path = path.display();
    match shell {
        CompletionShell::Bash => format!("Add `source {path}` to ~/.bashrc"),
        CompletionShell::Zsh => format!("Place {path} as `_{BIN_NAME}` in a directory on $fpath"),
        CompletionShell::Fish => {
            format!("Copy {path} to ~/.config/fish/completions/{BIN_NAME}.fish")
        }
        CompletionShell::PowerShell => format!("Add `. {path}` to your $PROFILE"),
    }
}
