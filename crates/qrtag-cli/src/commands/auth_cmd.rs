use crate::cli::AuthCommands;
use crate::commands::common::Context;
use crate::error::CliError;

pub async fn run_auth(command: AuthCommands, context: &Context) -> Result<(), CliError> {
    match command {
        AuthCommands::Login { email, password } => {
            if context.offline {
                return Err(CliError::RequiresNetwork);
            }
            let service = context.open().await?;
            let result = service.login(&email, &password).await;
            let session = match result {
                Ok(session) => session,
                Err(error) => {
                    service.shutdown().await?;
                    return Err(CliError::Auth(error.to_string()));
                }
            };
            println!("Signed in as {}", session.email);
            service.shutdown().await?;
            Ok(())
        }
        AuthCommands::Register { email, password } => {
            if context.offline {
                return Err(CliError::RequiresNetwork);
            }
            let service = context.open().await?;
            let result = service.register(&email, &password).await;
            let session = match result {
                Ok(session) => session,
                Err(error) => {
                    service.shutdown().await?;
                    return Err(CliError::Auth(error.to_string()));
                }
            };
            println!("Registered and signed in as {}", session.email);
            service.shutdown().await?;
            Ok(())
        }
        AuthCommands::Logout => {
            let service = context.open_local().await?;
            service.logout().await?;
            let pending = service.status().pending_count;
            service.shutdown().await?;

            println!("Signed out");
            if pending > 0 {
                println!("{pending} change(s) stay queued until the next sign-in.");
            }
            Ok(())
        }
        AuthCommands::Status => {
            let service = context.open_local().await?;
            let session = service.session().await?;
            service.shutdown().await?;

            match session {
                Some(session) => println!("Signed in as {}", session.email),
                None => println!("Not signed in."),
            }
            Ok(())
        }
    }
}
