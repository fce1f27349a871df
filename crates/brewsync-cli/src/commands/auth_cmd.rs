use brewsync_core::auth::{validate_identifier, AuthProvider, Session, SessionPersistence};
use brewsync_core::ErrorReporter;
use chrono::{TimeZone, Utc};

use crate::auth::{auth_client, resolve_email};
use crate::cli::AuthCommands;
use crate::commands::CommandContext;
use crate::error::CliError;

pub async fn run_auth(command: AuthCommands, context: &CommandContext) -> Result<(), CliError> {
    match command {
        AuthCommands::Login { email } => {
            let config = context.load_config()?;
            let email = validate_identifier(&resolve_email(email, &config)?)?;
            auth_client(&config)?.send_challenge(&email).await?;
            println!("Sent a sign-in code to {email}. Finish with `brewsync auth verify --token <CODE>`.");
            Ok(())
        }
        AuthCommands::Verify { email, token } => {
            let config = context.load_config()?;
            let email = validate_identifier(&resolve_email(email, &config)?)?;
            let session = auth_client(&config)?
                .verify_challenge(&email, token.trim())
                .await?;
            context.session_store().save_session(&session)?;
            println!(
                "Profile '{}' is signed in as {}",
                context.profile,
                session.identity()
            );
            Ok(())
        }
        AuthCommands::Status => {
            let bootstrap = context.bootstrap(ErrorReporter::log_only())?;
            match bootstrap.session().restore().await? {
                Session::Authenticated(session) => println!(
                    "Profile '{}' is signed in as {} (expires {})",
                    context.profile,
                    session.identity(),
                    format_expiry(session.expires_at)
                ),
                Session::Anonymous | Session::Pending { .. } => {
                    println!("Profile '{}' is not signed in.", context.profile);
                }
            }
            Ok(())
        }
        AuthCommands::Logout => {
            let bootstrap = context.bootstrap(ErrorReporter::log_only())?;
            let session = bootstrap.session();
            session.restore().await?;
            session.sign_out().await?;
            println!("Signed out profile '{}'", context.profile);
            Ok(())
        }
    }
}

pub fn format_expiry(expires_at: i64) -> String {
    Utc.timestamp_opt(expires_at, 0)
        .single()
        .map_or_else(|| expires_at.to_string(), |time| time.to_rfc3339())
}
