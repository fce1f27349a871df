use brewsync_core::auth::{Session, SessionManager};
use brewsync_core::ErrorReporter;
use tokio::io::AsyncBufRead;

use crate::commands::CommandContext;
use crate::error::CliError;
use crate::stdio_ui::{SharedLines, StdioUi};

pub async fn run_bridge(context: &CommandContext) -> Result<(), CliError> {
    let bootstrap = context.bootstrap(ErrorReporter::log_only())?;
    let mut ui = StdioUi::stdio();
    let prompt = tokio::spawn(prompt_for_code(bootstrap.session().clone(), ui.input()));

    let handle = bootstrap.launch(&mut ui).await?;
    prompt.abort();

    handle.join().await;
    Ok(())
}

/// While a sign-in is pending, ask for the emailed code on stderr and read it
/// from the UI host's input. Stops reading as soon as the session leaves
/// `Pending`, so later lines stay with the host.
pub async fn prompt_for_code<R>(session: SessionManager, input: SharedLines<R>)
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut state = session.watch();
    loop {
        let identifier = {
            let Ok(current) = state
                .wait_for(|session| !matches!(session, Session::Anonymous))
                .await
            else {
                return;
            };
            match &*current {
                Session::Pending { identifier } => identifier.clone(),
                Session::Anonymous | Session::Authenticated(_) => return,
            }
        };

        eprint!("Enter the sign-in code sent to {identifier}: ");
        let line = {
            let mut lines = input.lock().await;
            tokio::select! {
                line = lines.next_line() => line,
                _ = state.wait_for(|session| !matches!(session, Session::Pending { .. })) => {
                    eprintln!();
                    return;
                }
            }
        };
        let code = match line {
            Ok(Some(line)) => line.trim().to_string(),
            Ok(None) => return,
            Err(error) => {
                tracing::warn!("Failed to read sign-in code: {}", error);
                return;
            }
        };
        if code.is_empty() {
            continue;
        }

        match session.complete_sign_in(&code).await {
            Ok(_) => return,
            Err(error) => eprintln!("Sign-in failed: {error}"),
        }
    }
}
