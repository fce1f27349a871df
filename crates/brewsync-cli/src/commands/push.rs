use std::io::{self, IsTerminal, Read};
use std::path::Path;

use brewsync_core::bridge::InboundPort;
use brewsync_core::sync::WriteOutcome;
use brewsync_core::{CollectionName, ErrorReporter, Payload};

use crate::commands::CommandContext;
use crate::error::CliError;

pub async fn run_push(
    context: &CommandContext,
    collection: CollectionName,
    file: Option<&Path>,
) -> Result<(), CliError> {
    let payload = read_payload(file)?;
    let bootstrap = context.bootstrap(ErrorReporter::log_only())?;
    bootstrap.session().restore().await?;

    let (inbound, _inbound_rx) = InboundPort::channel();
    let controllers = bootstrap.controllers(inbound);
    match controllers.get(collection).propagate_outbound(payload).await {
        WriteOutcome::Acknowledged => {
            println!("Stored {collection}");
            Ok(())
        }
        WriteOutcome::Abandoned { attempts } => Err(CliError::WriteAbandoned {
            collection,
            attempts,
        }),
    }
}

fn read_payload(file: Option<&Path>) -> Result<Payload, CliError> {
    let raw = if let Some(path) = file {
        std::fs::read_to_string(path)?
    } else {
        let mut stdin = io::stdin();
        if stdin.is_terminal() {
            return Err(CliError::EmptyPayload);
        }
        let mut buffer = String::new();
        stdin.read_to_string(&mut buffer)?;
        buffer
    };
    Ok(Payload::from(strip_trailing_newline(&raw)))
}

/// Drop the single line ending editors and shells append; keep everything else.
pub fn strip_trailing_newline(raw: &str) -> &str {
    raw.strip_suffix("\r\n")
        .or_else(|| raw.strip_suffix('\n'))
        .unwrap_or(raw)
}
