use std::collections::BTreeMap;

use brewsync_core::bridge::InboundPort;
use brewsync_core::{CollectionName, ErrorReporter, Payload, SyncFailure};

use crate::commands::CommandContext;
use crate::error::CliError;

pub async fn run_pull(
    context: &CommandContext,
    collection: Option<CollectionName>,
    as_json: bool,
) -> Result<(), CliError> {
    let (reporter, mut failures) = ErrorReporter::channel();
    let bootstrap = context.bootstrap(reporter)?;
    let session = bootstrap.session().restore().await?;
    if bootstrap.config().auth_required() && !session.is_authenticated() {
        eprintln!("Not signed in; private collections read as empty. Run `brewsync auth login` first.");
    }

    let (inbound, _inbound_rx) = InboundPort::channel();
    let controllers = bootstrap.controllers(inbound);
    let names = collection.map_or_else(|| CollectionName::ALL.to_vec(), |name| vec![name]);

    let mut values = BTreeMap::new();
    for name in names {
        values.insert(name, controllers.get(name).hydrate().await);
    }

    let mut failed = Vec::new();
    while let Ok(failure) = failures.try_recv() {
        if let SyncFailure::Hydration { collection, .. } = failure {
            failed.push(collection.to_string());
        }
    }
    if !failed.is_empty() {
        return Err(CliError::PullFailed(failed.join(", ")));
    }

    if as_json {
        println!("{}", serde_json::to_string_pretty(&values)?);
    } else {
        for line in format_pull_lines(&values) {
            println!("{line}");
        }
    }
    Ok(())
}

/// A single collection prints bare; several print as `name: payload`.
pub fn format_pull_lines(values: &BTreeMap<CollectionName, Payload>) -> Vec<String> {
    if let [(_, payload)] = values.iter().collect::<Vec<_>>().as_slice() {
        return vec![payload.to_string()];
    }
    values
        .iter()
        .map(|(name, payload)| {
            if payload.is_empty() {
                format!("{name}: (empty)")
            } else {
                format!("{name}: {payload}")
            }
        })
        .collect()
}
