use std::io;

use brewsync_core::auth::AuthError;
use brewsync_core::CollectionName;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] brewsync_core::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("No payload provided; pass --file or pipe it on stdin")]
    EmptyPayload,
    #[error("Write to {collection} was abandoned after {attempts} attempt(s)")]
    WriteAbandoned {
        collection: CollectionName,
        attempts: u32,
    },
    #[error("Failed to read {0}; see the log above for details")]
    PullFailed(String),
    #[error("Auth is not configured. Run `brewsync config init --supabase-url ... --supabase-anon-key ...` or set SUPABASE_URL and SUPABASE_ANON_KEY.")]
    AuthNotConfigured,
}
