//! Error types for brewsync-core

use std::time::Duration;

use thiserror::Error;

use crate::models::CollectionName;

/// Result type alias using brewsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in brewsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// The store holds no value for the collection yet
    #[error("Collection not found: {0}")]
    NotFound(CollectionName),

    /// The store rejected or never acknowledged a write
    #[error("Write to {collection} failed: {reason}")]
    WriteFailed {
        collection: CollectionName,
        reason: String,
    },

    /// Change subscription dropped or could not be opened
    #[error("Subscription to {collection} failed: {reason}")]
    Subscription {
        collection: CollectionName,
        reason: String,
    },

    /// Remote call exceeded the configured deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP transport error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote store answered with an error status
    #[error("Store API error: {0}")]
    Api(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Session could not be established or resumed
    #[error(transparent)]
    Auth(#[from] crate::auth::AuthError),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Wrap any failure that happened while writing `collection`.
    pub fn write_failed(collection: CollectionName, reason: impl std::fmt::Display) -> Self {
        Self::WriteFailed {
            collection,
            reason: reason.to_string(),
        }
    }
}
