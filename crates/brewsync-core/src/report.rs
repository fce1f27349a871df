//! Structured failure reporting for best-effort operations.
//!
//! Remote failures never reach the client as errors. They are logged and,
//! when a sink is attached, forwarded as [`SyncFailure`] values so a host
//! (or a test) can observe them.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::CollectionName;

/// A remote failure that was absorbed instead of propagated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncFailure {
    #[error("hydration of {collection} failed: {reason}")]
    Hydration {
        collection: CollectionName,
        reason: String,
    },
    #[error("write to {collection} abandoned after {attempts} attempt(s): {reason}")]
    WriteFailed {
        collection: CollectionName,
        attempts: u32,
        reason: String,
    },
    #[error("sign-in challenge failed: {reason}")]
    AuthChallengeFailed { reason: String },
    #[error("subscription to {collection} failed: {reason}")]
    Subscription {
        collection: CollectionName,
        reason: String,
    },
}

/// Error-reporting hook shared by the session manager, store adapters and
/// sync controllers.
#[derive(Debug, Clone, Default)]
pub struct ErrorReporter {
    sink: Option<mpsc::UnboundedSender<SyncFailure>>,
}

impl ErrorReporter {
    /// Reporter that only logs.
    #[must_use]
    pub const fn log_only() -> Self {
        Self { sink: None }
    }

    /// Reporter that logs and forwards every failure to the returned receiver.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SyncFailure>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sink: Some(tx) }, rx)
    }

    pub fn report(&self, failure: SyncFailure) {
        tracing::warn!("{}", failure);
        if let Some(sink) = &self.sink {
            // A dropped receiver only means nobody is listening anymore.
            let _ = sink.send(failure);
        }
    }
}
