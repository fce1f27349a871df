//! Remote store adapters.
//!
//! Every backend the bridge can run against implements [`RemoteStore`]:
//! point reads, full-replacement writes and change subscriptions keyed by
//! [`CollectionName`]. The concrete variant is picked once, from
//! [`StoreConfig`], by [`build_store`].

mod local;
mod memory;
mod realtime;
mod rest;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::config::{BridgeConfig, StoreConfig};
use crate::models::{CollectionName, Payload};
use crate::report::ErrorReporter;
use crate::{Error, Result};

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use realtime::{RealtimeStore, SseDecoder, SseEvent};
pub use rest::RestStore;

/// Invoked with the new payload on every remote change to a collection.
pub type ChangeCallback = Arc<dyn Fn(Payload) + Send + Sync>;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Current value of `name`, or [`Error::NotFound`] when nothing was stored yet.
    async fn read(&self, name: CollectionName) -> Result<Payload>;

    /// Replace the value of `name`. Failures come back as [`Error::WriteFailed`].
    async fn write(&self, name: CollectionName, payload: &Payload) -> Result<()>;

    /// Call `on_change` for every remote mutation of `name`, including echoes
    /// of this process's own writes. Mutations made after this returns are
    /// never missed.
    async fn subscribe(
        &self,
        name: CollectionName,
        on_change: ChangeCallback,
    ) -> Result<SubscriptionHandle>;

    /// Short backend name for logs.
    fn kind(&self) -> &'static str;
}

/// Supplies the bearer token of the signed-in user, if any.
pub trait CredentialSource: Send + Sync {
    fn access_token(&self) -> Option<String>;
}

/// A live subscription.
///
/// Dropping the handle leaves the subscription running; call
/// [`SubscriptionHandle::cancel`] to stop it.
#[derive(Debug)]
pub struct SubscriptionHandle {
    collection: CollectionName,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub(crate) const fn from_task(collection: CollectionName, task: JoinHandle<()>) -> Self {
        Self {
            collection,
            task: Some(task),
        }
    }

    /// Handle for a subscription that never fires.
    pub(crate) const fn inert(collection: CollectionName) -> Self {
        Self {
            collection,
            task: None,
        }
    }

    pub const fn collection(&self) -> CollectionName {
        self.collection
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn cancel(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("Cancelled subscription to {}", self.collection);
        }
    }
}

/// Build the store variant selected by `config`.
pub fn build_store(
    config: &BridgeConfig,
    credentials: Option<Arc<dyn CredentialSource>>,
    reporter: ErrorReporter,
) -> Result<Arc<dyn RemoteStore>> {
    let timeout = config.request_timeout();
    let store: Arc<dyn RemoteStore> = match &config.store {
        StoreConfig::Local { data_dir } => {
            let data_dir = data_dir.clone().ok_or_else(|| {
                Error::Configuration("local store requires a data directory".to_string())
            })?;
            Arc::new(LocalStore::new(data_dir))
        }
        StoreConfig::Rest {
            url,
            anon_key,
            table,
            poll_interval_ms,
        } => Arc::new(RestStore::new(
            url,
            anon_key,
            table,
            Duration::from_millis(*poll_interval_ms),
            timeout,
            credentials,
            reporter,
        )?),
        StoreConfig::Realtime { url, path_prefix } => Arc::new(RealtimeStore::new(
            url,
            path_prefix.as_deref(),
            timeout,
            credentials,
            reporter,
        )?),
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
    };
    tracing::info!("Using {} store", store.kind());
    Ok(store)
}
