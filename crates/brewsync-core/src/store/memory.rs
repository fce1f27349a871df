//! In-process store with push notifications.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{ChangeCallback, RemoteStore, SubscriptionHandle};
use crate::models::{CollectionName, Payload};
use crate::{Error, Result};

const CHANGE_BUFFER: usize = 64;

/// Map-backed store that notifies subscribers of every write, echoes included.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    values: Mutex<HashMap<CollectionName, Payload>>,
    writes: Mutex<Vec<(CollectionName, Payload)>>,
    reads: AtomicUsize,
    changes: broadcast::Sender<(CollectionName, Payload)>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            inner: Arc::new(MemoryInner {
                values: Mutex::new(HashMap::new()),
                writes: Mutex::new(Vec::new()),
                reads: AtomicUsize::new(0),
                changes,
            }),
        }
    }

    /// Number of `read` calls served so far.
    pub fn read_count(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    /// Every accepted write, in arrival order.
    pub fn write_log(&self) -> Vec<(CollectionName, Payload)> {
        self.inner
            .writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn read(&self, name: CollectionName) -> Result<Payload> {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        self.inner
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name)
            .cloned()
            .ok_or(Error::NotFound(name))
    }

    async fn write(&self, name: CollectionName, payload: &Payload) -> Result<()> {
        self.inner
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, payload.clone());
        self.inner
            .writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, payload.clone()));
        // No subscribers is fine.
        let _ = self.inner.changes.send((name, payload.clone()));
        Ok(())
    }

    async fn subscribe(
        &self,
        name: CollectionName,
        on_change: ChangeCallback,
    ) -> Result<SubscriptionHandle> {
        let mut changes = self.inner.changes.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok((changed, payload)) if changed == name => on_change(payload),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Subscription to {} skipped {} change(s)", name, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(SubscriptionHandle::from_task(name, task))
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
