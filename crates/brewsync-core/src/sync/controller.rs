use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::auth::SessionManager;
use crate::bridge::InboundPort;
use crate::config::{BridgeConfig, RetryPolicy};
use crate::models::{CollectionName, CollectionsBundle, Payload};
use crate::report::{ErrorReporter, SyncFailure};
use crate::store::{ChangeCallback, RemoteStore, SubscriptionHandle};
use crate::{Error, Result};

/// Collaborators shared by every controller.
#[derive(Clone)]
pub struct SyncContext {
    pub store: Arc<dyn RemoteStore>,
    /// Present when private collections require an authenticated session.
    pub gate: Option<SessionManager>,
    pub inbound: InboundPort,
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub reporter: ErrorReporter,
}

impl SyncContext {
    pub fn from_config(
        config: &BridgeConfig,
        store: Arc<dyn RemoteStore>,
        session: &SessionManager,
        inbound: InboundPort,
        reporter: ErrorReporter,
    ) -> Self {
        Self {
            store,
            gate: config.auth_required().then(|| session.clone()),
            inbound,
            retry: config.retry,
            timeout: config.request_timeout(),
            reporter,
        }
    }
}

/// How a propagated write ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Acknowledged,
    Abandoned { attempts: u32 },
}

/// Hydration, outbound writes and inbound changes for one collection.
#[derive(Clone)]
pub struct CollectionSyncController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    name: CollectionName,
    context: SyncContext,
    last_known: Mutex<Option<Payload>>,
    /// Feeds the task that writes this collection, one payload at a time.
    writes: Mutex<Option<mpsc::UnboundedSender<QueuedWrite>>>,
}

struct QueuedWrite {
    payload: Payload,
    done: oneshot::Sender<WriteOutcome>,
}

impl CollectionSyncController {
    pub fn new(name: CollectionName, context: SyncContext) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                name,
                context,
                last_known: Mutex::new(None),
                writes: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> CollectionName {
        self.inner.name
    }

    /// Most recently hydrated or applied payload.
    pub fn last_known(&self) -> Option<Payload> {
        self.last_known_slot().clone()
    }

    /// Current remote value, or the empty payload when it is missing,
    /// unreadable, or not yet accessible to this session.
    pub async fn hydrate(&self) -> Payload {
        let name = self.inner.name;
        if self.is_gated() {
            tracing::debug!("Not reading {} before sign-in", name);
            return Payload::empty();
        }

        let context = &self.inner.context;
        let payload = match self.bounded(context.store.read(name)).await {
            Ok(payload) => payload,
            Err(Error::NotFound(_)) => {
                tracing::debug!("No stored value for {}; starting empty", name);
                Payload::empty()
            }
            Err(error) => {
                context.reporter.report(SyncFailure::Hydration {
                    collection: name,
                    reason: error.to_string(),
                });
                Payload::empty()
            }
        };
        *self.last_known_slot() = Some(payload.clone());
        payload
    }

    /// Forward a remote change to the UI runtime.
    ///
    /// Payloads equal to the last known value are forwarded too; the UI
    /// decides what is a no-op.
    pub fn apply_inbound(&self, payload: Payload) {
        let name = self.inner.name;
        {
            let mut last_known = self.last_known_slot();
            if last_known.as_ref() == Some(&payload) {
                tracing::debug!("Forwarding unchanged {} payload", name);
            }
            *last_known = Some(payload.clone());
        }
        self.inner.context.inbound.replace(name, payload);
    }

    /// Queue `payload` for the store under the configured retry policy.
    ///
    /// Writes to one collection reach the store in the order this is called,
    /// so the newest payload is always the one left standing. The returned
    /// future only reports the outcome; dropping it does not cancel the write.
    pub fn propagate_outbound(
        &self,
        payload: Payload,
    ) -> impl Future<Output = WriteOutcome> + Send + 'static {
        let (done, outcome) = oneshot::channel();
        self.enqueue(QueuedWrite { payload, done });
        async move {
            // Only a dropped controller or runtime discards a queued write.
            outcome
                .await
                .unwrap_or(WriteOutcome::Abandoned { attempts: 0 })
        }
    }

    fn enqueue(&self, write: QueuedWrite) {
        let mut queue = self
            .inner
            .writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let write = match queue.as_ref() {
            Some(sender) => match sender.send(write) {
                Ok(()) => return,
                Err(mpsc::error::SendError(write)) => write,
            },
            None => write,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        if sender.send(write).is_ok() {
            tokio::spawn(drain_writes(Arc::downgrade(&self.inner), receiver));
            *queue = Some(sender);
        }
    }

    async fn write_with_retry(&self, payload: &Payload) -> WriteOutcome {
        let name = self.inner.name;
        let context = &self.inner.context;
        let max_attempts = context.retry.max_attempts();

        let mut attempt = 1;
        loop {
            match self.bounded(context.store.write(name, payload)).await {
                Ok(()) => {
                    tracing::debug!("Stored {} ({} bytes)", name, payload.as_str().len());
                    return WriteOutcome::Acknowledged;
                }
                Err(error) if attempt < max_attempts => {
                    tracing::warn!(
                        "Write to {} failed (attempt {}/{}): {}",
                        name,
                        attempt,
                        max_attempts,
                        error
                    );
                    tokio::time::sleep(context.retry.delay()).await;
                    attempt += 1;
                }
                Err(error) => {
                    context.reporter.report(SyncFailure::WriteFailed {
                        collection: name,
                        attempts: attempt,
                        reason: error.to_string(),
                    });
                    return WriteOutcome::Abandoned { attempts: attempt };
                }
            }
        }
    }

    /// Route remote changes for this collection into [`Self::apply_inbound`].
    pub async fn subscribe(&self) -> Result<SubscriptionHandle> {
        let controller = self.clone();
        let on_change: ChangeCallback = Arc::new(move |payload| controller.apply_inbound(payload));
        self.inner
            .context
            .store
            .subscribe(self.inner.name, on_change)
            .await
    }

    fn is_gated(&self) -> bool {
        self.inner
            .context
            .gate
            .as_ref()
            .is_some_and(|session| !session.current_session().is_authenticated())
    }

    async fn bounded<T>(&self, future: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.inner.context.timeout;
        tokio::time::timeout(timeout, future)
            .await
            .map_err(|_| Error::Timeout(timeout))?
    }

    fn last_known_slot(&self) -> std::sync::MutexGuard<'_, Option<Payload>> {
        self.inner
            .last_known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Write queued payloads one after another until every handle to the
/// controller is gone.
async fn drain_writes(
    controller: Weak<ControllerInner>,
    mut queue: mpsc::UnboundedReceiver<QueuedWrite>,
) {
    while let Some(QueuedWrite { payload, done }) = queue.recv().await {
        let Some(inner) = controller.upgrade() else {
            break;
        };
        let outcome = CollectionSyncController { inner }
            .write_with_retry(&payload)
            .await;
        // Nobody may be waiting for the outcome.
        let _ = done.send(outcome);
    }
}

/// The three controllers, one per collection.
#[derive(Clone)]
pub struct SyncControllers {
    controllers: [CollectionSyncController; 3],
}

impl SyncControllers {
    pub fn new(context: &SyncContext) -> Self {
        Self {
            controllers: CollectionName::ALL
                .map(|name| CollectionSyncController::new(name, context.clone())),
        }
    }

    pub fn get(&self, name: CollectionName) -> &CollectionSyncController {
        match name {
            CollectionName::Reservations => &self.controllers[0],
            CollectionName::Brews => &self.controllers[1],
            CollectionName::Inventories => &self.controllers[2],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollectionSyncController> {
        self.controllers.iter()
    }

    /// Hydrate every collection concurrently. A failure in one never holds
    /// back the others.
    pub async fn hydrate_all(&self) -> CollectionsBundle {
        let (reservations, brews, inventories) = tokio::join!(
            self.get(CollectionName::Reservations).hydrate(),
            self.get(CollectionName::Brews).hydrate(),
            self.get(CollectionName::Inventories).hydrate(),
        );
        CollectionsBundle {
            reservations,
            brews,
            inventories,
        }
    }
}
