//! Process start: session, hydration, UI runtime, bridge and subscriptions.

use std::sync::{Arc, Mutex, PoisonError};

use rand::Rng;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth::{
    AuthProvider, Session, SessionManager, SessionPersistence, SupabaseAuthClient,
};
use crate::bridge::{ChannelBridge, InboundMessage, InboundPort, OutboundMessage};
use crate::config::BridgeConfig;
use crate::models::Payload;
use crate::report::{ErrorReporter, SyncFailure};
use crate::store::{build_store, CredentialSource, RemoteStore, SubscriptionHandle};
use crate::sync::{SyncContext, SyncControllers};
use crate::Result;

/// Exclusive upper bound of [`InitFlags::seed`].
pub const SEED_BOUND: u32 = 0x0FFF_FFFF;

/// What the UI runtime is initialized with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitFlags {
    pub seed: u32,
    pub reservations: Payload,
    pub brews: Payload,
    pub inventories: Payload,
    /// Signed-in identity, when there is one.
    pub identity: Option<String>,
}

/// The UI runtime's ends of the message channels.
#[derive(Debug)]
pub struct UiChannels {
    pub inbound: mpsc::UnboundedReceiver<InboundMessage>,
    pub outbound: mpsc::UnboundedSender<OutboundMessage>,
}

/// The stateful client the bridge feeds. Its internals are opaque here.
pub trait UiRuntime: Send {
    /// Start the runtime. Called exactly once, inside the Tokio runtime.
    fn start(&mut self, flags: InitFlags, channels: UiChannels) -> Result<()>;
}

pub struct Bootstrap {
    config: BridgeConfig,
    session: SessionManager,
    store: Arc<dyn RemoteStore>,
    reporter: ErrorReporter,
}

impl Bootstrap {
    pub fn new(
        config: BridgeConfig,
        session: SessionManager,
        store: Arc<dyn RemoteStore>,
        reporter: ErrorReporter,
    ) -> Self {
        Self {
            config,
            session,
            store,
            reporter,
        }
    }

    /// Construct the session manager and the configured store variant.
    pub fn from_config(
        config: BridgeConfig,
        persistence: Arc<dyn SessionPersistence>,
        reporter: ErrorReporter,
    ) -> Result<Self> {
        let timeout = config.request_timeout();
        let provider = match &config.auth {
            Some(auth) => {
                let client =
                    SupabaseAuthClient::new(&auth.supabase_url, &auth.supabase_anon_key, timeout)?;
                Some(Arc::new(client) as Arc<dyn AuthProvider>)
            }
            None => None,
        };
        let session = SessionManager::new(provider, persistence, reporter.clone(), timeout);
        let credentials: Arc<dyn CredentialSource> = Arc::new(session.clone());
        let store = build_store(&config, Some(credentials), reporter.clone())?;
        Ok(Self::new(config, session, store, reporter))
    }

    pub const fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn store(&self) -> Arc<dyn RemoteStore> {
        Arc::clone(&self.store)
    }

    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Controllers for every collection, delivering inbound changes to `inbound`.
    pub fn controllers(&self, inbound: InboundPort) -> SyncControllers {
        SyncControllers::new(&SyncContext::from_config(
            &self.config,
            Arc::clone(&self.store),
            &self.session,
            inbound,
            self.reporter.clone(),
        ))
    }

    /// Run the startup sequence and hand back the running bridge.
    ///
    /// When auth is required this waits, possibly indefinitely, for the
    /// session to become authenticated before the UI runtime is started.
    pub async fn launch(self, ui: &mut dyn UiRuntime) -> Result<BridgeHandle> {
        if let Err(error) = self.session.restore().await {
            tracing::warn!("Could not resume previous session: {}", error);
        }
        if self.config.auth_required() {
            self.wait_for_sign_in().await?;
        }

        let (inbound_port, inbound_rx) = InboundPort::channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let controllers = self.controllers(inbound_port.clone());

        // Subscribe before hydrating: changes landing while the UI starts
        // queue up on the inbound channel and are replayed after init.
        let subscriptions = Arc::new(Mutex::new(Vec::new()));
        for controller in controllers.iter() {
            match controller.subscribe().await {
                Ok(handle) => lock(&subscriptions).push(handle),
                Err(error) => self.reporter.report(SyncFailure::Subscription {
                    collection: controller.name(),
                    reason: error.to_string(),
                }),
            }
        }

        let hydrated = controllers.hydrate_all().await;
        let flags = InitFlags {
            seed: rand::thread_rng().gen_range(0..SEED_BOUND),
            reservations: hydrated.reservations,
            brews: hydrated.brews,
            inventories: hydrated.inventories,
            identity: self.session.current_session().identity().map(str::to_string),
        };
        tracing::info!(
            "Starting UI runtime (seed {}, identity {})",
            flags.seed,
            flags.identity.as_deref().unwrap_or("none")
        );
        if let Err(error) = ui.start(
            flags,
            UiChannels {
                inbound: inbound_rx,
                outbound: outbound_tx,
            },
        ) {
            cancel_all(&subscriptions);
            return Err(error);
        }

        let bridge = ChannelBridge::new(controllers.clone(), self.session.clone(), inbound_port);
        let bridge_task = tokio::spawn(bridge.run(outbound_rx));
        tracing::info!(
            "Bridge running on {} store with {} subscription(s)",
            self.store.kind(),
            lock(&subscriptions).len()
        );

        let teardown = Arc::clone(&subscriptions);
        self.session.on_session_change(move |session| {
            if matches!(session, Session::Anonymous) {
                tracing::info!("Signed out; cancelling subscriptions");
                cancel_all(&teardown);
            }
        });

        Ok(BridgeHandle {
            subscriptions,
            bridge: bridge_task,
        })
    }

    async fn wait_for_sign_in(&self) -> Result<()> {
        if self.session.current_session().is_authenticated() {
            return Ok(());
        }

        let identifier = self
            .config
            .auth
            .as_ref()
            .and_then(|auth| auth.sign_in_identifier.as_deref());
        match identifier {
            Some(identifier) => {
                // A rejected request is reported by the session manager.
                if let Err(error) = self.session.request_sign_in(identifier) {
                    tracing::warn!("Sign-in could not be started: {}", error);
                }
                tracing::info!("Waiting for {} to confirm sign-in", identifier);
            }
            None => tracing::info!("Waiting for sign-in"),
        }

        let session = self.session.wait_until_authenticated().await?;
        tracing::info!("Signed in as {}", session.identity());
        Ok(())
    }
}

/// A running bridge.
pub struct BridgeHandle {
    subscriptions: Arc<Mutex<Vec<SubscriptionHandle>>>,
    bridge: JoinHandle<()>,
}

impl BridgeHandle {
    /// Number of subscriptions still delivering changes.
    pub fn active_subscriptions(&self) -> usize {
        lock(&self.subscriptions)
            .iter()
            .filter(|handle| handle.is_active())
            .count()
    }

    /// Cancel every subscription and stop serving outbound messages.
    pub fn shutdown(self) {
        cancel_all(&self.subscriptions);
        self.bridge.abort();
        tracing::info!("Bridge shut down");
    }

    /// Wait for the UI runtime to close its outbound channel, then cancel
    /// every subscription.
    pub async fn join(self) {
        if let Err(error) = self.bridge.await {
            tracing::warn!("Bridge task ended abnormally: {}", error);
        }
        cancel_all(&self.subscriptions);
    }
}

fn lock(
    subscriptions: &Mutex<Vec<SubscriptionHandle>>,
) -> std::sync::MutexGuard<'_, Vec<SubscriptionHandle>> {
    subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
}

fn cancel_all(subscriptions: &Mutex<Vec<SubscriptionHandle>>) {
    for handle in lock(subscriptions).drain(..) {
        handle.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::sync::oneshot;

    use super::*;
    use crate::auth::testing::{session_for, RecordingProvider};
    use crate::auth::MemorySessionStore;
    use crate::config::{AuthConfig, StoreConfig};
    use crate::models::{CollectionName, CollectionsBundle};
    use crate::store::MemoryStore;

    /// Hands the flags and channels back to the test.
    struct CapturingUi {
        started: Option<oneshot::Sender<(InitFlags, UiChannels)>>,
    }

    impl CapturingUi {
        fn new() -> (Self, oneshot::Receiver<(InitFlags, UiChannels)>) {
            let (tx, rx) = oneshot::channel();
            (Self { started: Some(tx) }, rx)
        }
    }

    impl UiRuntime for CapturingUi {
        fn start(&mut self, flags: InitFlags, channels: UiChannels) -> Result<()> {
            if let Some(started) = self.started.take() {
                let _ = started.send((flags, channels));
            }
            Ok(())
        }
    }

    fn protected_config() -> BridgeConfig {
        BridgeConfig {
            store: StoreConfig::Memory,
            auth: Some(AuthConfig {
                supabase_url: "https://demo.supabase.co".to_string(),
                supabase_anon_key: "anon".to_string(),
                sign_in_identifier: Some("a@b.com".to_string()),
                required: true,
            }),
            ..BridgeConfig::default()
        }
    }

    fn session_manager(
        persistence: MemorySessionStore,
    ) -> (SessionManager, mpsc::UnboundedReceiver<String>) {
        let (provider, challenges) = RecordingProvider::new();
        let provider: Arc<dyn AuthProvider> = provider;
        let session = SessionManager::new(
            Some(provider),
            Arc::new(persistence),
            ErrorReporter::log_only(),
            Duration::from_secs(1),
        );
        (session, challenges)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn waits_for_sign_in_then_starts_with_empty_collections() {
        let store = MemoryStore::new();
        let (session, mut challenges) = session_manager(MemorySessionStore::default());
        let bootstrap = Bootstrap::new(
            protected_config(),
            session.clone(),
            Arc::new(store.clone()),
            ErrorReporter::log_only(),
        );
        let (mut ui, started) = CapturingUi::new();
        let launch = tokio::spawn(async move { bootstrap.launch(&mut ui).await });

        assert_eq!(challenges.recv().await.unwrap(), "a@b.com");
        assert!(matches!(session.current_session(), Session::Pending { .. }));
        assert_eq!(store.read_count(), 0);

        session.confirm(session_for("a@b.com")).unwrap();
        let (flags, _channels) = started.await.unwrap();
        let handle = launch.await.unwrap().unwrap();

        assert_eq!(flags.reservations, Payload::empty());
        assert_eq!(flags.brews, Payload::empty());
        assert_eq!(flags.inventories, Payload::empty());
        assert!(flags.seed < SEED_BOUND);
        assert_eq!(flags.identity.as_deref(), Some("a@b.com"));
        assert_eq!(store.read_count(), 3);
        assert_eq!(handle.active_subscriptions(), 3);
        handle.shutdown();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unprotected_launch_wires_both_directions() {
        let store = MemoryStore::new();
        store
            .write(CollectionName::Brews, &Payload::from("[\"stout\"]"))
            .await
            .unwrap();
        let (session, _challenges) = session_manager(MemorySessionStore::default());
        let config = BridgeConfig {
            store: StoreConfig::Memory,
            ..BridgeConfig::default()
        };
        let bootstrap = Bootstrap::new(
            config,
            session,
            Arc::new(store.clone()),
            ErrorReporter::log_only(),
        );
        let (mut ui, started) = CapturingUi::new();

        let handle = bootstrap.launch(&mut ui).await.unwrap();
        let (flags, mut channels) = started.await.unwrap();
        assert_eq!(flags.brews, Payload::from("[\"stout\"]"));
        assert_eq!(flags.identity, None);

        channels
            .outbound
            .send(OutboundMessage::StoreData(CollectionsBundle {
                reservations: Payload::from("R"),
                brews: Payload::from("B"),
                inventories: Payload::from("I"),
            }))
            .unwrap();

        let mut replaced = Vec::new();
        while replaced.len() < 3 {
            replaced.push(channels.inbound.recv().await.unwrap());
        }
        replaced.sort_by_key(|message| message.port());
        assert_eq!(
            replaced,
            vec![
                InboundMessage::ReplaceBrews(Payload::from("B")),
                InboundMessage::ReplaceInventories(Payload::from("I")),
                InboundMessage::ReplaceReservations(Payload::from("R")),
            ]
        );

        drop(channels.outbound);
        handle.join().await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn sign_out_cancels_subscriptions() {
        let store = MemoryStore::new();
        let (session, _challenges) =
            session_manager(MemorySessionStore::with_session(session_for("a@b.com")));
        let bootstrap = Bootstrap::new(
            protected_config(),
            session.clone(),
            Arc::new(store),
            ErrorReporter::log_only(),
        );
        let (mut ui, _started) = CapturingUi::new();

        let handle = bootstrap.launch(&mut ui).await.unwrap();
        assert_eq!(handle.active_subscriptions(), 3);

        session.sign_out().await.unwrap();
        assert_eq!(handle.active_subscriptions(), 0);
        handle.shutdown();
    }

    /// Writes to the store while starting, like a second device would.
    struct RacingUi {
        store: MemoryStore,
        started: Option<oneshot::Sender<(InitFlags, UiChannels)>>,
    }

    impl UiRuntime for RacingUi {
        fn start(&mut self, flags: InitFlags, channels: UiChannels) -> Result<()> {
            let store = self.store.clone();
            tokio::spawn(async move {
                store
                    .write(CollectionName::Brews, &Payload::from("remote"))
                    .await
            });
            if let Some(started) = self.started.take() {
                let _ = started.send((flags, channels));
            }
            Ok(())
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn change_during_ui_start_reaches_the_ui() {
        let store = MemoryStore::new();
        store
            .write(CollectionName::Brews, &Payload::from("local"))
            .await
            .unwrap();
        let (session, _challenges) = session_manager(MemorySessionStore::default());
        let config = BridgeConfig {
            store: StoreConfig::Memory,
            ..BridgeConfig::default()
        };
        let bootstrap = Bootstrap::new(
            config,
            session,
            Arc::new(store.clone()),
            ErrorReporter::log_only(),
        );
        let (started_tx, started) = oneshot::channel();
        let mut ui = RacingUi {
            store: store.clone(),
            started: Some(started_tx),
        };

        let handle = bootstrap.launch(&mut ui).await.unwrap();
        let (flags, mut channels) = started.await.unwrap();

        assert_eq!(flags.brews, Payload::from("local"));
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(1), channels.inbound.recv())
                .await
                .unwrap(),
            Some(InboundMessage::ReplaceBrews(Payload::from("remote")))
        );
        assert_eq!(
            store.read(CollectionName::Brews).await.unwrap(),
            Payload::from("remote")
        );
        handle.shutdown();
    }
}
