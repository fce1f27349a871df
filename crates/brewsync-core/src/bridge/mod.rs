//! Message channel bridge between the UI runtime and the sync controllers.

mod message;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth::{Session, SessionManager};
use crate::models::CollectionsBundle;
use crate::sync::{SyncControllers, WriteOutcome};

pub use message::{InboundMessage, InboundPort, OutboundMessage};

/// Routes outbound UI messages to the controllers and session manager.
#[derive(Clone)]
pub struct ChannelBridge {
    controllers: SyncControllers,
    session: SessionManager,
    inbound: InboundPort,
}

impl ChannelBridge {
    /// Build the bridge and announce every future sign-in on `loginSuccess`.
    pub fn new(controllers: SyncControllers, session: SessionManager, inbound: InboundPort) -> Self {
        let login_port = inbound.clone();
        session.on_session_change(move |session| {
            if let Session::Authenticated(auth) = session {
                login_port.send(InboundMessage::LoginSuccess(auth.identity().to_string()));
            }
        });

        Self {
            controllers,
            session,
            inbound,
        }
    }

    /// Serve outbound messages until the UI runtime closes its sender.
    pub async fn run(self, mut outbound: mpsc::UnboundedReceiver<OutboundMessage>) {
        while let Some(message) = outbound.recv().await {
            self.dispatch(message);
        }
        tracing::debug!("Outbound channel closed; bridge stopped");
    }

    /// Handle one outbound message without waiting for remote work.
    pub fn dispatch(&self, message: OutboundMessage) {
        match message {
            OutboundMessage::StoreData(bundle) => {
                drop(self.store_data(bundle));
            }
            OutboundMessage::StartLogin(identifier) => {
                // Failures are already reported by the session manager.
                if let Err(error) = self.session.request_sign_in(&identifier) {
                    tracing::debug!("Sign-in request rejected: {}", error);
                }
            }
            OutboundMessage::FetchData => {
                drop(self.fetch_data());
            }
        }
    }

    /// Start one write per collection. Collections are written independently;
    /// successive bundles reach each collection in the order they were sent.
    pub fn store_data(&self, bundle: CollectionsBundle) -> Vec<JoinHandle<WriteOutcome>> {
        bundle
            .into_entries()
            .into_iter()
            .map(|(name, payload)| {
                tokio::spawn(self.controllers.get(name).propagate_outbound(payload))
            })
            .collect()
    }

    /// Re-hydrate every collection and replay the values inbound.
    pub fn fetch_data(&self) -> JoinHandle<()> {
        let controllers = self.controllers.clone();
        let inbound = self.inbound.clone();
        tokio::spawn(async move {
            let bundle = controllers.hydrate_all().await;
            for (name, payload) in bundle.into_entries() {
                inbound.replace(name, payload);
            }
        })
    }
}
