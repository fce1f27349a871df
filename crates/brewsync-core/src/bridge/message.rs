//! Messages crossing the UI runtime boundary.
//!
//! Both directions have a JSON form, `{"port": "<name>", "payload": ...}`,
//! used when the UI runtime lives in another process.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::models::{CollectionName, CollectionsBundle, Payload};
use crate::Result;

/// UI runtime -> bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "port", content = "payload", rename_all = "camelCase")]
pub enum OutboundMessage {
    /// Current payloads of all three collections.
    StoreData(CollectionsBundle),
    /// Start a sign-in for the given identifier.
    StartLogin(String),
    /// Re-read every collection and replay it inbound.
    FetchData,
}

/// Bridge -> UI runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "port", content = "payload", rename_all = "camelCase")]
pub enum InboundMessage {
    ReplaceReservations(Payload),
    ReplaceBrews(Payload),
    ReplaceInventories(Payload),
    LoginSuccess(String),
}

impl InboundMessage {
    pub fn replace(name: CollectionName, payload: Payload) -> Self {
        match name {
            CollectionName::Reservations => Self::ReplaceReservations(payload),
            CollectionName::Brews => Self::ReplaceBrews(payload),
            CollectionName::Inventories => Self::ReplaceInventories(payload),
        }
    }

    /// Name of the port this message is delivered on.
    pub const fn port(&self) -> &'static str {
        match self {
            Self::ReplaceReservations(_) => "replaceReservations",
            Self::ReplaceBrews(_) => "replaceBrews",
            Self::ReplaceInventories(_) => "replaceInventories",
            Self::LoginSuccess(_) => "loginSuccess",
        }
    }

    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl OutboundMessage {
    pub fn from_json_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

/// Sending half of the inbound channel.
///
/// A closed channel means the UI runtime has gone away; messages are then
/// dropped with a debug log.
#[derive(Debug, Clone)]
pub struct InboundPort {
    sender: mpsc::UnboundedSender<InboundMessage>,
}

impl InboundPort {
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<InboundMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn send(&self, message: InboundMessage) {
        if let Err(error) = self.sender.send(message) {
            tracing::debug!("UI runtime is gone; dropped {}", error.0.port());
        }
    }

    pub fn replace(&self, name: CollectionName, payload: Payload) {
        self.send(InboundMessage::replace(name, payload));
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn outbound_wire_form() {
        let message = OutboundMessage::from_json_line(
            r#"{"port":"storeData","payload":{"reservations":"R","brews":"B","inventories":"I"}}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            OutboundMessage::StoreData(CollectionsBundle {
                reservations: Payload::from("R"),
                brews: Payload::from("B"),
                inventories: Payload::from("I"),
            })
        );

        assert_eq!(
            OutboundMessage::from_json_line(r#"{"port":"startLogin","payload":"a@b.com"}"#)
                .unwrap(),
            OutboundMessage::StartLogin("a@b.com".to_string())
        );
        assert_eq!(
            OutboundMessage::from_json_line(r#" {"port":"fetchData"} "#).unwrap(),
            OutboundMessage::FetchData
        );
        assert!(OutboundMessage::from_json_line(r#"{"port":"dropTables"}"#).is_err());
    }

    #[test]
    fn inbound_payload_stays_text() {
        let line = InboundMessage::replace(CollectionName::Brews, Payload::from(r#"{"a":1}"#))
            .to_json_line()
            .unwrap();
        assert_eq!(line, r#"{"port":"replaceBrews","payload":"{\"a\":1}"}"#);
    }

    #[test]
    fn port_survives_closed_receiver() {
        let (port, receiver) = InboundPort::channel();
        drop(receiver);
        port.send(InboundMessage::LoginSuccess("a@b.com".to_string()));
    }
}
