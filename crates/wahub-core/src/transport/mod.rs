//! Boundary between the hub and the outbound messaging transport.
//!
//! The hub owns exactly one transport for the life of the process and shares
//! it across every connection. Implementations report state changes through
//! [`MessagingTransport::subscribe`].

pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::errors::Result;
use crate::jid::Jid;

/// Asynchronous notifications emitted by a transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportEvent {
    /// A pairing artifact was produced and should be shown to the user.
    PairingCode {
        /// Artifact contents.
        code: String,
    },
    /// Pairing completed.
    PairSuccess,
    /// The session is connected and ready.
    Connected,
    /// Another device took over the session.
    StreamReplaced,
    /// The account was logged out remotely.
    LoggedOut,
    /// The connection dropped.
    Disconnected,
    /// The account is temporarily blocked.
    TemporaryBan {
        /// Reason given by the service.
        reason: String,
    },
    /// The service closed the stream with an error code.
    StreamError {
        /// Service error code.
        code: String,
    },
    /// A connection attempt was refused.
    ConnectFailure {
        /// Failure description.
        message: String,
    },
    /// A text arrived from a contact.
    MessageReceived {
        /// Sender.
        from: String,
        /// Text body.
        body: String,
    },
}

impl TransportEvent {
    /// Short label used for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PairingCode { .. } => "pairing_code",
            Self::PairSuccess => "pair_success",
            Self::Connected => "connected",
            Self::StreamReplaced => "stream_replaced",
            Self::LoggedOut => "logged_out",
            Self::Disconnected => "disconnected",
            Self::TemporaryBan { .. } => "temporary_ban",
            Self::StreamError { .. } => "stream_error",
            Self::ConnectFailure { .. } => "connect_failure",
            Self::MessageReceived { .. } => "message_received",
        }
    }
}

/// A directory entry reported by the transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Identifier.
    pub jid: Jid,
    /// Name saved in the address book.
    pub full_name: Option<String>,
    /// Given name saved in the address book.
    pub first_name: Option<String>,
    /// Name the contact chose for themselves.
    pub push_name: Option<String>,
    /// Verified business name.
    pub business_name: Option<String>,
}

impl Contact {
    /// Entry with no names attached.
    pub fn new(jid: Jid) -> Self {
        Self {
            jid,
            full_name: None,
            first_name: None,
            push_name: None,
            business_name: None,
        }
    }

    /// Best available display name, if any.
    pub fn display_name(&self) -> Option<&str> {
        [
            &self.full_name,
            &self.first_name,
            &self.push_name,
            &self.business_name,
        ]
        .into_iter()
        .flatten()
        .map(String::as_str)
        .find(|name| !name.is_empty())
    }
}

/// Acknowledgement for an accepted send.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Transport-assigned message id.
    pub id: String,
}

/// The outbound messaging transport.
#[async_trait]
pub trait MessagingTransport: Send + Sync {
    /// Whether the session is paired and usable.
    fn is_authenticated(&self) -> bool;

    /// Establish the session. [`TransportError::AlreadyConnected`](crate::TransportError::AlreadyConnected)
    /// is returned when it is already up and is not a failure.
    async fn connect(&self) -> Result<()>;

    /// Tear the session down. Idempotent.
    async fn disconnect(&self);

    /// Send a text to one recipient.
    async fn send_text(&self, to: &Jid, body: &str) -> Result<SendReceipt>;

    /// Fetch the contact directory.
    async fn contacts(&self) -> Result<Vec<Contact>>;

    /// Log the account out and forget its credentials.
    async fn logout(&self) -> Result<()>;

    /// Subscribe to transport events.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_prefers_full_name() {
        let contact = Contact {
            full_name: Some("Alice Doe".into()),
            first_name: Some("Alice".into()),
            push_name: Some("ali".into()),
            ..Contact::new(Jid::user("62811"))
        };
        assert_eq!(contact.display_name(), Some("Alice Doe"));
    }

    #[test]
    fn display_name_skips_empty_values() {
        let contact = Contact {
            full_name: Some(String::new()),
            push_name: Some("ali".into()),
            ..Contact::new(Jid::user("62811"))
        };
        assert_eq!(contact.display_name(), Some("ali"));
    }

    #[test]
    fn display_name_falls_back_to_business() {
        let contact = Contact {
            business_name: Some("Acme".into()),
            ..Contact::new(Jid::user("62811"))
        };
        assert_eq!(contact.display_name(), Some("Acme"));
        assert_eq!(Contact::new(Jid::user("62811")).display_name(), None);
    }

    #[test]
    fn event_kind_labels_are_snake_case() {
        let events = [
            TransportEvent::PairSuccess,
            TransportEvent::TemporaryBan { reason: "x".into() },
            TransportEvent::MessageReceived {
                from: "a".into(),
                body: "b".into(),
            },
        ];
        for event in events {
            assert!(
                event
                    .kind()
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c == '_')
            );
        }
    }
}
