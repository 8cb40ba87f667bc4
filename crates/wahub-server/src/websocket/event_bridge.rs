//! Event bridge: turns transport events into client notifications.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use wahub_core::protocol::{ChatEntry, ServerMessage};
use wahub_core::transport::TransportEvent;

use crate::hub::Hub;
use crate::metrics::TRANSPORT_EVENTS_TOTAL;

/// Bridges transport events to WebSocket clients.
pub struct EventBridge {
    rx: broadcast::Receiver<TransportEvent>,
    hub: Arc<Hub>,
}

impl EventBridge {
    /// Subscribe to the hub's transport.
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            rx: hub.transport().subscribe(),
            hub,
        }
    }

    /// Run the bridge loop. Exits on shutdown or when the transport drops its sender.
    #[instrument(skip_all, name = "event_bridge")]
    pub async fn run(mut self) {
        let shutdown = self.hub.shutdown_token().clone();
        loop {
            let received = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                received = self.rx.recv() => received,
            };
            match received {
                Ok(event) => self.handle(event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged = n, "event bridge lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("transport event stream closed");
                    break;
                }
            }
        }
    }

    /// Apply one event's side effects and broadcast its notification.
    pub async fn handle(&self, event: TransportEvent) {
        let kind = event.kind();
        counter!(TRANSPORT_EVENTS_TOTAL, "kind" => kind).increment(1);
        debug!(kind, "bridging transport event");

        match &event {
            TransportEvent::PairingCode { code } => {
                info!("pairing code received");
                self.hub.pairing().store(code.clone());
            }
            TransportEvent::PairSuccess => {
                info!("device paired");
                self.hub.pairing().clear();
            }
            TransportEvent::Disconnected => {
                warn!("transport disconnected");
                if self.hub.config().auto_reconnect {
                    self.hub.connector().reconnect().await;
                }
            }
            TransportEvent::StreamReplaced
            | TransportEvent::LoggedOut
            | TransportEvent::TemporaryBan { .. }
            | TransportEvent::StreamError { .. }
            | TransportEvent::ConnectFailure { .. } => warn!(kind, "transport session problem"),
            TransportEvent::Connected | TransportEvent::MessageReceived { .. } => {}
        }

        let _ = self.hub.broadcaster().broadcast(&notification(event)).await;
    }
}

/// The single client notification produced for a transport event.
pub fn notification(event: TransportEvent) -> ServerMessage {
    match event {
        TransportEvent::PairingCode { code } => ServerMessage::QrCode { qr: code },
        TransportEvent::PairSuccess => ServerMessage::Authenticated,
        TransportEvent::Connected => ServerMessage::Ready,
        TransportEvent::StreamReplaced => {
            ServerMessage::disconnected("Session replaced by another connection.")
        }
        TransportEvent::LoggedOut => ServerMessage::disconnected("Logged out from WhatsApp."),
        TransportEvent::Disconnected => ServerMessage::disconnected("WhatsApp connection lost."),
        TransportEvent::TemporaryBan { reason } => {
            ServerMessage::error(format!("Temporarily banned by WhatsApp ({reason})."))
        }
        TransportEvent::StreamError { code } => ServerMessage::error(format!("Stream error: {code}")),
        TransportEvent::ConnectFailure { message } => {
            ServerMessage::error(format!("Connection failed: {message}"))
        }
        TransportEvent::MessageReceived { from, body } => ServerMessage::ChatMessage {
            contact_id: from.clone(),
            message: ChatEntry {
                contact_id: from,
                message: body,
                timestamp: Utc::now().to_rfc3339(),
            },
        },
    }
}
