//! Shared state behind every connection and background task.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use wahub_core::protocol::ServerMessage;
use wahub_core::transport::MessagingTransport;

use crate::config::HubConfig;
use crate::connector::TransportConnector;
use crate::pairing::PairingCache;
use crate::schedule::{ScheduleDispatcher, ScheduleQueue};
use crate::websocket::broadcast::Broadcaster;
use crate::websocket::connection::ConnectionId;
use crate::websocket::registry::ConnectionRegistry;

/// Process-wide hub state.
pub struct Hub {
    config: HubConfig,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    transport: Arc<dyn MessagingTransport>,
    pairing: PairingCache,
    schedule: Arc<ScheduleQueue>,
    connector: Arc<TransportConnector>,
    shutdown: CancellationToken,
    started_at: Instant,
}

impl Hub {
    /// Build the hub around one transport. `shutdown` is the root token.
    pub fn new(
        config: HubConfig,
        transport: Arc<dyn MessagingTransport>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry), config.write_timeout);
        let connector = Arc::new(TransportConnector::new(
            Arc::clone(&transport),
            config.connect_retry_wait,
            config.force_fresh_login,
            shutdown.clone(),
        ));
        Arc::new(Self {
            pairing: PairingCache::new(config.pairing_freshness),
            config,
            registry,
            broadcaster,
            transport,
            schedule: Arc::new(ScheduleQueue::new()),
            connector,
            shutdown,
            started_at: Instant::now(),
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Live connections.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Fan-out sender.
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// The shared messaging transport.
    pub fn transport(&self) -> &Arc<dyn MessagingTransport> {
        &self.transport
    }

    /// Last pairing artifact.
    pub fn pairing(&self) -> &PairingCache {
        &self.pairing
    }

    /// Pending deferred sends.
    pub fn schedule(&self) -> &Arc<ScheduleQueue> {
        &self.schedule
    }

    /// Transport connect loop.
    pub fn connector(&self) -> &Arc<TransportConnector> {
        &self.connector
    }

    /// Root cancellation token.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Time since the hub was built.
    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Dispatch loop over this hub's queue and transport.
    pub fn dispatcher(&self) -> ScheduleDispatcher {
        ScheduleDispatcher::new(
            Arc::clone(&self.schedule),
            Arc::clone(&self.transport),
            self.broadcaster.clone(),
            self.config.schedule_interval,
        )
    }

    /// Send the current session status to a newly joined client.
    pub async fn greet(&self, id: &ConnectionId) {
        if self.transport.is_authenticated() {
            debug!(conn_id = %id, "transport authenticated, sending ready");
            let _ = self
                .broadcaster
                .unicast(id, &ServerMessage::Authenticated)
                .await;
            let _ = self.broadcaster.unicast(id, &ServerMessage::Ready).await;
        } else if let Some(qr) = self.pairing.fresh() {
            debug!(conn_id = %id, "replaying cached pairing code");
            let _ = self
                .broadcaster
                .unicast(id, &ServerMessage::QrCode { qr })
                .await;
        } else {
            debug!(conn_id = %id, "waiting for pairing code");
        }
    }

    /// Close and forget every registered connection.
    pub async fn close_all(&self) {
        let conns = self.registry.drain();
        if conns.is_empty() {
            return;
        }
        info!(count = conns.len(), "closing client connections");
        let closes = conns.iter().map(|conn| conn.close());
        let _ = futures::future::join_all(closes).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{drain_json, hub_with, open_connection};
    use wahub_core::transport::mock::MockTransport;

    #[tokio::test]
    async fn greet_authenticated_sends_authenticated_then_ready() {
        let hub = hub_with(Arc::new(MockTransport::authenticated()));
        let (conn, mut rx) = open_connection("c1");
        let _ = hub.registry().register(conn);

        hub.greet(&"c1".into()).await;
        let kinds: Vec<_> = drain_json(&mut rx)
            .into_iter()
            .map(|f| f["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, ["authenticated", "ready"]);
    }

    #[tokio::test]
    async fn greet_replays_fresh_pairing_code() {
        let hub = hub_with(Arc::new(MockTransport::new()));
        hub.pairing().store("2@abc");
        let (conn, mut rx) = open_connection("c1");
        let _ = hub.registry().register(conn);

        hub.greet(&"c1".into()).await;
        let frames = drain_json(&mut rx);
        assert_eq!(frames, [serde_json::json!({"type": "qr_code", "qr": "2@abc"})]);
    }

    #[tokio::test]
    async fn greet_without_code_sends_nothing() {
        let hub = hub_with(Arc::new(MockTransport::new()));
        let (conn, mut rx) = open_connection("c1");
        let _ = hub.registry().register(conn);

        hub.greet(&"c1".into()).await;
        assert!(drain_json(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn close_all_empties_registry() {
        let hub = hub_with(Arc::new(MockTransport::new()));
        let (a, _ra) = open_connection("a");
        let (b, _rb) = open_connection("b");
        let _ = hub.registry().register(Arc::clone(&a));
        let _ = hub.registry().register(Arc::clone(&b));

        hub.close_all().await;
        assert!(hub.registry().is_empty());
        assert!(a.is_closed() && b.is_closed());
    }
}
