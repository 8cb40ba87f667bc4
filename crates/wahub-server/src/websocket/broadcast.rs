//! Best-effort fan-out to connected clients.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use metrics::counter;
use tracing::{debug, warn};
use wahub_core::protocol::ServerMessage;

use super::connection::{ClientConnection, ConnectionId};
use super::registry::ConnectionRegistry;
use crate::metrics::WS_BROADCAST_DROPS_TOTAL;

/// Delivers server messages to one or all registered connections.
///
/// Each connection is written independently. A connection that fails a write
/// is closed and removed from the registry; nothing is reported to the caller
/// beyond the delivery count.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    write_timeout: Duration,
}

impl Broadcaster {
    /// Create a broadcaster over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>, write_timeout: Duration) -> Self {
        Self {
            registry,
            write_timeout,
        }
    }

    /// Send `msg` to every open connection. Returns how many accepted it.
    pub async fn broadcast(&self, msg: &ServerMessage) -> usize {
        let Some(text) = encode(msg) else { return 0 };
        let targets = self.registry.snapshot();
        if targets.is_empty() {
            debug!(kind = msg.kind(), "no clients connected, broadcast skipped");
            return 0;
        }

        let deliveries = targets
            .into_iter()
            .filter(|conn| !conn.is_closed())
            .map(|conn| {
                let text = text.clone();
                async move { self.deliver(&conn, text).await }
            });
        let delivered = futures::future::join_all(deliveries)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();

        debug!(kind = msg.kind(), delivered, "broadcast sent");
        delivered
    }

    /// Send `msg` to one connection. Absent or closed targets are a no-op.
    pub async fn unicast(&self, id: &ConnectionId, msg: &ServerMessage) -> bool {
        let Some(conn) = self.registry.get(id) else {
            debug!(conn_id = %id, kind = msg.kind(), "unicast target gone");
            return false;
        };
        if conn.is_closed() {
            return false;
        }
        let Some(text) = encode(msg) else { return false };
        self.deliver(&conn, text).await
    }

    async fn deliver(&self, conn: &Arc<ClientConnection>, text: Utf8Bytes) -> bool {
        match conn.send_text(text, self.write_timeout).await {
            Ok(()) => true,
            Err(e) => {
                warn!(conn_id = %conn.id, error = %e, "write failed, dropping client");
                counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                let _ = self.registry.unregister(&conn.id);
                let _ = conn.close_detached();
                false
            }
        }
    }
}

fn encode(msg: &ServerMessage) -> Option<Utf8Bytes> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(json.into()),
        Err(e) => {
            warn!(kind = msg.kind(), error = %e, "failed to serialize message");
            None
        }
    }
}
