//! Periodic liveness probes.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::connection::ClientConnection;
use crate::metrics::WS_KEEPALIVE_FAILURES_TOTAL;

/// Why the keepalive loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveResult {
    /// A probe write failed; the connection was closed.
    ProbeFailed,
    /// The connection's own token fired.
    Cancelled,
    /// The connection was already closed at a tick.
    Closed,
    /// Process shutdown.
    Shutdown,
}

/// Send a ping every `interval` until the connection ends.
///
/// The first probe goes out one full `interval` after start. A probe that
/// cannot be written within `write_timeout` closes the connection.
#[instrument(skip_all, fields(conn_id = %connection.id))]
pub async fn run_keepalive(
    connection: Arc<ClientConnection>,
    interval: Duration,
    write_timeout: Duration,
    shutdown: CancellationToken,
) -> KeepaliveResult {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => return KeepaliveResult::Shutdown,
            () = connection.cancelled() => return KeepaliveResult::Cancelled,
            _ = ticker.tick() => {
                if connection.is_closed() {
                    return KeepaliveResult::Closed;
                }
                if let Err(e) = connection.send_ping(write_timeout).await {
                    debug!(error = %e, "keepalive probe failed");
                    counter!(WS_KEEPALIVE_FAILURES_TOTAL).increment(1);
                    let _ = connection.close().await;
                    return KeepaliveResult::ProbeFailed;
                }
            }
        }
    }
}
