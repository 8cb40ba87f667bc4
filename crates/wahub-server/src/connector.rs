//! Background loop that brings the shared transport online.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use wahub_core::transport::MessagingTransport;

use crate::metrics::TRANSPORT_CONNECT_FAILURES_TOTAL;

/// Drives `connect` on the shared transport until it succeeds.
///
/// The first client to join starts the loop; later calls to
/// [`start`](Self::start) are no-ops. At most one loop runs at a time.
pub struct TransportConnector {
    transport: Arc<dyn MessagingTransport>,
    retry_wait: Duration,
    shutdown: CancellationToken,
    started: AtomicBool,
    running: AtomicBool,
    force_fresh_login: AtomicBool,
}

impl TransportConnector {
    /// Create a connector. Nothing runs until [`start`](Self::start).
    pub fn new(
        transport: Arc<dyn MessagingTransport>,
        retry_wait: Duration,
        force_fresh_login: bool,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transport,
            retry_wait,
            shutdown,
            started: AtomicBool::new(false),
            running: AtomicBool::new(false),
            force_fresh_login: AtomicBool::new(force_fresh_login),
        }
    }

    /// Start the connect loop once per process. Returns `true` on the first call.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.started.swap(true, Ordering::AcqRel) {
            return false;
        }
        info!("starting transport connection");
        self.spawn_loop();
        true
    }

    /// Whether [`start`](Self::start) has been called.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Drop the current session and run the connect loop again.
    ///
    /// Ignored while a loop is already running.
    pub async fn reconnect(self: &Arc<Self>) {
        if self.running.load(Ordering::Acquire) {
            return;
        }
        self.transport.disconnect().await;
        self.spawn_loop();
    }

    fn spawn_loop(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = Arc::clone(self);
        drop(tokio::spawn(async move {
            this.connect_loop().await;
            this.running.store(false, Ordering::Release);
        }));
    }

    #[instrument(skip_all, name = "transport_connect")]
    async fn connect_loop(&self) {
        let mut attempt: u32 = 0;
        loop {
            if self.shutdown.is_cancelled() {
                return;
            }
            if attempt > 0 {
                info!(attempt, "retrying transport connect");
            }

            match self.transport.connect().await {
                Ok(()) => {
                    info!("transport connected");
                    break;
                }
                Err(e) if e.is_already_connected() => {
                    info!("transport already connected");
                    break;
                }
                Err(e) => {
                    counter!(TRANSPORT_CONNECT_FAILURES_TOTAL).increment(1);
                    warn!(error = %e, retry_in = ?self.retry_wait, "transport connect failed");
                }
            }

            attempt += 1;
            tokio::select! {
                () = self.shutdown.cancelled() => return,
                () = tokio::time::sleep(self.retry_wait) => {}
            }
        }

        if self.force_fresh_login.swap(false, Ordering::AcqRel) && self.transport.is_authenticated() {
            info!("fresh login requested, logging out existing session");
            match self.transport.logout().await {
                Ok(()) => info!("existing session logged out"),
                Err(e) => warn!(error = %e, "could not log out existing session"),
            }
        }
    }
}
