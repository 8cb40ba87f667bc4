//! Transport backed by a WhatsApp Web sidecar process.
//!
//! The sidecar owns the actual WhatsApp session and exposes a small REST API.
//! This module polls its `/status` endpoint and turns state changes into
//! [`TransportEvent`]s, and forwards sends, directory lookups and logouts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use wahub_core::errors::{Result, TransportError};
use wahub_core::jid::{GROUP_SERVER, LEGACY_USER_SERVER};
use wahub_core::transport::{Contact, MessagingTransport, SendReceipt, TransportEvent};
use wahub_core::Jid;

const EVENT_CAPACITY: usize = 64;

/// Connection settings for a sidecar.
#[derive(Clone, Debug)]
pub struct SidecarConfig {
    /// Base URL of the sidecar REST API.
    pub base_url: String,
    /// How often `/status` is polled while connected.
    pub poll_interval: Duration,
    /// Bound on each HTTP request.
    pub request_timeout: Duration,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3001".into(),
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    #[serde(default)]
    connected: bool,
    #[serde(default, rename = "hasQR")]
    has_qr: bool,
}

#[derive(Debug, Deserialize)]
struct QrResponse {
    #[serde(default)]
    qr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContactsResponse {
    #[serde(default)]
    data: Vec<SidecarContact>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SidecarContact {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    is_group: bool,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// What the poller has observed so far.
#[derive(Debug, Default)]
struct PollState {
    connected: bool,
    ever_connected: bool,
    shown_code: Option<String>,
    failure_reported: bool,
}

/// State shared between the transport handle and its poller task.
struct Inner {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
    authenticated: AtomicBool,
    events: broadcast::Sender<TransportEvent>,
}

struct Poller {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// [`MessagingTransport`] that drives a sidecar over HTTP.
pub struct SidecarTransport {
    inner: Arc<Inner>,
    poll_interval: Duration,
    poller: Mutex<Option<Poller>>,
}

impl std::fmt::Debug for SidecarTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidecarTransport")
            .field("base_url", &self.inner.base_url)
            .field("authenticated", &self.inner.authenticated.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SidecarTransport {
    /// Build a transport. No request is made until [`MessagingTransport::connect`].
    pub fn new(config: SidecarConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Request(format!("client build failed: {e}")))?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        info!(base_url = %config.base_url, "sidecar transport initialized");

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                base_url: config.base_url.trim_end_matches('/').to_string(),
                request_timeout: config.request_timeout,
                authenticated: AtomicBool::new(false),
                events,
            }),
            poll_interval: config.poll_interval,
            poller: Mutex::new(None),
        })
    }

    fn poller_running(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .is_some_and(|p| !p.cancel.is_cancelled() && !p.handle.is_finished())
    }
}

/// The sidecar addresses individual accounts on the legacy `c.us` server.
fn sidecar_recipient(jid: &Jid) -> String {
    if jid.is_user() {
        format!("{}@{LEGACY_USER_SERVER}", jid.user)
    } else {
        jid.to_string()
    }
}

/// Pull a human-readable message out of an error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .or_else(|| v.get("message"))
                .and_then(|m| m.as_str().map(String::from))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

impl Inner {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn request_error(&self, e: &reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.request_timeout)
        } else {
            TransportError::Request(e.to_string())
        }
    }

    /// Send a request and fail on a non-success status.
    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(|e| self.request_error(&e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body);
        Err(TransportError::Rejected {
            status: status.as_u16(),
            message: if message.is_empty() {
                status.canonical_reason().unwrap_or("request rejected").to_string()
            } else {
                message
            },
        })
    }

    async fn json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        self.execute(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| TransportError::Request(format!("invalid response: {e}")))
    }

    async fn status(&self) -> Result<StatusResponse> {
        self.json(self.client.get(self.url("/status"))).await
    }

    async fn qr(&self) -> Option<String> {
        match self.json::<QrResponse>(self.client.get(self.url("/qr"))).await {
            Ok(body) => body.qr.filter(|qr| !qr.is_empty()),
            Err(e) => {
                debug!(error = %e, "qr fetch failed");
                None
            }
        }
    }

    /// Poll once and return the events implied by the change since `seen`.
    async fn poll_once(&self, seen: &mut PollState) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        match self.status().await {
            Ok(status) if status.connected => {
                if !seen.connected {
                    if seen.shown_code.take().is_some() {
                        events.push(TransportEvent::PairSuccess);
                    }
                    events.push(TransportEvent::Connected);
                    seen.connected = true;
                    seen.ever_connected = true;
                    self.authenticated.store(true, Ordering::SeqCst);
                }
            }
            Ok(status) => {
                if seen.connected {
                    events.push(TransportEvent::Disconnected);
                    seen.connected = false;
                    self.authenticated.store(false, Ordering::SeqCst);
                }
                if status.has_qr {
                    if let Some(code) = self.qr().await {
                        if seen.shown_code.as_deref() != Some(code.as_str()) {
                            seen.shown_code = Some(code.clone());
                            events.push(TransportEvent::PairingCode { code });
                        }
                    }
                }
            }
            Err(e) if seen.connected => {
                warn!(error = %e, "sidecar unreachable, session lost");
                events.push(TransportEvent::Disconnected);
                seen.connected = false;
                self.authenticated.store(false, Ordering::SeqCst);
            }
            Err(e) if !seen.ever_connected && !seen.failure_reported => {
                seen.failure_reported = true;
                events.push(TransportEvent::ConnectFailure {
                    message: e.to_string(),
                });
            }
            Err(e) => debug!(error = %e, "status poll failed"),
        }
        events
    }
}

#[instrument(skip_all, name = "sidecar_poller")]
async fn poll_loop(inner: Arc<Inner>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut seen = PollState::default();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let events = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            events = inner.poll_once(&mut seen) => events,
        };
        for event in events {
            debug!(kind = event.kind(), "sidecar event");
            let _ = inner.events.send(event);
        }
    }

    inner.authenticated.store(false, Ordering::SeqCst);
    debug!("status poller stopped");
}

#[async_trait]
impl MessagingTransport for SidecarTransport {
    fn is_authenticated(&self) -> bool {
        self.inner.authenticated.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<()> {
        if self.poller_running() {
            return Err(TransportError::AlreadyConnected);
        }
        let status = self.inner.status().await?;
        debug!(connected = status.connected, has_qr = status.has_qr, "sidecar reachable");

        let mut slot = self.poller.lock();
        if slot
            .as_ref()
            .is_some_and(|p| !p.cancel.is_cancelled() && !p.handle.is_finished())
        {
            return Err(TransportError::AlreadyConnected);
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.inner),
            self.poll_interval,
            cancel.clone(),
        ));
        *slot = Some(Poller { cancel, handle });
        info!("sidecar status poller started");
        Ok(())
    }

    async fn disconnect(&self) {
        let poller = self.poller.lock().take();
        if let Some(poller) = poller {
            poller.cancel.cancel();
            let _ = poller.handle.await;
        }
        self.inner.authenticated.store(false, Ordering::SeqCst);
    }

    async fn send_text(&self, to: &Jid, body: &str) -> Result<SendReceipt> {
        let payload = json!({ "to": sidecar_recipient(to), "message": body });
        let response: SendResponse = self
            .inner
            .json(self.inner.client.post(self.inner.url("/send")).json(&payload))
            .await?;
        if !response.success {
            return Err(TransportError::Other(
                response
                    .error
                    .unwrap_or_else(|| "send was not accepted".into()),
            ));
        }
        Ok(SendReceipt {
            id: response.id.unwrap_or_default(),
        })
    }

    async fn contacts(&self) -> Result<Vec<Contact>> {
        let response: ContactsResponse = self
            .inner
            .json(self.inner.client.get(self.inner.url("/contacts")))
            .await?;
        let contacts = response
            .data
            .into_iter()
            .filter_map(|entry| {
                let mut jid = match Jid::parse_contact(&entry.id) {
                    Ok(jid) => jid,
                    Err(e) => {
                        debug!(id = %entry.id, error = %e, "skipping contact");
                        return None;
                    }
                };
                if entry.is_group {
                    jid.server = GROUP_SERVER.to_string();
                }
                Some(Contact {
                    full_name: entry.name,
                    ..Contact::new(jid)
                })
            })
            .collect();
        Ok(contacts)
    }

    async fn logout(&self) -> Result<()> {
        let _ = self
            .inner
            .execute(self.inner.client.post(self.inner.url("/logout")))
            .await?;
        self.inner.authenticated.store(false, Ordering::SeqCst);
        info!("sidecar session logged out");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }
}
