//! Per-client connection state.
//!
//! A [`ClientConnection`] owns the write half of one client socket behind an
//! async mutex. That mutex is the connection's single write lane: broadcast,
//! unicast and keepalive all queue on it, so frames from different senders
//! never interleave. Every write is bounded by a deadline that covers both
//! waiting for the lane and the socket write itself.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes};
use futures::{Sink, SinkExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Write half of a client socket.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

/// Bound on flushing a close frame while releasing the socket.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(1);

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Registry key for one client session. Never reused.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a new time-ordered id.
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle of a connection. `Open` is initial, `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepting writes.
    Open,
    /// Teardown has started.
    Closing,
    /// Teardown has finished marking the entry.
    Closed,
}

/// Why a write did not reach the client.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The connection was already closed.
    #[error("connection closed")]
    Closed,
    /// The lane or the socket did not accept the frame in time.
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
    /// The socket rejected the frame.
    #[error("write failed: {0}")]
    Socket(String),
}

/// A connected WebSocket client.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// When the handshake completed.
    pub connected_at: Instant,
    sink: Mutex<FrameSink>,
    state: AtomicU8,
    cancel: CancellationToken,
    read_deadline: parking_lot::Mutex<Instant>,
}

impl ClientConnection {
    /// Wrap a socket write half.
    ///
    /// `cancel` scopes this connection's background tasks and is normally a
    /// child of the process shutdown token. The read deadline starts at
    /// `now + initial_read_timeout`.
    pub fn new(
        id: ConnectionId,
        sink: FrameSink,
        cancel: CancellationToken,
        initial_read_timeout: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            connected_at: now,
            sink: Mutex::new(sink),
            state: AtomicU8::new(OPEN),
            cancel,
            read_deadline: parking_lot::Mutex::new(now + initial_read_timeout),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Acquire) {
            OPEN => ConnectionState::Open,
            CLOSING => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    /// Whether teardown has started.
    pub fn is_closed(&self) -> bool {
        self.state() != ConnectionState::Open
    }

    /// Write one frame through the lane, bounded by `timeout`.
    pub async fn write(&self, frame: Message, timeout: Duration) -> Result<(), WriteError> {
        if self.is_closed() {
            return Err(WriteError::Closed);
        }
        let attempt = async {
            let mut sink = self.sink.lock().await;
            sink.send(frame).await
        };
        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(WriteError::Socket(e.to_string())),
            Err(_) => Err(WriteError::Timeout(timeout)),
        }
    }

    /// Write a text frame.
    pub async fn send_text(&self, text: Utf8Bytes, timeout: Duration) -> Result<(), WriteError> {
        self.write(Message::Text(text), timeout).await
    }

    /// Write a keepalive probe.
    pub async fn send_ping(&self, timeout: Duration) -> Result<(), WriteError> {
        self.write(Message::Ping(Vec::new().into()), timeout).await
    }

    /// Run the teardown sequence once.
    ///
    /// Cancels the connection's background tasks, marks it closed, then sends
    /// a close frame and releases the socket. Returns `true` only for the call
    /// that performed the teardown.
    pub async fn close(&self) -> bool {
        if !self.mark_closed() {
            return false;
        }
        self.release().await;
        true
    }

    /// Like [`close`](Self::close), but the socket is released on a spawned
    /// task so the caller does not wait on a stuck peer.
    pub fn close_detached(self: &Arc<Self>) -> bool {
        if !self.mark_closed() {
            return false;
        }
        let conn = Arc::clone(self);
        drop(tokio::spawn(async move { conn.release().await }));
        true
    }

    fn mark_closed(&self) -> bool {
        if self
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.cancel.cancel();
        self.state.store(CLOSED, Ordering::Release);
        true
    }

    async fn release(&self) {
        let release = async {
            let mut sink = self.sink.lock().await;
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        };
        if tokio::time::timeout(RELEASE_TIMEOUT, release).await.is_err() {
            debug!(conn_id = %self.id, "socket release timed out");
        }
    }

    /// Resolves once the connection is closed or the process shuts down.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Token scoping this connection's background tasks.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Push the read deadline to `now + timeout`.
    pub fn extend_read_deadline(&self, timeout: Duration) {
        *self.read_deadline.lock() = Instant::now() + timeout;
    }

    /// Instant after which a silent client counts as idle.
    pub fn read_deadline(&self) -> Instant {
        *self.read_deadline.lock()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
