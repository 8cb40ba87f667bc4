//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through disconnect.

use std::any::Any;
use std::error::Error as StdError;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{FutureExt, Stream, StreamExt};
use metrics::{counter, gauge, histogram};
use tracing::{debug, error, info, instrument, warn};
use wahub_core::protocol::ServerMessage;

use super::connection::{ClientConnection, ConnectionId};
use super::keepalive::run_keepalive;
use crate::commands;
use crate::hub::Hub;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_READ_ERRORS_TOTAL, WS_SESSION_PANICS_TOTAL,
};

/// Consecutive unclassified read errors tolerated before giving up on a peer.
const MAX_CONSECUTIVE_ERRORS: u32 = 16;

/// Why a read loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed cleanly or went away.
    Normal,
    /// The socket was reset or already released.
    Reset,
    /// The peer closed with an unexpected code, or kept producing errors.
    Abnormal(String),
    /// Another path closed the connection.
    Closed,
    /// Process shutdown.
    Shutdown,
    /// A frame handler panicked.
    Panicked,
}

impl SessionEnd {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Reset => "reset",
            Self::Abnormal(_) => "abnormal",
            Self::Closed => "closed",
            Self::Shutdown => "shutdown",
            Self::Panicked => "panic",
        }
    }
}

/// How a read error is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadErrorKind {
    /// The peer is gone; stop quietly.
    Reset,
    /// Anything else; log and keep reading.
    Transient,
}

enum Flow {
    Continue,
    Stop(SessionEnd),
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection and makes sure the transport is connecting
/// 2. Greets the client with the current session status
/// 3. Spawns the keepalive task
/// 4. Reads and dispatches frames until the connection ends
/// 5. Unregisters and closes the connection
#[instrument(skip_all, fields(conn_id = %id))]
pub async fn run_session(socket: WebSocket, hub: Arc<Hub>, id: ConnectionId) {
    let config = hub.config().clone();
    let (sink, stream) = socket.split();
    let connection = Arc::new(ClientConnection::new(
        id.clone(),
        Box::pin(sink),
        hub.shutdown_token().child_token(),
        config.initial_read_timeout,
    ));

    let clients = hub.registry().register(Arc::clone(&connection));
    info!(clients, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let _ = hub.connector().start();
    hub.greet(&id).await;

    let keepalive = tokio::spawn(run_keepalive(
        Arc::clone(&connection),
        config.keepalive_interval,
        config.write_timeout,
        hub.shutdown_token().clone(),
    ));

    let end = read_loop(&hub, &connection, stream).await;

    let _ = hub.registry().unregister(&id);
    let _ = connection.close().await;
    keepalive.abort();

    match &end {
        SessionEnd::Abnormal(reason) => warn!(reason = %reason, "client disconnected abnormally"),
        SessionEnd::Panicked => warn!("client dropped after handler panic"),
        other => info!(reason = other.label(), clients = hub.registry().len(), "client disconnected"),
    }
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => end.label()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
}

/// Read frames until the connection ends.
///
/// Silence past the read deadline only pushes the deadline forward. Each
/// frame is handled inside a panic boundary; a panic ends this session and
/// nothing else.
pub(crate) async fn read_loop<S>(hub: &Hub, connection: &ClientConnection, mut stream: S) -> SessionEnd
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let read_timeout = hub.config().read_timeout;
    let mut consecutive_errors: u32 = 0;

    loop {
        let deadline = connection.read_deadline();
        let next = tokio::select! {
            biased;
            () = connection.cancelled() => {
                return if hub.shutdown_token().is_cancelled() {
                    SessionEnd::Shutdown
                } else {
                    SessionEnd::Closed
                };
            }
            next = tokio::time::timeout_at(deadline, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                debug!("read deadline passed on idle client, extending");
                connection.extend_read_deadline(read_timeout);
                continue;
            }
            Ok(None) => return SessionEnd::Normal,
            Ok(Some(Err(e))) => match classify(&e) {
                ReadErrorKind::Reset => {
                    counter!(WS_READ_ERRORS_TOTAL, "kind" => "reset").increment(1);
                    debug!(error = %e, "connection reset by client");
                    return SessionEnd::Reset;
                }
                ReadErrorKind::Transient => {
                    counter!(WS_READ_ERRORS_TOTAL, "kind" => "transient").increment(1);
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        return SessionEnd::Abnormal(format!("repeated read errors, last: {e}"));
                    }
                    warn!(error = %e, "read error, continuing");
                    connection.extend_read_deadline(read_timeout);
                    continue;
                }
            },
            Ok(Some(Ok(frame))) => frame,
        };

        consecutive_errors = 0;
        connection.extend_read_deadline(read_timeout);

        match AssertUnwindSafe(handle_frame(hub, connection, frame))
            .catch_unwind()
            .await
        {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop(end)) => return end,
            Err(payload) => {
                counter!(WS_SESSION_PANICS_TOTAL).increment(1);
                error!(panic = panic_message(payload.as_ref()), "panic while handling client frame");
                return SessionEnd::Panicked;
            }
        }
    }
}

async fn handle_frame(hub: &Hub, connection: &ClientConnection, frame: Message) -> Flow {
    match frame {
        Message::Text(text) => {
            commands::dispatch(hub, &connection.id, text.as_str()).await;
            Flow::Continue
        }
        Message::Binary(data) => {
            match std::str::from_utf8(&data) {
                Ok(text) => commands::dispatch(hub, &connection.id, text).await,
                Err(e) => {
                    let msg = ServerMessage::error(format!("invalid payload: {e}"));
                    let _ = hub.broadcaster().unicast(&connection.id, &msg).await;
                }
            }
            Flow::Continue
        }
        Message::Ping(payload) => {
            match connection
                .write(Message::Pong(payload), hub.config().write_timeout)
                .await
            {
                Ok(()) => Flow::Continue,
                Err(e) => {
                    debug!(error = %e, "failed to answer ping");
                    Flow::Stop(SessionEnd::Reset)
                }
            }
        }
        Message::Pong(_) => Flow::Continue,
        Message::Close(frame) => Flow::Stop(close_outcome(frame.as_ref())),
    }
}

fn close_outcome(frame: Option<&CloseFrame>) -> SessionEnd {
    match frame.map(|f| f.code) {
        None | Some(close_code::NORMAL | close_code::AWAY) => SessionEnd::Normal,
        Some(code) => {
            let reason = frame.map(|f| f.reason.as_str()).unwrap_or_default();
            SessionEnd::Abnormal(format!("close code {code}: {reason}"))
        }
    }
}

fn classify(err: &axum::Error) -> ReadErrorKind {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::UnexpectedEof
            ) {
                return ReadErrorKind::Reset;
            }
        }
        let text = e.to_string().to_ascii_lowercase();
        if text.contains("reset")
            || text.contains("broken pipe")
            || text.contains("closed connection")
            || text.contains("connection closed")
        {
            return ReadErrorKind::Reset;
        }
        current = e.source();
    }
    ReadErrorKind::Transient
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
