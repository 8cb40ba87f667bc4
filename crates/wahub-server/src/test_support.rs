//! Connection and hub fixtures shared by unit tests.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::ws::Message;
use futures::channel::mpsc;
use futures::{Sink, SinkExt};
use tokio_util::sync::CancellationToken;
use wahub_core::transport::mock::MockTransport;

use crate::config::HubConfig;
use crate::hub::Hub;
use crate::websocket::connection::{ClientConnection, ConnectionId, FrameSink};

const TEST_READ_TIMEOUT: Duration = Duration::from_secs(60);

fn sink_from(tx: mpsc::Sender<Message>) -> FrameSink {
    Box::pin(tx.sink_map_err(axum::Error::new))
}

/// Connection whose frames land in the returned receiver.
pub fn open_connection(id: &str) -> (Arc<ClientConnection>, mpsc::Receiver<Message>) {
    open_connection_with_token(id, CancellationToken::new())
}

pub fn open_connection_with_token(
    id: &str,
    cancel: CancellationToken,
) -> (Arc<ClientConnection>, mpsc::Receiver<Message>) {
    let (tx, rx) = mpsc::channel(64);
    let conn = ClientConnection::new(ConnectionId::from(id), sink_from(tx), cancel, TEST_READ_TIMEOUT);
    (Arc::new(conn), rx)
}

/// Sink whose peer is gone: every poll reports a broken pipe.
struct BrokenSink;

fn broken_pipe() -> axum::Error {
    axum::Error::new(io::Error::from(io::ErrorKind::BrokenPipe))
}

impl Sink<Message> for BrokenSink {
    type Error = axum::Error;

    fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Err(broken_pipe()))
    }

    fn start_send(self: Pin<&mut Self>, _: Message) -> Result<(), Self::Error> {
        Err(broken_pipe())
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Err(broken_pipe()))
    }

    fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Err(broken_pipe()))
    }
}

/// Sink whose peer never reads: it is never ready and never flushes.
struct StalledSink;

impl Sink<Message> for StalledSink {
    type Error = axum::Error;

    fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }

    fn start_send(self: Pin<&mut Self>, _: Message) -> Result<(), Self::Error> {
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }

    fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }
}

fn connection_over(id: &str, sink: FrameSink) -> Arc<ClientConnection> {
    Arc::new(ClientConnection::new(
        ConnectionId::from(id),
        sink,
        CancellationToken::new(),
        TEST_READ_TIMEOUT,
    ))
}

/// Connection whose peer is gone; every write and the close handshake fail.
pub fn failing_connection(id: &str) -> Arc<ClientConnection> {
    connection_over(id, Box::pin(BrokenSink))
}

/// Connection whose peer never reads; writes block until their deadline.
pub fn stalled_connection(id: &str) -> Arc<ClientConnection> {
    connection_over(id, Box::pin(StalledSink))
}

/// Hub over a mock transport with short timeouts.
pub fn hub_with(transport: Arc<MockTransport>) -> Arc<Hub> {
    let config = HubConfig {
        write_timeout: Duration::from_millis(200),
        connect_retry_wait: Duration::from_millis(10),
        ..HubConfig::default()
    };
    Hub::new(config, transport, CancellationToken::new())
}

/// Drain every text frame currently buffered in `rx` as JSON values.
pub fn drain_json(rx: &mut mpsc::Receiver<Message>) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    while let Ok(Some(frame)) = rx.try_next() {
        if let Message::Text(text) = frame {
            if let Ok(value) = serde_json::from_str(text.as_str()) {
                out.push(value);
            }
        }
    }
    out
}
