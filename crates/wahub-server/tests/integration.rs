//! End-to-end tests: real WebSocket clients against a listening hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use wahub_core::Jid;
use wahub_core::transport::TransportEvent;
use wahub_core::transport::mock::MockTransport;
use wahub_server::config::HubConfig;
use wahub_server::server::HubServer;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct TestHub {
    server: HubServer,
    addr: SocketAddr,
    transport: Arc<MockTransport>,
    tasks: Vec<JoinHandle<()>>,
}

impl TestHub {
    async fn start(transport: MockTransport) -> Self {
        let config = HubConfig {
            schedule_interval: Duration::from_secs(1),
            write_timeout: Duration::from_secs(2),
            connect_retry_wait: Duration::from_millis(50),
            ..HubConfig::default()
        };
        let transport = Arc::new(transport);
        let server = HubServer::new(config, Arc::clone(&transport) as _);
        let mut tasks = server.spawn_background();
        let (addr, serve) = server.listen().await.unwrap();
        tasks.push(serve);
        Self {
            server,
            addr,
            transport,
            tasks,
        }
    }

    async fn client(&self) -> Client {
        let (ws, _) = connect_async(format!("ws://{}/ws", self.addr)).await.unwrap();
        ws
    }

    /// Connect and wait until the hub has registered the client.
    async fn joined_client(&self, expected: usize) -> Client {
        let ws = self.client().await;
        eventually(|| self.server.hub().registry().len() == expected).await;
        ws
    }

    async fn stop(self) {
        self.server.shutdown().graceful_shutdown(self.tasks, Some(WAIT)).await;
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn send(ws: &mut Client, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Next JSON text frame, skipping control frames.
async fn recv(ws: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("read error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Skip frames until one of `kind` arrives.
async fn recv_kind(ws: &mut Client, kind: &str) -> Value {
    loop {
        let value = recv(ws).await;
        if value["type"] == kind {
            return value;
        }
    }
}

async fn assert_silent(ws: &mut Client) {
    let next = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(next.is_err(), "unexpected frame: {next:?}");
}

#[tokio::test]
async fn authenticated_client_is_greeted() {
    let hub = TestHub::start(MockTransport::authenticated()).await;
    let mut ws = hub.client().await;

    assert_eq!(recv(&mut ws).await, json!({"type": "authenticated"}));
    assert_eq!(recv(&mut ws).await, json!({"type": "ready"}));
    eventually(|| hub.transport.connect_calls() == 1).await;
    hub.stop().await;
}

#[tokio::test]
async fn broadcast_with_partial_failure_reaches_every_client() {
    let transport = MockTransport::authenticated();
    transport.fail_recipient(Jid::user("b"), "recipient unavailable");
    let hub = TestHub::start(transport).await;
    let mut sender = hub.joined_client(1).await;
    let mut watcher = hub.joined_client(2).await;
    let _ = recv_kind(&mut sender, "ready").await;
    let _ = recv_kind(&mut watcher, "ready").await;

    send(&mut sender, json!({"type": "send_broadcast", "message": "x", "contacts": ["a", "b"]})).await;

    for ws in [&mut sender, &mut watcher] {
        assert_eq!(recv(ws).await, json!({"type": "broadcast_started", "message": "x", "total": 2}));
        let first = recv(ws).await;
        assert_eq!((first["current"].clone(), first["success"].clone()), (json!(1), json!(true)));
        let second = recv(ws).await;
        assert_eq!(second["current"], 2);
        assert_eq!(second["error"], "recipient unavailable");
        assert_eq!(
            recv(ws).await,
            json!({"type": "broadcast_complete", "successful": 1, "failed": 1, "total": 2})
        );
    }
    hub.stop().await;
}

#[tokio::test]
async fn past_schedule_fires_on_next_tick() {
    let hub = TestHub::start(MockTransport::authenticated()).await;
    let mut ws = hub.joined_client(1).await;
    let _ = recv_kind(&mut ws, "ready").await;

    send(
        &mut ws,
        json!({
            "type": "schedule_message",
            "message": "hi",
            "contacts": ["6281234@s.whatsapp.net"],
            "dateTime": "2024-01-01T00:00:00Z"
        }),
    )
    .await;
    assert_eq!(recv(&mut ws).await["type"], "schedule_success");
    assert_eq!(
        recv_kind(&mut ws, "scheduled_sent").await,
        json!({"type": "scheduled_sent", "message": "hi", "successful": 1, "failed": 0})
    );
    assert!(hub.server.hub().schedule().is_empty());
    assert_eq!(hub.transport.sent().len(), 1);
    hub.stop().await;
}

#[tokio::test]
async fn late_client_gets_latest_pairing_code() {
    let hub = TestHub::start(MockTransport::new()).await;
    let _ = hub.transport.emit(TransportEvent::PairingCode { code: "first".into() });
    let _ = hub.transport.emit(TransportEvent::PairingCode { code: "second".into() });
    eventually(|| hub.server.hub().pairing().fresh().as_deref() == Some("second")).await;

    let mut ws = hub.client().await;
    assert_eq!(recv(&mut ws).await, json!({"type": "qr_code", "qr": "second"}));
    assert_silent(&mut ws).await;
    hub.stop().await;
}

#[tokio::test]
async fn pairing_clears_cached_code() {
    let hub = TestHub::start(MockTransport::new()).await;
    let _ = hub.transport.emit(TransportEvent::PairingCode { code: "code".into() });
    let _ = hub.transport.emit(TransportEvent::PairSuccess);
    eventually(|| hub.server.hub().pairing().fresh().is_none()).await;
    // The second event is the last one; give the bridge time to finish it.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ws = hub.client().await;
    assert_silent(&mut ws).await;
    hub.stop().await;
}

#[tokio::test]
async fn transport_events_are_broadcast() {
    let hub = TestHub::start(MockTransport::new()).await;
    let mut a = hub.joined_client(1).await;
    let mut b = hub.joined_client(2).await;

    let _ = hub.transport.emit(TransportEvent::StreamReplaced);
    for ws in [&mut a, &mut b] {
        assert_eq!(
            recv(ws).await,
            json!({"type": "disconnected", "message": "Session replaced by another connection."})
        );
    }
    hub.stop().await;
}

#[tokio::test]
async fn bad_frames_get_errors_and_connection_survives() {
    let hub = TestHub::start(MockTransport::new()).await;
    let mut ws = hub.joined_client(1).await;

    ws.send(Message::text("{oops")).await.unwrap();
    let err = recv(&mut ws).await;
    assert_eq!(err["type"], "error");
    assert!(err["message"].as_str().unwrap().starts_with("invalid payload: "));

    send(&mut ws, json!({"type": "teleport"})).await;
    assert_eq!(recv(&mut ws).await["message"], "unknown command: teleport");

    send(&mut ws, json!({"type": "get_scheduled"})).await;
    assert_eq!(recv(&mut ws).await, json!({"type": "scheduled_messages", "messages": []}));
    assert_eq!(hub.server.hub().registry().len(), 1);
    hub.stop().await;
}

#[tokio::test]
async fn handler_panic_drops_only_that_client() {
    let transport = MockTransport::authenticated();
    transport.panic_on_send(true);
    let hub = TestHub::start(transport).await;
    let mut victim = hub.joined_client(1).await;
    let mut bystander = hub.joined_client(2).await;
    let _ = recv_kind(&mut victim, "ready").await;
    let _ = recv_kind(&mut bystander, "ready").await;

    send(&mut victim, json!({"type": "send_chat", "contactId": "628111", "message": "boom"})).await;
    eventually(|| hub.server.hub().registry().len() == 1).await;

    send(&mut bystander, json!({"type": "get_scheduled"})).await;
    assert_eq!(recv(&mut bystander).await["type"], "scheduled_messages");
    hub.stop().await;
}

#[tokio::test]
async fn client_close_unregisters() {
    let hub = TestHub::start(MockTransport::new()).await;
    let mut ws = hub.joined_client(1).await;
    ws.close(None).await.unwrap();
    eventually(|| hub.server.hub().registry().is_empty()).await;
    hub.stop().await;
}

#[tokio::test]
async fn shutdown_closes_clients() {
    let hub = TestHub::start(MockTransport::new()).await;
    let mut ws = hub.joined_client(1).await;
    let registry = Arc::clone(hub.server.hub().registry());
    hub.stop().await;

    let ended = tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_) | Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn http_endpoints_answer_without_upgrade() {
    let hub = TestHub::start(MockTransport::new()).await;

    let healthz = http_get(hub.addr, "/healthz").await;
    assert!(healthz.starts_with("HTTP/1.1 200"));
    assert!(healthz.ends_with("ok"));

    let banner = http_get(hub.addr, "/").await;
    assert!(banner.ends_with("WhatsApp broadcast hub is running.\n"));
    hub.stop().await;
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    let _ = stream.read_to_string(&mut response).await.unwrap();
    response
}
