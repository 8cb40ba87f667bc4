//! `HubServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use wahub_core::transport::MessagingTransport;

use crate::config::HubConfig;
use crate::errors::{Result, ServerError};
use crate::health::{self, HealthResponse};
use crate::hub::Hub;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connection::ConnectionId;
use crate::websocket::event_bridge::EventBridge;
use crate::websocket::session::run_session;

/// Body served to plain HTTP requests on `/`.
pub const BANNER: &str = "WhatsApp broadcast hub is running.\n";

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Hub state.
    pub hub: Arc<Hub>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The hub's network front end.
pub struct HubServer {
    hub: Arc<Hub>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
}

impl HubServer {
    /// Create a server around one transport.
    pub fn new(config: HubConfig, transport: Arc<dyn MessagingTransport>) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let hub = Hub::new(config, transport, shutdown.token());
        Self {
            hub,
            shutdown,
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Hub state.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Runtime configuration.
    pub fn config(&self) -> &HubConfig {
        self.hub.config()
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: Arc::clone(&self.hub),
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .route("/healthz", get(healthz_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Start the event bridge and, when enabled, the scheduled dispatch loop.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let mut handles = vec![tokio::spawn(EventBridge::new(Arc::clone(&self.hub)).run())];
        if self.hub.config().schedule_enabled {
            let dispatcher = self.hub.dispatcher();
            handles.push(tokio::spawn(dispatcher.run(self.shutdown.token())));
        } else {
            info!("scheduled dispatch disabled");
        }
        handles
    }

    /// Bind and serve until shutdown. Returns the bound address and the
    /// serving task, which closes every client before it finishes.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let config = self.hub.config();
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;
        info!(%local_addr, "hub listening");

        let router = self.router();
        let hub = Arc::clone(&self.hub);
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "server error");
            }
            hub.close_all().await;
        });
        Ok((local_addr, handle))
    }
}

/// GET / and /ws: WebSocket upgrade, or a plain banner without one.
async fn ws_handler(
    State(state): State<AppState>,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(ws) = ws else {
        return BANNER.into_response();
    };
    let hub = state.hub;
    ws.max_message_size(hub.config().max_message_size)
        .on_upgrade(move |socket| run_session(socket, hub, ConnectionId::new()))
}

/// GET /healthz
async fn healthz_handler() -> &'static str {
    "ok"
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(&state.hub))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(&handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
