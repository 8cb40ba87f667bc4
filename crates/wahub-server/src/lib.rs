//! # wahub-server
//!
//! Realtime fan-out hub between WebSocket clients and one messaging transport.
//!
//! - Connection hub: registry, per-connection write lane, keepalive, read loop
//! - Best-effort broadcast/unicast with eviction of connections that fail a write
//! - Scheduled dispatch loop for deferred sends
//! - Transport event bridge and pairing-artifact cache
//! - Axum router (`/`, `/ws`, `/health`, `/healthz`, `/metrics`) and graceful
//!   shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod commands;
pub mod config;
pub mod connector;
pub mod errors;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod pairing;
pub mod schedule;
pub mod server;
pub mod shutdown;
pub mod websocket;

#[cfg(test)]
pub(crate) mod test_support;
