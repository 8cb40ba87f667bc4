//! WebSocket connection management, keepalive, read loop, and fan-out.

pub mod broadcast;
pub mod connection;
pub mod event_bridge;
pub mod keepalive;
pub mod registry;
pub mod session;
