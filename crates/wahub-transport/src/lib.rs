//! # wahub-transport
//!
//! Concrete [`MessagingTransport`](wahub_core::transport::MessagingTransport)
//! implementations.
//!
//! - [`sidecar`]: drives a WhatsApp Web sidecar process over its REST API

#![deny(unsafe_code)]

pub mod sidecar;

pub use sidecar::{SidecarConfig, SidecarTransport};
