//! # wahub-core
//!
//! Foundation types shared by every wahub crate.
//!
//! - [`protocol`]: client envelope types (inbound commands, outbound notifications)
//! - [`jid`]: contact identifier parsing and display helpers
//! - [`transport`]: the [`MessagingTransport`](transport::MessagingTransport) boundary,
//!   its event stream, and an in-memory mock
//! - [`errors`]: transport and identifier error types
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod errors;
pub mod jid;
pub mod logging;
pub mod protocol;
pub mod transport;

pub use errors::{ContactIdError, TransportError};
pub use jid::Jid;
