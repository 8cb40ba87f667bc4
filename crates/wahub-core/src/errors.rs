//! Error types for the transport boundary and contact identifiers.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by a [`MessagingTransport`](crate::transport::MessagingTransport).
///
/// The `Display` text of every variant is forwarded verbatim to clients in
/// progress and failure notifications.
#[derive(Debug, Error)]
pub enum TransportError {
    /// `connect` was called while a session is already established.
    #[error("already connected")]
    AlreadyConnected,

    /// The operation needs an authenticated session.
    #[error("transport is not authenticated")]
    NotAuthenticated,

    /// The recipient was rejected before anything was sent.
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    /// The underlying request could not be delivered.
    #[error("request failed: {0}")]
    Request(String),

    /// The transport answered with a failure status.
    #[error("rejected ({status}): {message}")]
    Rejected {
        /// Status code reported by the transport.
        status: u16,
        /// Error description.
        message: String,
    },

    /// The operation did not finish in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether this error only reports an existing session.
    pub fn is_already_connected(&self) -> bool {
        matches!(self, Self::AlreadyConnected)
    }
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Reasons a client-supplied contact identifier cannot be turned into a [`Jid`](crate::Jid).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContactIdError {
    /// Nothing was supplied.
    #[error("contact id is empty")]
    Empty,

    /// Normalisation removed every character.
    #[error("contact number is empty after normalisation")]
    EmptyNumber,

    /// A `user@server` form with a missing half.
    #[error("malformed contact id: {0}")]
    Malformed(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
