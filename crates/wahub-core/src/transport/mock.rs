//! In-memory [`MessagingTransport`] for tests and local development.
//!
//! Sends are recorded rather than delivered. Failures, authentication state
//! and events are driven by the test through the setter methods.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::{Contact, MessagingTransport, SendReceipt, TransportEvent};
use crate::errors::{Result, TransportError};
use crate::jid::Jid;

const EVENT_CAPACITY: usize = 64;

/// Scriptable transport double.
pub struct MockTransport {
    authenticated: AtomicBool,
    connected: AtomicBool,
    connect_failures_left: AtomicUsize,
    connect_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    panic_on_send: AtomicBool,
    failing: Mutex<HashMap<Jid, String>>,
    sent: Mutex<Vec<(Jid, String)>>,
    contacts: Mutex<Vec<Contact>>,
    events: broadcast::Sender<TransportEvent>,
}

impl MockTransport {
    /// Create an unauthenticated, disconnected transport.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            authenticated: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            connect_failures_left: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            panic_on_send: AtomicBool::new(false),
            failing: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            contacts: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Create a transport that reports an authenticated session.
    pub fn authenticated() -> Self {
        let transport = Self::new();
        transport.set_authenticated(true);
        transport
    }

    /// Flip the authentication state.
    pub fn set_authenticated(&self, value: bool) {
        self.authenticated.store(value, Ordering::SeqCst);
    }

    /// Make the next `count` calls to `connect` fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.connect_failures_left.store(count, Ordering::SeqCst);
    }

    /// Make every send to `to` fail with `message`.
    pub fn fail_recipient(&self, to: Jid, message: impl Into<String>) {
        let _ = self.failing.lock().insert(to, message.into());
    }

    /// Make `send_text` panic.
    pub fn panic_on_send(&self, value: bool) {
        self.panic_on_send.store(value, Ordering::SeqCst);
    }

    /// Replace the directory returned by `contacts`.
    pub fn set_contacts(&self, contacts: Vec<Contact>) {
        *self.contacts.lock() = contacts;
    }

    /// Publish an event to subscribers. Returns the number of receivers.
    pub fn emit(&self, event: TransportEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    /// Every accepted send so far, in order.
    pub fn sent(&self) -> Vec<(Jid, String)> {
        self.sent.lock().clone()
    }

    /// How many times `connect` was called.
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// How many times `logout` was called.
    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagingTransport for MockTransport {
    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<()> {
        let _ = self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let left = self.connect_failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.connect_failures_left.store(left - 1, Ordering::SeqCst);
            return Err(TransportError::Request("connection refused".into()));
        }
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyConnected);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn send_text(&self, to: &Jid, body: &str) -> Result<SendReceipt> {
        assert!(
            !self.panic_on_send.load(Ordering::SeqCst),
            "mock transport asked to panic"
        );
        if let Some(message) = self.failing.lock().get(to) {
            return Err(TransportError::Other(message.clone()));
        }
        let mut sent = self.sent.lock();
        sent.push((to.clone(), body.to_string()));
        Ok(SendReceipt {
            id: format!("mock-{}", sent.len()),
        })
    }

    async fn contacts(&self) -> Result<Vec<Contact>> {
        Ok(self.contacts.lock().clone())
    }

    async fn logout(&self) -> Result<()> {
        let _ = self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.authenticated.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}
