//! Set of live client connections.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::connection::{ClientConnection, ConnectionId};

/// Connected clients indexed by connection ID.
///
/// The lock guards the map only. Callers take a [`snapshot`](Self::snapshot)
/// and write to the entries after the lock is released, so a slow client never
/// blocks registration or removal.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Arc<ClientConnection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Returns the new connection count.
    pub fn register(&self, connection: Arc<ClientConnection>) -> usize {
        let mut conns = self.connections.lock();
        let _ = conns.insert(connection.id.clone(), connection);
        conns.len()
    }

    /// Remove a connection. Removing an absent id is a no-op.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.lock().remove(id)
    }

    /// Look up one connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.lock().get(id).cloned()
    }

    /// Point-in-time copy of every registered connection.
    pub fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.lock().values().cloned().collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Remove and return every connection.
    pub fn drain(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.lock().drain().map(|(_, c)| c).collect()
    }
}
