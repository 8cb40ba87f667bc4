//! Last-known pairing artifact, replayed to clients that join late.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Holds the most recent pairing code and when it was produced.
pub struct PairingCache {
    slot: Mutex<Option<(String, Instant)>>,
    freshness: Duration,
}

impl PairingCache {
    /// Create an empty cache whose entries stay fresh for `freshness`.
    pub fn new(freshness: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            freshness,
        }
    }

    /// Replace the cached artifact.
    pub fn store(&self, code: impl Into<String>) {
        *self.slot.lock() = Some((code.into(), Instant::now()));
    }

    /// Forget the cached artifact.
    pub fn clear(&self) {
        *self.slot.lock() = None;
    }

    /// The cached artifact, if it is younger than the freshness window.
    pub fn fresh(&self) -> Option<String> {
        self.slot
            .lock()
            .as_ref()
            .filter(|(_, at)| at.elapsed() < self.freshness)
            .map(|(code, _)| code.clone())
    }
}
