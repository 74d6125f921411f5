//! Keyed fan-out of state changes to per-subscriber channels.
//!
//! Each subscriber gets its own bounded `broadcast` channel. `notify` never
//! waits: when a subscriber's queue is full the oldest entry is overwritten
//! and the receiver observes `Lagged` before the newest values.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;

/// Per-subscriber queue depth.
pub const SUBSCRIBER_CAPACITY: usize = 64;

pub struct Subscribers<T> {
    channels: RwLock<HashMap<String, broadcast::Sender<T>>>,
    capacity: usize,
}

impl<T: Clone + Send + 'static> Subscribers<T> {
    pub fn new() -> Self {
        Self::with_capacity(SUBSCRIBER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Register `id`. Re-using an id replaces (and closes) the previous channel.
    pub fn subscribe(&self, id: &str) -> broadcast::Receiver<T> {
        let (tx, rx) = broadcast::channel(self.capacity);
        self.channels.write().insert(id.to_string(), tx);
        rx
    }

    /// Returns false if `id` was not registered.
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.channels.write().remove(id).is_some()
    }

    /// Deliver `value` to every subscriber without blocking.
    pub fn notify(&self, value: T) {
        let channels = self.channels.read();
        for tx in channels.values() {
            let _ = tx.send(value.clone());
        }
    }

    /// Drop every channel, closing all receivers.
    pub fn clear(&self) {
        self.channels.write().clear();
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}

impl<T: Clone + Send + 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}
