//! In-memory manager for router and subscription tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dank_protocol::{HandlerResult, Params};
use dank_services::{AuxStream, Manager, Subscribers};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::broadcast;

pub(crate) struct FakeManager {
    capability: &'static str,
    aux_streams: &'static [AuxStream],
    state: Mutex<Value>,
    subscribers: Subscribers<Value>,
    aux: Subscribers<Value>,
    calls: AtomicUsize,
    unsubscribes: AtomicUsize,
    aux_unsubscribes: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl FakeManager {
    pub fn new(capability: &'static str) -> Self {
        Self {
            capability,
            aux_streams: &[],
            state: Mutex::new(json!({ "version": 0 })),
            subscribers: Subscribers::new(),
            aux: Subscribers::new(),
            calls: AtomicUsize::new(0),
            unsubscribes: AtomicUsize::new(0),
            aux_unsubscribes: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_aux(mut self, streams: &'static [AuxStream]) -> Self {
        self.aux_streams = streams;
        self
    }

    pub fn with_close_counter(mut self, closes: Arc<AtomicUsize>) -> Self {
        self.closes = closes;
        self
    }

    /// Replace the state and push it to subscribers.
    pub fn push(&self, state: Value) {
        *self.state.lock() = state.clone();
        self.subscribers.notify(state);
    }

    pub fn push_aux(&self, event: Value) {
        self.aux.notify(event);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribes(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    pub fn aux_unsubscribes(&self) -> usize {
        self.aux_unsubscribes.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Manager for FakeManager {
    fn capability(&self) -> &'static str {
        self.capability
    }

    async fn handle(&self, method: &str, params: Params) -> HandlerResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "method": method, "params": params }))
    }

    fn state(&self) -> Value {
        self.state.lock().clone()
    }

    fn subscribe(&self, id: &str) -> broadcast::Receiver<Value> {
        self.subscribers.subscribe(id)
    }

    fn unsubscribe(&self, id: &str) {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.subscribers.unsubscribe(id);
    }

    fn aux_streams(&self) -> &'static [AuxStream] {
        self.aux_streams
    }

    fn subscribe_aux(&self, stream: &str, id: &str) -> Option<broadcast::Receiver<Value>> {
        self.aux_streams
            .iter()
            .any(|aux| aux.name == stream)
            .then(|| self.aux.subscribe(&format!("{stream}:{id}")))
    }

    fn unsubscribe_aux(&self, stream: &str, id: &str) {
        self.aux_unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.aux.unsubscribe(&format!("{stream}:{id}"));
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.subscribers.clear();
        self.aux.clear();
    }
}
