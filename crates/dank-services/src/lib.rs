//! Subsystem managers.
//!
//! Each manager owns one subsystem's live state and handles the methods of
//! one namespace (`brightness.*`, `network.*`, ...). The server routes to a
//! manager by method prefix, snapshots it with `state`, and streams its
//! changes to subscribers through `subscribe`/`unsubscribe`.

pub mod brightness;
pub mod cups;
pub mod network;
pub mod params;
pub mod plugins;
pub mod subscribers;

use dank_protocol::{HandlerResult, Params};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

pub use subscribers::Subscribers;

/// A named extra event stream a manager publishes next to its state stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxStream {
    /// Full service name, e.g. `"brightness.update"`.
    pub name: &'static str,
    /// Subscribed whenever the parent service is, not only when named.
    pub implied: bool,
}

/// Trait implemented by all subsystem managers.
pub trait Manager: Send + Sync + 'static {
    /// Capability name advertised while the manager is available.
    fn capability(&self) -> &'static str;

    /// Handle one call in this manager's namespace. `method` is the full
    /// method string (e.g. `"brightness.increment"`).
    fn handle(
        &self,
        method: &str,
        params: Params,
    ) -> impl std::future::Future<Output = HandlerResult> + Send;

    /// Snapshot of the full current state. Never aliases internal state.
    fn state(&self) -> Value;

    /// Register a per-subscriber state channel under `id`.
    fn subscribe(&self, id: &str) -> broadcast::Receiver<Value>;

    /// Release the channel registered under `id`. Closes the receiver.
    fn unsubscribe(&self, id: &str);

    /// Extra streams this manager publishes. None by default.
    fn aux_streams(&self) -> &'static [AuxStream] {
        &[]
    }

    fn subscribe_aux(&self, _stream: &str, _id: &str) -> Option<broadcast::Receiver<Value>> {
        None
    }

    fn unsubscribe_aux(&self, _stream: &str, _id: &str) {}

    /// Stop background work and close every subscriber channel.
    fn close(&self) -> impl std::future::Future<Output = ()> + Send {
        async {}
    }
}

/// Failures while constructing a manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} unavailable")]
    Unavailable(String),

    #[error("{command} failed: {message}")]
    Command { command: String, message: String },

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ManagerError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}
