//! Per-connection handle.
//!
//! All bytes written to a connection go through one writer task fed by a
//! bounded queue. `ClientConnection` is the cloneable sending half: request
//! tasks and subscription drains hold clones and never touch the socket.

use std::sync::Arc;

use dank_protocol::{HandlerError, RequestId, Response};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error};

use crate::error::ConnectionClosed;

/// Frames queued for the writer before senders start waiting.
pub const OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ClientConnection {
    /// Unique client ID
    id: Arc<str>,
    /// Serialized frames waiting for the writer task
    outbound: mpsc::Sender<Vec<u8>>,
    /// Flips to `true` once, when the connection is finished
    closed: Arc<watch::Sender<bool>>,
}

impl ClientConnection {
    /// Create a handle plus the receiving end its writer task consumes.
    pub fn new() -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (outbound, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (closed, _) = watch::channel(false);
        let conn = Self {
            id: uuid::Uuid::new_v4().to_string().into(),
            outbound,
            closed: Arc::new(closed),
        };
        (conn, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue any serializable value as one frame.
    pub async fn send_value<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), ConnectionClosed> {
        if self.is_closed() {
            return Err(ConnectionClosed);
        }
        let frame = match dank_protocol::to_frame(value) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to serialize frame for {}: {e}", self.id);
                return Ok(());
            }
        };
        self.outbound.send(frame).await.map_err(|_| ConnectionClosed)
    }

    pub async fn send_response(&self, response: &Response) -> Result<(), ConnectionClosed> {
        if let Some(message) = &response.error {
            error!(id = %response.id, "Request failed: {message}");
        }
        self.send_value(response).await
    }

    pub async fn respond<T: Serialize>(&self, id: RequestId, result: T) -> Result<(), ConnectionClosed> {
        let value = match serde_json::to_value(result) {
            Ok(value) => value,
            Err(e) => return self.respond_error(id, &HandlerError::context("encode result", e)).await,
        };
        self.send_response(&Response::success(id, value)).await
    }

    pub async fn respond_error(&self, id: RequestId, err: &HandlerError) -> Result<(), ConnectionClosed> {
        self.send_response(&Response::error(id, err.to_string())).await
    }

    /// Mark the connection finished. Idempotent.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the connection is finished, for whatever reason.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives as long as `self`, so this only returns on `true`.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// Drain `frames` onto the socket until the queue closes, the connection is
/// closed, or a write fails. A failed write closes the connection.
pub(crate) async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::Receiver<Vec<u8>>,
    client: ClientConnection,
) {
    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = writer.write_all(&frame).await {
                    debug!("Write to {} failed: {e}", client.id());
                    break;
                }
            }
            _ = client.closed() => break,
        }
    }
    client.close();
    let _ = writer.shutdown().await;
}
