//! Unix socket transport server.
//!
//! Binds the listener, accepts connections, sends each one the greeting
//! frame, and hands every request line to the `RequestHandler` on its own
//! task.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dank_protocol::{Request, RequestId};
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::client::{ClientConnection, write_loop};
use crate::error::TransportError;

/// Implemented by the daemon to answer requests.
///
/// The handler owns the reply: it writes zero or more responses through the
/// `ClientConnection` it is given. Plain calls write exactly one; a
/// subscription keeps writing until the connection goes away.
pub trait RequestHandler: Send + Sync + 'static {
    /// Unsolicited first frame written to every new connection.
    fn greeting(&self) -> serde_json::Value;

    fn handle_request(
        &self,
        request: Request,
        client: ClientConnection,
    ) -> impl std::future::Future<Output = ()> + Send;
}

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Where to bind. The parent directory is created if missing.
    pub socket_path: PathBuf,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            socket_path: crate::socket::socket_path(),
        }
    }
}

type ClientTable = Arc<DashMap<String, ClientConnection>>;

/// The transport server: owns the listener task and the open connections.
pub struct TransportServer {
    socket_path: PathBuf,
    clients: ClientTable,
    /// Shutdown signal for the accept loop
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Accept loop task handle
    handle: Option<JoinHandle<()>>,
}

impl TransportServer {
    /// Bind the socket and start accepting. Bind failure is the only error.
    pub async fn start<H: RequestHandler>(
        config: TransportConfig,
        handler: Arc<H>,
    ) -> Result<Self, TransportError> {
        let socket_path = config.socket_path;

        if let Some(dir) = socket_path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| TransportError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        // A leftover file at our own path would make bind fail.
        let _ = std::fs::remove_file(&socket_path);

        let listener = UnixListener::bind(&socket_path).map_err(|source| TransportError::Bind {
            path: socket_path.clone(),
            source,
        })?;
        info!("Listening on {}", socket_path.display());

        let clients: ClientTable = Arc::new(DashMap::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(accept_loop(listener, handler, clients.clone(), shutdown_rx));

        Ok(Self {
            socket_path,
            clients,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Number of currently open connections.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Stop accepting, remove the socket file, and close every connection.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            debug!("Could not remove {}: {e}", self.socket_path.display());
        }
        for entry in self.clients.iter() {
            entry.value().close();
        }
        info!("Transport server stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Accept loop
// ─────────────────────────────────────────────────────────────────────────────

async fn accept_loop<H: RequestHandler>(
    listener: UnixListener,
    handler: Arc<H>,
    clients: ClientTable,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(handle_connection(stream, handler.clone(), clients.clone()));
                }
                Err(e) => warn!("Accept failed: {e}"),
            },
            _ = &mut shutdown_rx => break,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection Handler
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_connection<H: RequestHandler>(
    stream: UnixStream,
    handler: Arc<H>,
    clients: ClientTable,
) {
    let (read_half, write_half) = stream.into_split();
    let (client, frames) = ClientConnection::new();
    let client_id = client.id().to_string();
    let writer = tokio::spawn(write_loop(write_half, frames, client.clone()));

    clients.insert(client_id.clone(), client.clone());
    debug!("Client connected: {client_id}");

    if client.send_value(&handler.greeting()).await.is_err() {
        clients.remove(&client_id);
        let _ = writer.await;
        return;
    }

    let mut lines = BufReader::new(read_half).split(b'\n');
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            line = lines.next_segment() => match line {
                Ok(Some(line)) => {
                    let line = line.strip_suffix(b"\r").unwrap_or(line.as_slice());
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    match Request::from_line(line) {
                        Ok(request) => {
                            let handler = handler.clone();
                            let client = client.clone();
                            in_flight.spawn(async move { handler.handle_request(request, client).await });
                        }
                        Err(err) => {
                            let _ = client.respond_error(RequestId::default(), &err).await;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Read from {client_id} failed: {e}");
                    break;
                }
            },
            // Reap finished requests so the set does not grow unbounded.
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            _ = client.closed() => break,
        }
    }

    client.close();
    clients.remove(&client_id);
    debug!("Client disconnected: {client_id}");

    // In-flight requests are not cancelled. Their writes now fail quietly.
    if !in_flight.is_empty() {
        tokio::spawn(async move { while in_flight.join_next().await.is_some() {} });
    }
    let _ = writer.await;
}
