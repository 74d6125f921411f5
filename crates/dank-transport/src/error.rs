use std::path::PathBuf;

use thiserror::Error;

/// Failures while bringing the listener up.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to create socket directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The peer is gone or the connection was closed locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("connection closed")]
pub struct ConnectionClosed;
