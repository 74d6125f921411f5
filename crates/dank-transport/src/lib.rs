//! Unix socket transport for the DankLinux daemon.
//!
//! Provides:
//! - Socket path resolution and stale socket cleanup
//! - The listener and accept loop
//! - Per-connection read loop with concurrent request dispatch
//! - A single serializing writer per connection (`ClientConnection`)
//!
//! The transport is decoupled from routing via the `RequestHandler` trait.

pub mod client;
pub mod error;
pub mod server;
pub mod socket;

pub use client::ClientConnection;
pub use error::{ConnectionClosed, TransportError};
pub use server::{RequestHandler, TransportConfig, TransportServer};
