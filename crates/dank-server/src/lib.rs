//! Dank server: routes socket requests to subsystem managers.
//!
//! The server owns the manager registry, answers built-in methods, and runs
//! the subscription fan-out engine. It provides the `RequestHandler`
//! implementation for the transport layer.

pub mod init;
pub mod registry;
pub mod router;
pub mod subscription;

#[cfg(test)]
mod testing;

pub use init::{InitConfig, cups_factory, spawn_initializers};
pub use registry::{ManagerFactory, ManagerRegistry, ServiceKind, lazy_factory};
pub use router::{DankServer, ManagerDyn};
