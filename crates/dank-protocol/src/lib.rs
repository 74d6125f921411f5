//! DankLinux socket protocol types.
//!
//! Newline-delimited JSON over a Unix socket. This crate is the single
//! source of truth for frame shapes, method names, service names, and the
//! error strings clients match on.

pub mod error;
pub mod message;
pub mod methods;
pub mod services;

pub use error::{HandlerError, HandlerResult};
pub use message::{Params, Request, RequestId, Response, to_frame};
pub use methods::{METHOD_DOCS, Methods, SUBSCRIBE_SUFFIX};
pub use services::{API_VERSION, ServerInfo, ServiceEvent, Services};
