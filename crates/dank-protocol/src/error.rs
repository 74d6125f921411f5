//! Handler errors. On the wire an error is only ever a string; the variants
//! exist so the router and managers can build those strings consistently.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// A request line that did not parse.
    #[error("invalid json")]
    InvalidJson,

    /// The owning manager has not come up (or was torn down).
    #[error("{0} manager not initialized")]
    NotInitialized(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// A required parameter was missing or had the wrong type.
    #[error("missing or invalid {0} parameter")]
    InvalidParam(String),

    /// Anything a manager's backend reported, already carrying its context.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn not_initialized(label: impl Into<String>) -> Self {
        Self::NotInitialized(label.into())
    }

    pub fn unknown_method(method: impl Into<String>) -> Self {
        Self::UnknownMethod(method.into())
    }

    pub fn invalid_param(name: impl Into<String>) -> Self {
        Self::InvalidParam(name.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Wrap a backend error with a short description of what was attempted.
    pub fn context(what: &str, err: impl std::fmt::Display) -> Self {
        Self::Failed(format!("{what}: {err}"))
    }
}

/// Result of a manager call handler.
pub type HandlerResult = Result<serde_json::Value, HandlerError>;
