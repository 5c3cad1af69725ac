//! Setup and I/O failures reported by servers, the client, and the application.
//!
//! Per-call failures never surface here: they are [`meridian_core::Error`]
//! values mapped onto the wire by the transport.

use thiserror::Error;

/// Fatal errors from configuration, binding, dialing, or serving.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The listen address is malformed or already in use.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server already started")]
    AlreadyStarted,

    /// Two handlers were registered under the same path or method.
    #[error("duplicate route: {0}")]
    DuplicateRoute(String),

    #[error("invalid route {path}: {reason}")]
    InvalidRoute { path: String, reason: &'static str },

    /// The accept loop failed after the listener was bound.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("invalid target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: tonic::transport::Error,
    },

    /// A server task panicked or was cancelled.
    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
