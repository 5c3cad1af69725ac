//! Transport servers and the RPC client.
//!
//! Both server variants share one contract ([`Server`]): `start` binds and
//! blocks until shutdown, `stop` drains and releases the socket. Each call
//! is dispatched through the same [`Middleware`](meridian_core::Middleware)
//! chain regardless of protocol.

pub mod grpc;
pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use meridian_core::TransportKind;
use parking_lot::Mutex;

use crate::error::TransportError;

// ---------------------------------------------------------------------------
// Server trait
// ---------------------------------------------------------------------------

/// Uniform start/stop contract shared by every transport server.
#[async_trait]
pub trait Server: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Binds the configured address and serves until [`Server::stop`].
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound, the server was
    /// already started, or the accept loop fails.
    async fn start(&self) -> Result<(), TransportError>;

    /// Rejects new calls, drains in-flight ones within the configured
    /// timeout, and releases the socket. A no-op before `start`; idempotent.
    ///
    /// # Errors
    ///
    /// Reserved for transports whose shutdown can fail.
    async fn stop(&self) -> Result<(), TransportError>;
}

#[async_trait]
impl<S: Server + ?Sized> Server for Arc<S> {
    fn kind(&self) -> TransportKind {
        (**self).kind()
    }

    async fn start(&self) -> Result<(), TransportError> {
        (**self).start().await
    }

    async fn stop(&self) -> Result<(), TransportError> {
        (**self).stop().await
    }
}

// ---------------------------------------------------------------------------
// ReplyHeaders
// ---------------------------------------------------------------------------

/// Response headers a handler wants sent back with its reply.
///
/// Shared between the call context and the transport; the transport merges
/// the collected headers into the response once the handler returns.
#[derive(Debug, Clone, Default)]
pub struct ReplyHeaders {
    inner: Arc<Mutex<HeaderMap>>,
}

impl ReplyHeaders {
    /// Sets `name`, replacing earlier values.
    pub fn insert(&self, name: HeaderName, value: HeaderValue) {
        self.inner.lock().insert(name, value);
    }

    /// Adds a value for `name`, keeping earlier ones.
    pub fn append(&self, name: HeaderName, value: HeaderValue) {
        self.inner.lock().append(name, value);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Removes and returns everything collected so far.
    #[must_use]
    pub fn take(&self) -> HeaderMap {
        std::mem::take(&mut *self.inner.lock())
    }

    /// Moves collected headers into `headers`, replacing same-named entries.
    pub fn merge_into(&self, headers: &mut HeaderMap) {
        headers.extend(self.take());
    }
}
