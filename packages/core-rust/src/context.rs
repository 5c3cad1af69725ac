//! Per-call context carrying transport metadata and the call deadline.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::Extensions;
use tokio::time::Instant;

/// Protocol through which a call entered or leaves the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Http,
    Rpc,
}

impl TransportKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Http => "HTTP",
            TransportKind::Rpc => "RPC",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-neutral metadata attached to every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transport {
    pub kind: TransportKind,
    /// Request path for HTTP, full method name (`/pkg.Service/Method`) for RPC.
    pub operation: String,
}

impl Transport {
    #[must_use]
    pub fn new(kind: TransportKind, operation: impl Into<String>) -> Self {
        Self {
            kind,
            operation: operation.into(),
        }
    }
}

/// Call-scoped, immutable carrier of metadata and deadline.
///
/// Cloning is cheap. The `with_*` methods return a new context and leave the
/// original untouched, so a context handed to downstream code can never be
/// mutated behind its back. Values are keyed by type: HTTP and RPC specific
/// metadata live side by side without colliding.
#[derive(Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    values: Arc<Extensions>,
}

impl CallContext {
    /// Creates an empty context with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a context whose deadline is the earlier of the current one and `deadline`.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Returns a context that expires `timeout` from now (or earlier, if already bounded).
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| deadline <= Instant::now())
    }

    /// Resolves once the deadline passes. Never resolves for an unbounded context.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    /// Returns a context carrying `value`, replacing any value of the same type.
    #[must_use]
    pub fn with_value<T>(mut self, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.values).insert(value);
        self
    }

    /// Retrieves a value by type. Absence is a normal outcome.
    #[must_use]
    pub fn value<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.values.get::<T>()
    }

    /// Attaches transport metadata.
    #[must_use]
    pub fn with_transport(self, transport: Transport) -> Self {
        self.with_value(transport)
    }

    /// Transport metadata, if the call came through a transport.
    #[must_use]
    pub fn transport(&self) -> Option<&Transport> {
        self.value::<Transport>()
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("deadline", &self.deadline)
            .field("transport", &self.transport())
            .finish_non_exhaustive()
    }
}
