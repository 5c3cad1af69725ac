//! Deadline middleware for calls.
//!
//! Bounds the inner handler by the deadline carried in the call context and
//! rejects overruns with `DeadlineExceeded`. Calls without a deadline run
//! unbounded.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::{Layer, Service};

use super::{BoxError, Call, Payload};
use crate::errors::{reason, Error};

// ---------------------------------------------------------------------------
// DeadlineLayer
// ---------------------------------------------------------------------------

/// Tower layer that enforces the per-call deadline.
///
/// Transports tighten the deadline from their configured timeout and from
/// any deadline sent by the caller before the call reaches this layer.
#[derive(Debug, Clone, Default)]
pub struct DeadlineLayer;

impl<S> Layer<S> for DeadlineLayer {
    type Service = DeadlineService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DeadlineService { inner }
    }
}

// ---------------------------------------------------------------------------
// DeadlineService
// ---------------------------------------------------------------------------

/// Service wrapper that enforces per-call deadlines.
#[derive(Debug, Clone)]
pub struct DeadlineService<S> {
    inner: S,
}

impl<S> Service<Call> for DeadlineService<S>
where
    S: Service<Call, Response = Payload, Error = BoxError> + Send,
    S::Future: Send + 'static,
{
    type Response = Payload;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Payload, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call) -> Self::Future {
        let Some(deadline) = call.ctx.deadline() else {
            return Box::pin(self.inner.call(call));
        };
        if call.ctx.is_expired() {
            return Box::pin(async { Err::<Payload, BoxError>(exceeded().into()) });
        }
        let fut = self.inner.call(call);
        Box::pin(async move {
            match tokio::time::timeout_at(deadline, fut).await {
                Ok(result) => result,
                Err(_elapsed) => Err(exceeded().into()),
            }
        })
    }
}

fn exceeded() -> Error {
    Error::deadline_exceeded(reason::DEADLINE_EXCEEDED, "deadline exceeded")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
