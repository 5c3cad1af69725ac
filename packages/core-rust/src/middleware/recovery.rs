//! Panic recovery middleware.
//!
//! Converts a panic raised by the inner handler, either while building its
//! future or while polling it, into an `Internal` error with reason `Unknown`.
//! No panic propagates past this layer.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tower::{Layer, Service};

use super::{BoxError, Call, Middleware, Payload};
use crate::errors::{reason, Error};
use crate::log::{Field, Level, Logger};

/// Recovery with no logger: the default middleware of every server and client.
#[must_use]
pub fn recovery() -> Middleware {
    Middleware::from_layer(RecoveryLayer::new())
}

// ---------------------------------------------------------------------------
// RecoveryLayer
// ---------------------------------------------------------------------------

/// Tower layer that turns handler panics into structured errors.
#[derive(Debug, Clone, Default)]
pub struct RecoveryLayer {
    logger: Option<Arc<dyn Logger>>,
}

impl RecoveryLayer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports every recovered panic to `logger` at error level.
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }
}

impl<S> Layer<S> for RecoveryLayer {
    type Service = RecoveryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoveryService {
            inner,
            logger: self.logger.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// RecoveryService
// ---------------------------------------------------------------------------

/// Service wrapper that catches panics from the inner service.
#[derive(Debug, Clone)]
pub struct RecoveryService<S> {
    inner: S,
    logger: Option<Arc<dyn Logger>>,
}

impl<S> Service<Call> for RecoveryService<S>
where
    S: Service<Call, Response = Payload, Error = BoxError> + Send,
    S::Future: Send + 'static,
{
    type Response = Payload;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Payload, BoxError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call) -> Self::Future {
        let logger = self.logger.clone();
        let operation = call
            .ctx
            .transport()
            .map_or_else(String::new, |t| t.operation.clone());

        let inner = &mut self.inner;
        let fut = match panic::catch_unwind(AssertUnwindSafe(move || inner.call(call))) {
            Ok(fut) => fut,
            Err(payload) => {
                let err = recovered(payload.as_ref(), logger.as_deref(), &operation);
                return Box::pin(async move { Err::<Payload, BoxError>(err.into()) });
            }
        };

        Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(recovered(payload.as_ref(), logger.as_deref(), &operation).into()),
            }
        })
    }
}

fn recovered(payload: &(dyn Any + Send), logger: Option<&dyn Logger>, operation: &str) -> Error {
    let description = panic_message(payload);
    if let Some(logger) = logger {
        let fields: [Field<'_>; 2] = [("operation", &operation), ("panic", &description)];
        logger.log(Level::ERROR, "recovered from panic", &fields);
    }
    Error::internal(reason::UNKNOWN, format!("panic: {description}"))
}

/// Best-effort text of a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;

    use tower::ServiceExt;

    use super::*;
    use crate::context::{CallContext, Transport, TransportKind};
    use crate::errors::Code;
    use crate::log::testing::MemoryLogger;
    use crate::middleware::{downcast_payload, handler_fn, invoke};

    /// Service that panics before returning a future.
    #[derive(Clone)]
    struct EagerPanic;

    impl Service<Call> for EagerPanic {
        type Response = Payload;
        type Error = BoxError;
        type Future = Pin<Box<dyn Future<Output = Result<Payload, BoxError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _call: Call) -> Self::Future {
            panic!("eager panic");
        }
    }

    fn panicking_handler() -> super::super::Handler {
        handler_fn(|_ctx: CallContext, name: String| async move {
            if name == "panic" {
                panic!("grpc panic");
            }
            Ok::<_, Error>(name)
        })
    }

    #[tokio::test]
    async fn panic_in_future_becomes_internal_unknown() {
        let handler = recovery().wrap(panicking_handler());
        let err = invoke(&handler, Call::new(CallContext::new(), "panic".to_string()))
            .await
            .unwrap_err();
        let err = Error::from_boxed(err);
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(err.reason(), reason::UNKNOWN);
        assert_eq!(err.message(), "panic: grpc panic");
    }

    #[tokio::test]
    async fn panic_while_building_future_is_caught() {
        let svc = RecoveryLayer::new().layer(EagerPanic);
        let err = svc
            .oneshot(Call::new(CallContext::new(), ()))
            .await
            .unwrap_err();
        let err = Error::from_boxed(err);
        assert_eq!(err.reason(), reason::UNKNOWN);
        assert_eq!(err.message(), "panic: eager panic");
    }

    #[tokio::test]
    async fn successful_calls_pass_through() {
        let handler = recovery().wrap(panicking_handler());
        let reply = invoke(&handler, Call::new(CallContext::new(), "ok".to_string()))
            .await
            .unwrap();
        assert_eq!(downcast_payload::<String>(reply).unwrap(), "ok");
    }

    #[tokio::test]
    async fn handler_errors_are_not_rewritten() {
        let failing = handler_fn(|_ctx: CallContext, _req: ()| async {
            Err::<(), _>(Error::not_found("UserMissing", "no such user"))
        });
        let handler = recovery().wrap(failing);
        let err = invoke(&handler, Call::new(CallContext::new(), ()))
            .await
            .unwrap_err();
        assert_eq!(Error::from_boxed(err).reason(), "UserMissing");
    }

    #[tokio::test]
    async fn recovered_panic_is_logged() {
        let logger = Arc::new(MemoryLogger::default());
        let layer = RecoveryLayer::new().with_logger(logger.clone());
        let handler = Middleware::from_layer(layer).wrap(panicking_handler());
        let ctx = CallContext::new()
            .with_transport(Transport::new(TransportKind::Http, "/hello"));

        let _ = invoke(&handler, Call::new(ctx, "panic".to_string())).await;

        let records = logger.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, Level::ERROR);
        assert_eq!(records[0].field("operation"), Some("/hello"));
        assert_eq!(records[0].field("panic"), Some("grpc panic"));
    }
}
