//! Per-call logging middleware.
//!
//! Emits one record per call through an injected [`Logger`]: the call side,
//! transport kind, operation, latency, and for failures the structured code
//! and reason. Failed calls are logged at error level, everything else at
//! info.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::time::Instant;
use tower::{Layer, Service};

use super::{BoxError, Call, Middleware, Payload};
use crate::errors::Error;
use crate::log::{Field, Level, Logger};

/// Logging for inbound calls, installed on servers.
#[must_use]
pub fn server(logger: Arc<dyn Logger>) -> Middleware {
    Middleware::from_layer(LoggingLayer::new(Side::Server, logger))
}

/// Logging for outbound calls, installed on clients.
#[must_use]
pub fn client(logger: Arc<dyn Logger>) -> Middleware {
    Middleware::from_layer(LoggingLayer::new(Side::Client, logger))
}

/// Which end of the call the middleware runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Server,
    Client,
}

impl Side {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Server => "server",
            Side::Client => "client",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// LoggingLayer
// ---------------------------------------------------------------------------

/// Tower layer that logs every call's outcome and latency.
#[derive(Debug, Clone)]
pub struct LoggingLayer {
    side: Side,
    logger: Arc<dyn Logger>,
}

impl LoggingLayer {
    #[must_use]
    pub fn new(side: Side, logger: Arc<dyn Logger>) -> Self {
        Self { side, logger }
    }
}

impl<S> Layer<S> for LoggingLayer {
    type Service = LoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingService {
            inner,
            side: self.side,
            logger: Arc::clone(&self.logger),
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingService
// ---------------------------------------------------------------------------

/// Service wrapper that records call outcome through a [`Logger`].
#[derive(Debug, Clone)]
pub struct LoggingService<S> {
    inner: S,
    side: Side,
    logger: Arc<dyn Logger>,
}

impl<S> Service<Call> for LoggingService<S>
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
        let (component, operation) = match call.ctx.transport() {
            Some(transport) => (transport.kind.as_str(), transport.operation.clone()),
            None => ("unknown", String::new()),
        };
        let side = self.side;
        let logger = Arc::clone(&self.logger);
        let fut = self.inner.call(call);

        Box::pin(async move {
            let start = Instant::now();
            let result = fut.await;
            let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
            let latency = format!("{latency_ms:.3}");

            match &result {
                Ok(_) => {
                    let fields: [Field<'_>; 5] = [
                        ("kind", &side),
                        ("component", &component),
                        ("operation", &operation),
                        ("code", &0),
                        ("latency_ms", &latency),
                    ];
                    logger.log(Level::INFO, "call completed", &fields);
                }
                Err(err) => {
                    let err = Error::from_ref(err.as_ref());
                    let code = err.code().as_i32();
                    let fields: [Field<'_>; 7] = [
                        ("kind", &side),
                        ("component", &component),
                        ("operation", &operation),
                        ("code", &code),
                        ("reason", &err.reason()),
                        ("message", &err.message()),
                        ("latency_ms", &latency),
                    ];
                    logger.log(Level::ERROR, "call failed", &fields);
                }
            }
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
