//! Handler contract and middleware composition.
//!
//! A [`Handler`] is a type-erased `tower` service from [`Call`] (context plus
//! request payload) to a response payload. A [`Middleware`] turns one handler
//! into another of the same shape, so middleware nests freely and a chain is
//! itself a middleware.
//!
//! Ordering follows the outer-to-inner convention: in `chain([a, b, c])`, `a`
//! sees the request first and the response last.
//!
//! - [`recovery`]: converts panics into `Internal`/`Unknown` errors
//! - [`deadline`]: enforces the call context deadline
//! - [`logging`]: records one log line per call through a [`Logger`](crate::Logger)

pub mod deadline;
pub mod logging;
pub mod recovery;

use std::any::{type_name, Any};
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tower::util::BoxCloneSyncService;
use tower::{service_fn, Layer, Service, ServiceExt};

use crate::context::CallContext;
use crate::errors::{reason, Error};

pub use deadline::DeadlineLayer;
pub use logging::LoggingLayer;
pub use recovery::{recovery, RecoveryLayer};

/// Boxed error type flowing through handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Type-erased request or response value.
pub type Payload = Box<dyn Any + Send>;

/// The uniform handler shape shared by every transport.
pub type Handler = BoxCloneSyncService<Call, Payload, BoxError>;

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

/// One invocation: the per-call context and the decoded request.
pub struct Call {
    pub ctx: CallContext,
    pub payload: Payload,
}

impl Call {
    #[must_use]
    pub fn new<T: Send + 'static>(ctx: CallContext, payload: T) -> Self {
        Self {
            ctx,
            payload: Box::new(payload),
        }
    }

    /// Borrows the request as `T`, if that is its type.
    #[must_use]
    pub fn request<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

/// Recovers a typed value from a payload.
///
/// # Errors
///
/// Returns an `Internal`/`CodecError` error if the payload holds another type.
pub fn downcast_payload<T: 'static>(payload: Payload) -> Result<T, Error> {
    payload.downcast::<T>().map(|value| *value).map_err(|_| {
        Error::internal(
            reason::CODEC,
            format!("unexpected payload type, expected {}", type_name::<T>()),
        )
    })
}

/// Invokes a handler once.
///
/// # Errors
///
/// Returns whatever error the handler produced.
pub async fn invoke(handler: &Handler, call: Call) -> Result<Payload, BoxError> {
    handler.clone().oneshot(call).await
}

/// Adapts a typed async function into a [`Handler`].
pub fn handler_fn<F, Fut, Req, Res, E>(f: F) -> Handler
where
    F: Fn(CallContext, Req) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Res, E>> + Send + 'static,
    Req: Send + 'static,
    Res: Send + 'static,
    E: Into<BoxError> + 'static,
{
    BoxCloneSyncService::new(service_fn(move |call: Call| {
        let f = f.clone();
        async move {
            let request = downcast_payload::<Req>(call.payload)?;
            let response = f(call.ctx, request).await.map_err(Into::<BoxError>::into)?;
            Ok::<Payload, BoxError>(Box::new(response))
        }
    }))
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

type WrapFn = dyn Fn(Handler) -> Handler + Send + Sync;

/// A reusable `Handler -> Handler` transformation.
///
/// Immutable once built and shared freely across concurrent calls.
#[derive(Clone)]
pub struct Middleware {
    name: Cow<'static, str>,
    wrap: Arc<WrapFn>,
}

impl Middleware {
    /// Builds a middleware from any `tower` layer over handlers.
    pub fn from_layer<L>(layer: L) -> Self
    where
        L: Layer<Handler> + Send + Sync + 'static,
        L::Service: Service<Call, Response = Payload, Error = BoxError> + Clone + Send + Sync + 'static,
        <L::Service as Service<Call>>::Future: Send + 'static,
    {
        Self {
            name: Cow::Borrowed(short_type_name::<L>()),
            wrap: Arc::new(move |next: Handler| BoxCloneSyncService::new(layer.layer(next))),
        }
    }

    /// Builds a middleware from an async closure receiving the call and the next handler.
    pub fn from_fn<F, Fut>(name: &'static str, f: F) -> Self
    where
        F: Fn(Call, Handler) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, BoxError>> + Send + 'static,
    {
        Self {
            name: Cow::Borrowed(name),
            wrap: Arc::new(move |next: Handler| {
                let f = f.clone();
                BoxCloneSyncService::new(service_fn(move |call: Call| f(call, next.clone())))
            }),
        }
    }

    /// The middleware that returns its input unchanged.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            name: Cow::Borrowed("identity"),
            wrap: Arc::new(|next: Handler| next),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wraps `next`, producing a handler with the same signature.
    #[must_use]
    pub fn wrap(&self, next: Handler) -> Handler {
        (self.wrap)(next)
    }
}

impl Default for Middleware {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Middleware").field(&self.name).finish()
    }
}

impl Layer<Handler> for Middleware {
    type Service = Handler;

    fn layer(&self, inner: Handler) -> Handler {
        self.wrap(inner)
    }
}

/// Composes middleware so the first element is outermost.
///
/// An empty chain is the identity.
pub fn chain<I>(middlewares: I) -> Middleware
where
    I: IntoIterator<Item = Middleware>,
{
    let items: Vec<Middleware> = middlewares.into_iter().collect();
    if items.is_empty() {
        return Middleware::identity();
    }
    let names: Vec<&str> = items.iter().map(Middleware::name).collect();
    let name = format!("chain({})", names.join(", "));
    Middleware {
        name: Cow::Owned(name),
        wrap: Arc::new(move |next: Handler| items.iter().rev().fold(next, |inner, m| m.wrap(inner))),
    }
}

fn short_type_name<T>() -> &'static str {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
