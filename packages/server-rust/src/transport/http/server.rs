//! HTTP server with typed JSON routes and raw `axum` routes.
//!
//! Typed routes accept `GET` (request decoded from the query string) and
//! `POST` (JSON body) and run the configured middleware chain around the
//! handler. The configured [`HttpCodec`] may replace any encoding step. Raw
//! routes are plain `axum` method routers; they still receive the call
//! context as a request extension but bypass the chain.
//!
//! Request path, outermost first:
//! 1. `CatchPanic`: last-resort net turning panics into a structured 500
//! 2. request-id and tracing layers
//! 3. body limit
//! 4. call setup: draining check, in-flight guard, call context, reply headers
//! 5. the route (typed: middleware chain, then deadline, then handler)

use std::any::Any;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;
use axum::routing::{on, MethodFilter, MethodRouter};
use axum::{Extension, Router};
use meridian_core::errors::reason;
use meridian_core::middleware::recovery::panic_message;
use meridian_core::middleware::DeadlineLayer;
use meridian_core::{
    downcast_payload, invoke, Call, CallContext, Error, Handler, Middleware, Transport,
    TransportKind,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::error;

use super::codec::HttpCodec;
use super::context::ServerInfo;
use crate::config::HttpServerConfig;
use crate::error::TransportError;
use crate::network::middleware::build_http_layers;
use crate::network::{Lifecycle, ShutdownController};
use crate::transport::{ReplyHeaders, Server};

// ---------------------------------------------------------------------------
// HttpServer
// ---------------------------------------------------------------------------

/// HTTP transport server.
///
/// Routes are registered through `&mut self`, so the table is fixed once the
/// server is shared and started.
#[derive(Debug)]
pub struct HttpServer {
    config: HttpServerConfig,
    router: Router,
    paths: HashSet<String>,
    lifecycle: Lifecycle,
}

impl HttpServer {
    #[must_use]
    pub fn new(config: HttpServerConfig) -> Self {
        let lifecycle = Lifecycle::new("http", config.address.clone(), config.timeout);
        Self {
            config,
            router: Router::new(),
            paths: HashSet::new(),
            lifecycle,
        }
    }

    #[must_use]
    pub fn config(&self) -> &HttpServerConfig {
        &self.config
    }

    /// Registers a typed JSON route for `GET` and `POST`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidRoute`] for a malformed path and
    /// [`TransportError::DuplicateRoute`] if the path is already taken.
    pub fn handle<Req, Res>(&mut self, path: &str, handler: Handler) -> Result<&mut Self, TransportError>
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
    {
        let handler = self
            .config
            .middleware
            .wrap(Middleware::from_layer(DeadlineLayer).wrap(handler));
        let codec = self.config.codec.clone();
        self.insert(path, typed_route::<Req, Res>(handler, codec))
    }

    /// Registers a raw `axum` method router.
    ///
    /// # Errors
    ///
    /// Same as [`HttpServer::handle`].
    pub fn route(&mut self, path: &str, method_router: MethodRouter) -> Result<&mut Self, TransportError> {
        self.insert(path, method_router)
    }

    /// Opens a registration scope under `prefix`.
    pub fn group(&mut self, prefix: &str) -> RouteGroup<'_> {
        RouteGroup {
            server: self,
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    fn insert(&mut self, path: &str, method_router: MethodRouter) -> Result<&mut Self, TransportError> {
        validate_path(path)?;
        if !self.paths.insert(path.to_string()) {
            return Err(TransportError::DuplicateRoute(path.to_string()));
        }
        let router = std::mem::replace(&mut self.router, Router::new());
        self.router = router.route(path, method_router);
        Ok(self)
    }

    /// Assembles the full router: registered routes, fallback, and layers.
    pub fn build_router(&self) -> Router {
        let codec = self.config.codec.clone();
        let state = CallSetup {
            timeout: self.config.timeout,
            controller: self.lifecycle.controller(),
            codec: codec.clone(),
        };
        let fallback = {
            let codec = codec.clone();
            move |uri: Uri| {
                let response = not_found(&codec, &uri);
                async move { response }
            }
        };
        self.router
            .clone()
            .fallback(fallback)
            .layer(from_fn_with_state(state, setup_call))
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .layer(build_http_layers())
            .layer(CatchPanicLayer::custom(move |payload: Box<dyn Any + Send + 'static>| {
                panic_response(&codec, payload)
            }))
    }

    /// The bound address while serving.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.local_addr()
    }

    /// Waits until the listener is bound; `None` if serving ended first.
    pub async fn ready(&self) -> Option<SocketAddr> {
        self.lifecycle.ready().await
    }
}

#[async_trait]
impl Server for HttpServer {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.lifecycle.serve(self.build_router()).await
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.lifecycle.stop().await
    }
}

// ---------------------------------------------------------------------------
// RouteGroup
// ---------------------------------------------------------------------------

/// Registration scope that prefixes every path. Purely organizational: the
/// routes land in the owning server's table.
#[derive(Debug)]
pub struct RouteGroup<'a> {
    server: &'a mut HttpServer,
    prefix: String,
}

impl RouteGroup<'_> {
    /// # Errors
    ///
    /// Same as [`HttpServer::handle`], checked against the joined path.
    pub fn handle<Req, Res>(&mut self, path: &str, handler: Handler) -> Result<&mut Self, TransportError>
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
    {
        let full = self.join(path);
        self.server.handle::<Req, Res>(&full, handler)?;
        Ok(self)
    }

    /// # Errors
    ///
    /// Same as [`HttpServer::route`], checked against the joined path.
    pub fn route(&mut self, path: &str, method_router: MethodRouter) -> Result<&mut Self, TransportError> {
        let full = self.join(path);
        self.server.route(&full, method_router)?;
        Ok(self)
    }

    /// Opens a nested scope.
    pub fn group(&mut self, prefix: &str) -> RouteGroup<'_> {
        let prefix = self.join(prefix.trim_end_matches('/'));
        RouteGroup {
            server: &mut *self.server,
            prefix,
        }
    }

    fn join(&self, path: &str) -> String {
        format!("{}{path}", self.prefix)
    }
}

fn validate_path(path: &str) -> Result<(), TransportError> {
    let invalid = |reason| TransportError::InvalidRoute {
        path: path.to_string(),
        reason,
    };
    if !path.starts_with('/') {
        return Err(invalid("path must start with '/'"));
    }
    if path
        .split('/')
        .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
    {
        return Err(invalid("captures use the {name} syntax"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Per-call dispatch
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct CallSetup {
    timeout: Duration,
    controller: Arc<ShutdownController>,
    codec: HttpCodec,
}

/// Rejects calls while draining, then attaches the call context.
async fn setup_call(State(setup): State<CallSetup>, mut request: Request, next: Next) -> Response {
    if setup.controller.is_shutdown_triggered() {
        return setup.codec.encode_error(&Error::unavailable(
            reason::SERVER_DRAINING,
            "server is shutting down",
        ));
    }
    let _guard = setup.controller.in_flight_guard();

    let reply = ReplyHeaders::default();
    let info = ServerInfo {
        method: request.method().clone(),
        uri: request.uri().clone(),
        headers: request.headers().clone(),
        reply: reply.clone(),
    };
    let ctx = CallContext::new()
        .with_timeout(setup.timeout)
        .with_transport(Transport::new(TransportKind::Http, request.uri().path()))
        .with_value(info);
    request.extensions_mut().insert(ctx);

    let mut response = next.run(request).await;
    reply.merge_into(response.headers_mut());
    response
}

fn typed_route<Req, Res>(handler: Handler, codec: HttpCodec) -> MethodRouter
where
    Req: DeserializeOwned + Send + 'static,
    Res: Serialize + Send + 'static,
{
    on(
        MethodFilter::GET.or(MethodFilter::POST),
        move |Extension(ctx): Extension<CallContext>,
              method: Method,
              uri: Uri,
              headers: HeaderMap,
              body: Bytes| {
            let handler = handler.clone();
            let codec = codec.clone();
            async move {
                let request = Inbound {
                    method: &method,
                    uri: &uri,
                    headers: &headers,
                    body: &body,
                };
                dispatch::<Req, Res>(&handler, &codec, ctx, request).await
            }
        },
    )
}

/// The parts of a request a typed route decodes from.
struct Inbound<'a> {
    method: &'a Method,
    uri: &'a Uri,
    headers: &'a HeaderMap,
    body: &'a [u8],
}

async fn dispatch<Req, Res>(
    handler: &Handler,
    codec: &HttpCodec,
    ctx: CallContext,
    inbound: Inbound<'_>,
) -> Response
where
    Req: DeserializeOwned + Send + 'static,
    Res: Serialize + Send + 'static,
{
    let decoded = codec.decode::<Req>(inbound.method, inbound.uri, inbound.headers, inbound.body);
    let request = match decoded {
        Ok(request) => request,
        Err(err) => return codec.encode_error(&err),
    };
    let reply = match invoke(handler, Call::new(ctx, request)).await {
        Ok(payload) => downcast_payload::<Res>(payload),
        Err(err) => Err(Error::from_boxed(err)),
    };
    match reply {
        Ok(reply) => codec.encode(&reply),
        Err(err) => codec.encode_error(&err),
    }
}

fn not_found(codec: &HttpCodec, uri: &Uri) -> Response {
    codec.encode_error(&Error::not_found(
        reason::NOT_FOUND,
        format!("no route for {}", uri.path()),
    ))
}

fn panic_response(codec: &HttpCodec, payload: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic_message(payload.as_ref());
    error!(panic = %message, "HTTP route panicked");
    codec.encode_error(&Error::internal(reason::UNKNOWN, format!("panic: {message}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
