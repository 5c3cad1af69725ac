//! gRPC server: unary `prost` methods served over HTTP/2 through `axum`.
//!
//! Each registered method is an `axum` route at its full method path. The
//! route decodes the request with `tonic`'s codec machinery, runs the
//! middleware chain, and encodes the reply or a status carrying the
//! structured error.

use std::any::Any;
use std::collections::HashSet;
use std::convert::Infallible;
use std::future::Future;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Uri};
use axum::response::Response;
use axum::Router;
use meridian_core::errors::reason;
use meridian_core::middleware::recovery::panic_message;
use meridian_core::middleware::DeadlineLayer;
use meridian_core::{
    downcast_payload, invoke, Call, CallContext, Error, Handler, Middleware, Transport,
    TransportKind,
};
use tonic::server::{Grpc, UnaryService};
use tonic::Status;
use tonic_prost::ProstCodec;
use tower::service_fn;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::error;

use super::context::ServerInfo;
use super::status::{parse_grpc_timeout, to_status};
use crate::config::GrpcServerConfig;
use crate::error::TransportError;
use crate::network::middleware::build_grpc_layers;
use crate::network::{Lifecycle, ShutdownController};
use crate::transport::{ReplyHeaders, Server};

const APPLICATION_GRPC: &str = "application/grpc";

// ---------------------------------------------------------------------------
// GrpcServer
// ---------------------------------------------------------------------------

/// gRPC transport server.
#[derive(Debug)]
pub struct GrpcServer {
    config: GrpcServerConfig,
    router: Router,
    methods: HashSet<String>,
    lifecycle: Lifecycle,
}

impl GrpcServer {
    #[must_use]
    pub fn new(config: GrpcServerConfig) -> Self {
        let lifecycle = Lifecycle::new("grpc", config.address.clone(), config.timeout);
        Self {
            config,
            router: Router::new(),
            methods: HashSet::new(),
            lifecycle,
        }
    }

    #[must_use]
    pub fn config(&self) -> &GrpcServerConfig {
        &self.config
    }

    /// Registers a unary method under its full name, `/package.Service/Method`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidRoute`] for a malformed name and
    /// [`TransportError::DuplicateRoute`] if the method is already registered.
    pub fn handle<Req, Res>(
        &mut self,
        full_method: &str,
        handler: Handler,
    ) -> Result<&mut Self, TransportError>
    where
        Req: prost::Message + Default + Send + 'static,
        Res: prost::Message + Send + 'static,
    {
        validate_method(full_method)?;
        if !self.methods.insert(full_method.to_string()) {
            return Err(TransportError::DuplicateRoute(full_method.to_string()));
        }

        let route = UnaryRoute {
            full_method: Arc::from(full_method),
            handler: self
                .config
                .middleware
                .wrap(Middleware::from_layer(DeadlineLayer).wrap(handler)),
            timeout: self.config.timeout,
            controller: self.lifecycle.controller(),
        };
        let service = service_fn(move |request: Request| {
            let route = route.clone();
            async move { Ok::<_, Infallible>(route.serve::<Req, Res>(request).await) }
        });

        let router = std::mem::replace(&mut self.router, Router::new());
        self.router = router.route_service(full_method, service);
        Ok(self)
    }

    /// Assembles the full router: registered methods, fallback, and layers.
    pub fn build_router(&self) -> Router {
        self.router
            .clone()
            .fallback(unimplemented)
            .layer(build_grpc_layers())
            .layer(CatchPanicLayer::custom(panic_response))
    }

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
impl Server for GrpcServer {
    fn kind(&self) -> TransportKind {
        TransportKind::Rpc
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.lifecycle.serve(self.build_router()).await
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.lifecycle.stop().await
    }
}

fn validate_method(full_method: &str) -> Result<(), TransportError> {
    let mut parts = full_method.split('/');
    let valid = matches!(
        (parts.next(), parts.next(), parts.next(), parts.next()),
        (Some(""), Some(service), Some(method), None)
            if !service.is_empty()
                && !method.is_empty()
                && !full_method.contains(['{', '}', '*', ':'])
    );
    if valid {
        Ok(())
    } else {
        Err(TransportError::InvalidRoute {
            path: full_method.to_string(),
            reason: "expected /package.Service/Method",
        })
    }
}

// ---------------------------------------------------------------------------
// Per-call dispatch
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct UnaryRoute {
    full_method: Arc<str>,
    handler: Handler,
    timeout: Duration,
    controller: Arc<ShutdownController>,
}

impl UnaryRoute {
    async fn serve<Req, Res>(self, request: Request) -> Response
    where
        Req: prost::Message + Default + Send + 'static,
        Res: prost::Message + Send + 'static,
    {
        let mut ctx = CallContext::new().with_timeout(self.timeout);
        if let Some(timeout) = parse_grpc_timeout(request.headers()) {
            ctx = ctx.with_timeout(timeout);
        }
        let ctx = ctx.with_transport(Transport::new(TransportKind::Rpc, &*self.full_method));

        let reply = ReplyHeaders::default();
        let adapter = UnaryAdapter::<Req, Res> {
            route: self,
            ctx,
            reply: reply.clone(),
            _marker: PhantomData,
        };

        let mut grpc = Grpc::new(ProstCodec::<Res, Req>::default());
        let response = grpc.unary(adapter, request).await;

        let (mut parts, body) = response.into_parts();
        reply.merge_into(&mut parts.headers);
        Response::from_parts(parts, Body::new(body))
    }
}

/// Presents the middleware-wrapped handler as a `tonic` unary service.
struct UnaryAdapter<Req, Res> {
    route: UnaryRoute,
    ctx: CallContext,
    reply: ReplyHeaders,
    _marker: PhantomData<fn(Req) -> Res>,
}

impl<Req, Res> UnaryService<Req> for UnaryAdapter<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    type Response = Res;
    type Future = Pin<Box<dyn Future<Output = Result<tonic::Response<Res>, Status>> + Send>>;

    fn call(&mut self, request: tonic::Request<Req>) -> Self::Future {
        if self.route.controller.is_shutdown_triggered() {
            let err = Error::unavailable(reason::SERVER_DRAINING, "server is shutting down");
            return Box::pin(async move { Err(to_status(&err)) });
        }
        let guard = self.route.controller.in_flight_guard();

        let (metadata, _extensions, message) = request.into_parts();
        let ctx = self.ctx.clone().with_value(ServerInfo {
            full_method: self.route.full_method.to_string(),
            metadata,
            reply: self.reply.clone(),
        });
        let handler = self.route.handler.clone();

        Box::pin(async move {
            let _guard = guard;
            let reply = match invoke(&handler, Call::new(ctx, message)).await {
                Ok(payload) => downcast_payload::<Res>(payload),
                Err(err) => Err(Error::from_boxed(err)),
            };
            reply
                .map(tonic::Response::new)
                .map_err(|err| to_status(&err))
        })
    }
}

// ---------------------------------------------------------------------------
// Status-only responses
// ---------------------------------------------------------------------------

/// A trailers-only gRPC response carrying just a status.
fn status_response(code: tonic::Code, message: &str) -> Response {
    let mut response = Response::new(Body::empty());
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_GRPC));
    headers.insert("grpc-status", HeaderValue::from(code as i32));
    let encoded = message.replace('%', "%25");
    if let Ok(value) = HeaderValue::from_str(&encoded) {
        headers.insert("grpc-message", value);
    }
    response
}

async fn unimplemented(uri: Uri) -> Response {
    status_response(
        tonic::Code::Unimplemented,
        &format!("unknown method {}", uri.path()),
    )
}

fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic_message(payload.as_ref());
    error!(panic = %message, "gRPC method panicked");
    status_response(tonic::Code::Internal, &format!("panic: {message}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
