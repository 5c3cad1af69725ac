//! Connection-level Tower middleware shared by both servers.
//!
//! Middleware ordering follows the outer-to-inner convention: the first
//! layer listed is the outermost (processes the request first on the way
//! in, and the response last on the way out). These layers operate on raw
//! HTTP requests; the per-call [`Middleware`](meridian_core::Middleware)
//! chain runs inside them.

use axum::http::header::HeaderName;
use tower::layer::util::{Identity, Stack};
use tower::ServiceBuilder;
use tower_http::classify::{GrpcErrorsAsFailures, ServerErrorsAsFailures, SharedClassifier};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Header carrying the per-request identifier.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request-id and tracing layers around a classifier-specific [`TraceLayer`].
pub type TransportLayers<C> = Stack<
    PropagateRequestIdLayer,
    Stack<TraceLayer<SharedClassifier<C>>, Stack<SetRequestIdLayer<MakeRequestUuid>, Identity>>,
>;

/// Layers for the HTTP server; 5xx responses are traced as failures.
///
/// 1. `SetRequestId`: assigns a UUID v4 `x-request-id` unless the caller sent one
/// 2. `Trace`: one structured span per request
/// 3. `PropagateRequestId`: copies `x-request-id` onto the response
#[must_use]
pub fn build_http_layers() -> TransportLayers<ServerErrorsAsFailures> {
    let x_request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

/// Layers for the gRPC server; non-OK `grpc-status` values are traced as failures.
#[must_use]
pub fn build_grpc_layers() -> TransportLayers<GrpcErrorsAsFailures> {
    let x_request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_grpc())
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}
