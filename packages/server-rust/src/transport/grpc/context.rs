//! gRPC-specific call metadata, for inbound and outbound calls.

use meridian_core::CallContext;
use tonic::metadata::MetadataMap;

use crate::transport::ReplyHeaders;

/// Inbound call details attached by [`GrpcServer`](super::GrpcServer).
#[derive(Debug, Clone)]
pub struct ServerInfo {
    /// Full method name, `/package.Service/Method`.
    pub full_method: String,
    /// Request metadata sent by the caller.
    pub metadata: MetadataMap,
    /// Headers merged into the response metadata after the handler returns.
    pub reply: ReplyHeaders,
}

impl ServerInfo {
    #[must_use]
    pub fn from_context(ctx: &CallContext) -> Option<&ServerInfo> {
        ctx.value::<ServerInfo>()
    }
}

/// Outbound call details attached by [`Client`](super::Client).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub target: String,
    pub full_method: String,
}

impl ClientInfo {
    #[must_use]
    pub fn from_context(ctx: &CallContext) -> Option<&ClientInfo> {
        ctx.value::<ClientInfo>()
    }
}
