//! HTTP-specific call metadata.

use axum::http::{HeaderMap, Method, Uri};
use meridian_core::CallContext;

use crate::transport::ReplyHeaders;

/// Inbound request details attached to every HTTP call.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Headers merged into the response after the handler returns.
    pub reply: ReplyHeaders,
}

impl ServerInfo {
    /// HTTP metadata of the call, if it arrived over HTTP.
    #[must_use]
    pub fn from_context(ctx: &CallContext) -> Option<&ServerInfo> {
        ctx.value::<ServerInfo>()
    }
}
