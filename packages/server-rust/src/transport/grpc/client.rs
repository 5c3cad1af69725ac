//! Outbound gRPC calls through the middleware chain.

use std::time::Duration;

use axum::http::uri::PathAndQuery;
use meridian_core::errors::reason;
use meridian_core::middleware::DeadlineLayer;
use meridian_core::{
    downcast_payload, handler_fn, invoke, Call, CallContext, Error, Handler, Middleware,
    Transport, TransportKind,
};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::Status;
use tonic_prost::ProstCodec;
use tracing::debug;

use super::context::ClientInfo;
use super::status::from_status;
use crate::config::ClientConfig;
use crate::error::TransportError;

/// A call failing this close to its deadline is treated as having timed out.
const DEADLINE_SLACK: Duration = Duration::from_millis(5);

/// Opens a channel to `target` (`host:port` or a full `http(s)://` URI).
///
/// Without a scheme the target gets `https://`, or `http://` when
/// `config.insecure` is set.
///
/// # Errors
///
/// Returns [`TransportError::InvalidTarget`] for an empty or unparsable
/// target and [`TransportError::Connect`] when an eager connect fails.
pub async fn dial(target: &str, config: ClientConfig) -> Result<Client, TransportError> {
    let invalid = |reason: String| TransportError::InvalidTarget {
        target: target.to_string(),
        reason,
    };
    if target.trim().is_empty() {
        return Err(invalid("target is empty".to_string()));
    }

    let uri = if target.contains("://") {
        target.to_string()
    } else if config.insecure {
        format!("http://{target}")
    } else {
        format!("https://{target}")
    };
    let mut endpoint = Endpoint::from_shared(uri.clone()).map_err(|err| invalid(err.to_string()))?;
    if uri.starts_with("https://") {
        endpoint = endpoint
            .tls_config(ClientTlsConfig::new().with_webpki_roots())
            .map_err(|err| invalid(err.to_string()))?;
    }
    if let Some(connect_timeout) = config.connect_timeout {
        endpoint = endpoint.connect_timeout(connect_timeout);
    }

    let channel = if config.lazy {
        endpoint.connect_lazy()
    } else {
        endpoint.connect().await.map_err(|source| TransportError::Connect {
            target: target.to_string(),
            source,
        })?
    };
    debug!(target = %target, lazy = config.lazy, "gRPC channel opened");

    Ok(Client {
        target: target.to_string(),
        channel,
        timeout: config.timeout,
        middleware: config.middleware,
    })
}

/// A dialed gRPC connection. Cheap to clone; clones share the channel.
#[derive(Debug, Clone)]
pub struct Client {
    target: String,
    channel: Channel,
    timeout: Duration,
    middleware: Middleware,
}

impl Client {
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The underlying channel, for generated `tonic` stubs.
    #[must_use]
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// Calls a unary method with a fresh context bounded by the client timeout.
    ///
    /// # Errors
    ///
    /// Returns the structured error recovered from the call's status, or one
    /// raised by the middleware chain (for example `DeadlineExceeded`).
    pub async fn invoke<Req, Res>(&self, full_method: &str, request: Req) -> Result<Res, Error>
    where
        Req: prost::Message + Send + Sync + 'static,
        Res: prost::Message + Default + Send + Sync + 'static,
    {
        self.invoke_with(CallContext::new(), full_method, request).await
    }

    /// Like [`Client::invoke`], deriving the call context from `parent`.
    ///
    /// The parent's values stay visible to middleware and its deadline is
    /// kept when earlier than the client timeout.
    ///
    /// # Errors
    ///
    /// Same as [`Client::invoke`].
    pub async fn invoke_with<Req, Res>(
        &self,
        parent: CallContext,
        full_method: &str,
        request: Req,
    ) -> Result<Res, Error>
    where
        Req: prost::Message + Send + Sync + 'static,
        Res: prost::Message + Default + Send + Sync + 'static,
    {
        let path = PathAndQuery::try_from(full_method)
            .ok()
            .filter(|path| path.as_str().starts_with('/'))
            .ok_or_else(|| {
                Error::invalid_argument(
                    reason::INVALID_METHOD,
                    format!("invalid method name {full_method}"),
                )
            })?;

        let handler = self
            .middleware
            .wrap(Middleware::from_layer(DeadlineLayer).wrap(self.invoker::<Req, Res>(path)));
        let ctx = parent
            .with_timeout(self.timeout)
            .with_transport(Transport::new(TransportKind::Rpc, full_method))
            .with_value(ClientInfo {
                target: self.target.clone(),
                full_method: full_method.to_string(),
            });

        let payload = invoke(&handler, Call::new(ctx, request))
            .await
            .map_err(Error::from_boxed)?;
        downcast_payload::<Res>(payload)
    }

    /// Calls a unary method and stores the reply in `reply`.
    ///
    /// `reply` is left untouched when the call fails.
    ///
    /// # Errors
    ///
    /// Same as [`Client::invoke`].
    pub async fn invoke_into<Req, Res>(
        &self,
        full_method: &str,
        request: Req,
        reply: &mut Res,
    ) -> Result<(), Error>
    where
        Req: prost::Message + Send + Sync + 'static,
        Res: prost::Message + Default + Send + Sync + 'static,
    {
        *reply = self.invoke::<Req, Res>(full_method, request).await?;
        Ok(())
    }

    /// The innermost handler: one unary call on the channel.
    fn invoker<Req, Res>(&self, path: PathAndQuery) -> Handler
    where
        Req: prost::Message + Send + Sync + 'static,
        Res: prost::Message + Default + Send + Sync + 'static,
    {
        let channel = self.channel.clone();
        handler_fn(move |ctx: CallContext, request: Req| {
            let mut grpc = tonic::client::Grpc::new(channel.clone());
            let path = path.clone();
            async move {
                let mut request = tonic::Request::new(request);
                if let Some(remaining) = ctx.remaining() {
                    request.set_timeout(remaining);
                }
                grpc.ready().await.map_err(|err| {
                    Error::unavailable(reason::UNKNOWN, format!("channel not ready: {err}"))
                })?;
                let response = grpc
                    .unary(request, path, ProstCodec::<Req, Res>::default())
                    .await
                    .map_err(|status| call_error(&ctx, &status))?;
                Ok::<Res, Error>(response.into_inner())
            }
        })
    }
}

/// Maps a failed call's status to an error.
///
/// The channel's own `grpc-timeout` timer can fire before the context
/// deadline does and reports `Cancelled`. Once the deadline has passed, any
/// cancellation is reported as `DeadlineExceeded`.
fn call_error(ctx: &CallContext, status: &Status) -> Error {
    let timed_out = matches!(
        status.code(),
        tonic::Code::Cancelled | tonic::Code::DeadlineExceeded
    ) && ctx
        .remaining()
        .is_some_and(|remaining| remaining <= DEADLINE_SLACK);
    if timed_out {
        Error::deadline_exceeded(reason::DEADLINE_EXCEEDED, status.message())
    } else {
        from_status(status)
    }
}
