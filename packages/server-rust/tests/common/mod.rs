//! Shared fixtures: a greeter served on ephemeral ports.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue};
use meridian_core::{handler_fn, CallContext, Error, Handler};
use meridian_server::transport::{grpc, http, Server};
use meridian_server::{
    dial, Client, ClientConfig, GrpcServer, GrpcServerConfig, HttpServer, HttpServerConfig,
    TransportError,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

pub const SAY_HELLO: &str = "/helloworld.Greeter/SayHello";

#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
pub struct HelloRequest {
    #[prost(string, tag = "1")]
    #[serde(default)]
    pub name: String,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
pub struct HelloReply {
    #[prost(string, tag = "1")]
    pub message: String,
}

pub fn hello(name: &str) -> HelloRequest {
    HelloRequest {
        name: name.to_string(),
    }
}

/// Greets by name, with a few names reserved for behavior:
///
/// - `error` fails and `panic` panics
/// - `slow` outlives any deadline; `nap` takes 300ms
/// - `whoami` echoes the operation name from the call context
/// - `meta` sets the `x-greeted` reply header
/// - `deadline` replies with the milliseconds left on the call
pub fn greeter() -> Handler {
    handler_fn(|ctx: CallContext, request: HelloRequest| async move {
        match request.name.as_str() {
            "error" => Err(Error::invalid_argument("BadRequest", "invalid argument error")),
            "panic" => panic!("grpc panic"),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Ok(HelloReply {
                    message: "too late".to_string(),
                })
            }
            "nap" => {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(HelloReply {
                    message: "Hello nap".to_string(),
                })
            }
            "meta" => {
                let reply = grpc::ServerInfo::from_context(&ctx)
                    .map(|info| info.reply.clone())
                    .or_else(|| http::ServerInfo::from_context(&ctx).map(|info| info.reply.clone()));
                if let Some(reply) = reply {
                    reply.insert(
                        HeaderName::from_static("x-greeted"),
                        HeaderValue::from_static("yes"),
                    );
                }
                Ok(HelloReply {
                    message: "Hello meta".to_string(),
                })
            }
            "deadline" => Ok(HelloReply {
                message: ctx
                    .remaining()
                    .map(|remaining| remaining.as_millis().to_string())
                    .unwrap_or_default(),
            }),
            "whoami" => Ok(HelloReply {
                message: ctx
                    .transport()
                    .map(|transport| format!("{} {}", transport.kind, transport.operation))
                    .unwrap_or_default(),
            }),
            name => Ok(HelloReply {
                message: format!("Hello {name}"),
            }),
        }
    })
}

pub fn http_server() -> Arc<HttpServer> {
    let mut server = HttpServer::new(HttpServerConfig {
        address: "127.0.0.1:0".to_string(),
        ..HttpServerConfig::default()
    });
    server
        .group("/helloworld")
        .handle::<HelloRequest, HelloReply>("/hello", greeter())
        .unwrap();
    Arc::new(server)
}

pub fn grpc_server() -> Arc<GrpcServer> {
    let mut server = GrpcServer::new(GrpcServerConfig {
        address: "127.0.0.1:0".to_string(),
        timeout: Duration::from_secs(5),
        ..GrpcServerConfig::default()
    });
    server
        .handle::<HelloRequest, HelloReply>(SAY_HELLO, greeter())
        .unwrap();
    Arc::new(server)
}

pub type ServeTask = JoinHandle<Result<(), TransportError>>;

pub async fn start_http(server: &Arc<HttpServer>) -> (SocketAddr, ServeTask) {
    let task = tokio::spawn({
        let server = Arc::clone(server);
        async move { server.start().await }
    });
    let addr = server.ready().await.expect("http server bound");
    (addr, task)
}

pub async fn start_grpc(server: &Arc<GrpcServer>) -> (SocketAddr, ServeTask) {
    let task = tokio::spawn({
        let server = Arc::clone(server);
        async move { server.start().await }
    });
    let addr = server.ready().await.expect("grpc server bound");
    (addr, task)
}

pub async fn grpc_client(addr: SocketAddr) -> Client {
    dial(
        &addr.to_string(),
        ClientConfig {
            insecure: true,
            ..ClientConfig::default()
        },
    )
    .await
    .unwrap()
}
