//! Greeter demo: one handler served over HTTP and gRPC.
//!
//! ```text
//! helloworld                              # serve on :8000 (HTTP) and :9000 (gRPC)
//! curl 'localhost:8000/helloworld/hello?name=kratos'
//! helloworld --greet kratos               # call the running gRPC server
//! ```

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use meridian_core::middleware::logging;
use meridian_core::{chain, handler_fn, recovery, CallContext, Error, Middleware, TracingLogger};
use meridian_server::{
    dial, App, AppConfig, ClientConfig, GrpcServer, GrpcServerConfig, HttpServer, HttpServerConfig,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

const SAY_HELLO: &str = "/helloworld.Greeter/SayHello";

#[derive(Debug, Parser)]
#[command(name = "helloworld", about = "Greeter served over HTTP and gRPC")]
struct Args {
    #[arg(long, env = "HELLOWORLD_HTTP_ADDR", default_value = "0.0.0.0:8000")]
    http_addr: String,

    #[arg(long, env = "HELLOWORLD_GRPC_ADDR", default_value = "0.0.0.0:9000")]
    grpc_addr: String,

    /// Call SayHello on a running server (`127.0.0.1` + the gRPC port) and exit.
    #[arg(long, value_name = "NAME")]
    greet: Option<String>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
struct HelloRequest {
    #[prost(string, tag = "1")]
    #[serde(default)]
    name: String,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
struct HelloReply {
    #[prost(string, tag = "1")]
    message: String,
}

/// `"error"` is checked before `"panic"`; the two never combine.
async fn say_hello(_ctx: CallContext, request: HelloRequest) -> Result<HelloReply, Error> {
    match request.name.as_str() {
        "error" => Err(Error::invalid_argument("BadRequest", "invalid argument error")),
        "panic" => panic!("grpc panic"),
        name => Ok(HelloReply {
            message: format!("Hello {name}"),
        }),
    }
}

fn middleware() -> Middleware {
    chain([
        logging::server(Arc::new(TracingLogger::new("helloworld"))),
        recovery(),
    ])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("helloworld=info,meridian=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();

    if let Some(name) = args.greet {
        let port = args
            .grpc_addr
            .rsplit(':')
            .next()
            .context("gRPC address has no port")?;
        let client = dial(
            &format!("127.0.0.1:{port}"),
            ClientConfig {
                insecure: true,
                ..ClientConfig::default()
            },
        )
        .await?;
        let reply: HelloReply = client.invoke(SAY_HELLO, HelloRequest { name }).await?;
        println!("{}", reply.message);
        return Ok(());
    }

    let mut http = HttpServer::new(HttpServerConfig {
        address: args.http_addr,
        middleware: middleware(),
        ..HttpServerConfig::default()
    });
    http.group("/helloworld")
        .handle::<HelloRequest, HelloReply>("/hello", handler_fn(say_hello))?;

    let mut grpc = GrpcServer::new(GrpcServerConfig {
        address: args.grpc_addr,
        middleware: middleware(),
        ..GrpcServerConfig::default()
    });
    grpc.handle::<HelloRequest, HelloReply>(SAY_HELLO, handler_fn(say_hello))?;

    info!(
        http = %http.config().address,
        grpc = %grpc.config().address,
        "starting helloworld"
    );
    let mut app = App::new(AppConfig::default());
    app.append(http).append(grpc);
    app.run().await?;
    Ok(())
}
