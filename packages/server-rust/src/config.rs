//! Configuration types for servers, the client, and the application.
//!
//! Every struct carries a documented `Default`; override fields with struct
//! update syntax.

use std::time::Duration;

use meridian_core::{recovery, Middleware};

use crate::transport::http::HttpCodec;

/// Configuration for [`HttpServer`](crate::transport::http::HttpServer).
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    /// Listen address, `host:port`. Port 0 means OS-assigned.
    pub address: String,
    /// Per-call deadline, also the grace period for draining on stop.
    pub timeout: Duration,
    /// Chain wrapped around every typed route.
    pub middleware: Middleware,
    /// Largest request body accepted by typed routes.
    pub max_body_bytes: usize,
    /// Request, reply and error encoding. JSON unless overridden.
    pub codec: HttpCodec,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8000".to_string(),
            timeout: Duration::from_secs(1),
            middleware: recovery(),
            max_body_bytes: 4 * 1024 * 1024,
            codec: HttpCodec::default(),
        }
    }
}

/// Configuration for [`GrpcServer`](crate::transport::grpc::GrpcServer).
#[derive(Debug, Clone)]
pub struct GrpcServerConfig {
    /// Listen address, `host:port`. Port 0 means OS-assigned.
    pub address: String,
    /// Per-call deadline, also the grace period for draining on stop.
    pub timeout: Duration,
    /// Chain wrapped around every registered method.
    pub middleware: Middleware,
}

impl Default for GrpcServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:9000".to_string(),
            timeout: Duration::from_secs(1),
            middleware: recovery(),
        }
    }
}

/// Configuration for [`dial`](crate::transport::grpc::dial).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-call deadline.
    pub timeout: Duration,
    /// Plaintext (h2c) instead of TLS.
    pub insecure: bool,
    pub connect_timeout: Option<Duration>,
    /// Defer connecting until the first call instead of failing `dial`.
    pub lazy: bool,
    /// Chain wrapped around every outbound call.
    pub middleware: Middleware,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            insecure: false,
            connect_timeout: None,
            lazy: false,
            middleware: recovery(),
        }
    }
}

/// Configuration for [`App`](crate::App).
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Stop on SIGINT/SIGTERM when running with [`App::run`](crate::App::run).
    pub handle_signals: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            handle_signals: true,
        }
    }
}
