//! gRPC transport: unary `prost` methods over HTTP/2, server and client.

pub mod client;
pub mod context;
pub mod server;
pub mod status;

pub use client::{dial, Client};
pub use context::{ClientInfo, ServerInfo};
pub use server::GrpcServer;
pub use status::{from_status, parse_grpc_timeout, to_status, ErrorInfo};
