//! Meridian server: HTTP and gRPC transport servers, the gRPC client, and the
//! application lifecycle that runs them together.

pub mod app;
pub mod config;
pub mod error;
pub mod network;
pub mod transport;

pub use app::App;
pub use config::{AppConfig, ClientConfig, GrpcServerConfig, HttpServerConfig};
pub use error::TransportError;
pub use transport::grpc::{dial, Client, GrpcServer};
pub use transport::http::HttpServer;
pub use transport::Server;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
