//! HTTP transport: JSON routes served by `axum`.

pub mod codec;
pub mod context;
pub mod server;

pub use codec::{decode_error, encode_error, ErrorEncoder, HttpCodec, ReplyEncoder, RequestDecoder};
pub use context::ServerInfo;
pub use server::{HttpServer, RouteGroup};
