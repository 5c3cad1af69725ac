//! Meridian Core: structured errors, call context, logging sink, and the
//! transport-neutral middleware chain.

pub mod context;
pub mod errors;
pub mod log;
pub mod middleware;

pub use context::{CallContext, Transport, TransportKind};
pub use errors::{Code, Error};
pub use log::{Logger, TracingLogger};
pub use middleware::{
    chain, downcast_payload, handler_fn, invoke, recovery, BoxError, Call, Handler, Middleware,
    Payload,
};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
