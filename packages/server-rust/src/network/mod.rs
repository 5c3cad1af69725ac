//! Listener lifecycle, shutdown control, and connection-level layers.

pub mod lifecycle;
pub mod middleware;
pub mod shutdown;

pub use lifecycle::Lifecycle;
pub use shutdown::*;
