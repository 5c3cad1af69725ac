//! Listener lifecycle shared by the HTTP and gRPC servers.
//!
//! Binding happens when `serve()` runs, so configuring a server never touches
//! the network. `serve()` then blocks until `stop()` is called (or the accept
//! loop fails), drains in-flight calls bounded by the grace period, and
//! releases the listening socket before returning.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use super::shutdown::{HealthState, ShutdownController};
use crate::error::TransportError;

/// Extra time `stop()` waits beyond the grace period for `serve()` to return.
const STOP_MARGIN: Duration = Duration::from_millis(500);

/// Start/stop state machine for one listening socket.
#[derive(Debug)]
pub struct Lifecycle {
    name: &'static str,
    address: String,
    grace: Duration,
    controller: Arc<ShutdownController>,
    started: AtomicBool,
    bound: watch::Sender<Option<SocketAddr>>,
    done: watch::Sender<bool>,
}

impl Lifecycle {
    /// Creates an idle lifecycle. `grace` bounds the drain on stop.
    #[must_use]
    pub fn new(name: &'static str, address: impl Into<String>, grace: Duration) -> Self {
        Self {
            name,
            address: address.into(),
            grace,
            controller: Arc::new(ShutdownController::new()),
            started: AtomicBool::new(false),
            bound: watch::Sender::new(None),
            done: watch::Sender::new(false),
        }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Shared handle for call paths: draining checks and in-flight guards.
    #[must_use]
    pub fn controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.controller)
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        self.controller.health_state()
    }

    /// The bound address while serving.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.borrow()
    }

    /// Waits until the listener is bound and returns its address, or `None`
    /// if serving ended without binding.
    pub async fn ready(&self) -> Option<SocketAddr> {
        let mut bound = self.bound.subscribe();
        let mut done = self.done.subscribe();
        loop {
            if let Some(addr) = *bound.borrow_and_update() {
                return Some(addr);
            }
            if *done.borrow_and_update() {
                return None;
            }
            tokio::select! {
                changed = bound.changed() => if changed.is_err() { return None },
                changed = done.changed() => if changed.is_err() { return None },
            }
        }
    }

    /// Binds the listener and serves `router` until shutdown.
    ///
    /// Returns `Ok(())` immediately if `stop()` was already called.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AlreadyStarted`] on a second call,
    /// [`TransportError::Bind`] if the address cannot be bound, and
    /// [`TransportError::Serve`] if the accept loop fails.
    pub async fn serve(&self, router: Router) -> Result<(), TransportError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }
        if self.controller.is_shutdown_triggered() {
            info!(server = self.name, "stopped before start, not binding");
            self.finish();
            return Ok(());
        }

        let result = self.bind_and_serve(router).await;
        self.bound.send_replace(None);
        self.finish();
        result
    }

    async fn bind_and_serve(&self, router: Router) -> Result<(), TransportError> {
        let listener = TcpListener::bind(&self.address)
            .await
            .map_err(|source| TransportError::Bind {
                address: self.address.clone(),
                source,
            })?;
        let addr = listener.local_addr().map_err(TransportError::Serve)?;

        self.controller.set_serving();
        self.bound.send_replace(Some(addr));
        info!(server = self.name, %addr, "listening");

        let mut graceful = self.controller.shutdown_receiver();
        let mut forced = self.controller.shutdown_receiver();
        let grace = self.grace;

        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = graceful.wait_for(|triggered| *triggered).await;
        });

        tokio::select! {
            result = serve.into_future() => result.map_err(TransportError::Serve)?,
            () = async move {
                let _ = forced.wait_for(|triggered| *triggered).await;
                tokio::time::sleep(grace).await;
            } => {
                warn!(
                    server = self.name,
                    ?grace,
                    "grace period expired, no longer waiting for open connections"
                );
            }
        }

        if self.controller.wait_for_drain(self.grace).await {
            info!(server = self.name, "drained");
        } else {
            warn!(
                server = self.name,
                in_flight = self.controller.in_flight_count(),
                "drain timeout expired with calls in flight"
            );
        }
        Ok(())
    }

    fn finish(&self) {
        self.controller.set_stopped();
        self.done.send_replace(true);
    }

    /// Requests graceful shutdown and waits for `serve()` to return.
    ///
    /// Before start nothing is bound or released; the server is only marked
    /// stopped so a later `serve()` returns at once. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` keeps the server contract uniform.
    pub async fn stop(&self) -> Result<(), TransportError> {
        self.controller.trigger_shutdown();
        if !self.started.load(Ordering::SeqCst) {
            self.controller.set_stopped();
            return Ok(());
        }

        let mut done = self.done.subscribe();
        let wait = done.wait_for(|finished| *finished);
        if tokio::time::timeout(self.grace * 2 + STOP_MARGIN, wait)
            .await
            .is_err()
        {
            warn!(server = self.name, "timed out waiting for server to stop");
        } else {
            info!(server = self.name, "stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::routing::get;

    use super::*;

    fn lifecycle() -> Lifecycle {
        Lifecycle::new("test", "127.0.0.1:0", Duration::from_millis(200))
    }

    fn router() -> Router {
        Router::new().route("/", get(|| async { "ok" }))
    }

    #[tokio::test]
    async fn stop_before_start_is_noop() {
        let lifecycle = lifecycle();
        lifecycle.stop().await.unwrap();
        lifecycle.stop().await.unwrap();
        assert_eq!(lifecycle.health_state(), HealthState::Stopped);

        // A later serve returns at once without binding.
        lifecycle.serve(router()).await.unwrap();
        assert!(lifecycle.local_addr().is_none());
    }

    #[tokio::test]
    async fn serve_binds_and_stop_releases_port() {
        let lifecycle = Arc::new(lifecycle());
        let serving = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move { lifecycle.serve(router()).await })
        };

        let addr = lifecycle.ready().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(lifecycle.health_state(), HealthState::Serving);

        lifecycle.stop().await.unwrap();
        lifecycle.stop().await.unwrap();
        serving.await.unwrap().unwrap();

        assert_eq!(lifecycle.health_state(), HealthState::Stopped);
        assert!(lifecycle.local_addr().is_none());
        TcpListener::bind(addr).await.unwrap();
    }

    #[tokio::test]
    async fn second_serve_is_rejected() {
        let lifecycle = Arc::new(lifecycle());
        let serving = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move { lifecycle.serve(router()).await })
        };
        lifecycle.ready().await.unwrap();

        let err = lifecycle.serve(router()).await.unwrap_err();
        assert!(matches!(err, TransportError::AlreadyStarted));

        lifecycle.stop().await.unwrap();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let lifecycle = Lifecycle::new("test", addr.to_string(), Duration::from_millis(100));

        let err = lifecycle.serve(router()).await.unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
        assert!(lifecycle.ready().await.is_none());
        lifecycle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn malformed_address_is_a_bind_error() {
        let lifecycle = Lifecycle::new("test", "not an address", Duration::from_millis(100));
        let err = lifecycle.serve(router()).await.unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
    }
}
