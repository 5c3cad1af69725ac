//! Graceful shutdown controller with in-flight call tracking.
//!
//! Uses `ArcSwap` for lock-free health state transitions and an atomic
//! counter with RAII guards for accurate in-flight call tracking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Server health state, transitioned by the shutdown controller.
///
/// State machine: Idle -> Serving -> Draining -> Stopped. A server stopped
/// before it started goes straight from Idle to Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Not yet bound.
    Idle,
    /// Bound and accepting calls.
    Serving,
    /// Shutdown requested: new calls are rejected, in-flight calls finish.
    Draining,
    Stopped,
}

/// Coordinates shutdown of one server.
///
/// 1. Call paths check `health_state()` before accepting new calls
/// 2. `trigger_shutdown()` moves to Draining and signals all listeners
/// 3. `wait_for_drain()` blocks until in-flight calls complete
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    health_state: ArcSwap<HealthState>,
}

impl ShutdownController {
    /// Creates a new shutdown controller in the `Idle` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            in_flight: Arc::new(AtomicU64::new(0)),
            health_state: ArcSwap::from_pointee(HealthState::Idle),
        }
    }

    pub fn set_serving(&self) {
        self.health_state.store(Arc::new(HealthState::Serving));
    }

    pub fn set_stopped(&self) {
        self.health_state.store(Arc::new(HealthState::Stopped));
    }

    /// Returns a receiver that observes `true` once shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Initiates graceful shutdown. Repeated calls have no further effect.
    pub fn trigger_shutdown(&self) {
        let fresh = self.shutdown_signal.send_if_modified(|triggered| {
            let fresh = !*triggered;
            *triggered = true;
            fresh
        });
        if fresh && self.health_state() != HealthState::Stopped {
            self.health_state.store(Arc::new(HealthState::Draining));
        }
    }

    #[must_use]
    pub fn is_shutdown_triggered(&self) -> bool {
        *self.shutdown_signal.borrow()
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.health_state() == HealthState::Draining
    }

    /// Creates an RAII guard that tracks an in-flight call.
    ///
    /// The counter is decremented when the guard drops, including during
    /// unwinding.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits for all in-flight calls to complete, up to `timeout`.
    ///
    /// Returns `true` and transitions to `Stopped` once drained. Returns
    /// `false` if the timeout expired first; the state stays `Draining`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                self.set_stopped();
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_idle() {
        let controller = ShutdownController::new();
        assert_eq!(controller.health_state(), HealthState::Idle);
        assert_eq!(controller.in_flight_count(), 0);
        assert!(!controller.is_shutdown_triggered());
    }

    #[test]
    fn health_state_transitions_idle_serving_draining() {
        let controller = ShutdownController::new();

        controller.set_serving();
        assert_eq!(controller.health_state(), HealthState::Serving);

        controller.trigger_shutdown();
        assert_eq!(controller.health_state(), HealthState::Draining);
        assert!(controller.is_draining());
    }

    #[test]
    fn repeated_trigger_does_not_revive_draining() {
        let controller = ShutdownController::new();
        controller.set_serving();
        controller.trigger_shutdown();
        controller.set_stopped();

        controller.trigger_shutdown();
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }

    #[test]
    fn shutdown_stays_triggered_after_stop() {
        let controller = ShutdownController::new();
        controller.set_serving();
        controller.trigger_shutdown();
        controller.set_stopped();

        assert!(!controller.is_draining());
        assert!(controller.is_shutdown_triggered());
    }

    #[test]
    fn in_flight_guard_increments_and_decrements() {
        let controller = ShutdownController::new();

        let guard1 = controller.in_flight_guard();
        let guard2 = controller.in_flight_guard();
        assert_eq!(controller.in_flight_count(), 2);

        drop(guard1);
        assert_eq!(controller.in_flight_count(), 1);

        drop(guard2);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_receiver_notified() {
        let controller = ShutdownController::new();
        let mut rx = controller.shutdown_receiver();
        assert!(!*rx.borrow());

        controller.trigger_shutdown();

        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn late_receiver_sees_earlier_trigger() {
        let controller = ShutdownController::new();
        controller.trigger_shutdown();

        let mut rx = controller.shutdown_receiver();
        rx.wait_for(|triggered| *triggered).await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_drain_with_active_calls() {
        let controller = ShutdownController::new();
        controller.set_serving();

        let guard = controller.in_flight_guard();
        controller.trigger_shutdown();

        let guard_handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        assert!(controller.wait_for_drain(Duration::from_secs(2)).await);
        assert_eq!(controller.health_state(), HealthState::Stopped);

        guard_handle.await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_drain_timeout() {
        let controller = ShutdownController::new();
        controller.set_serving();

        let _guard = controller.in_flight_guard();
        controller.trigger_shutdown();

        assert!(!controller.wait_for_drain(Duration::from_millis(50)).await);
        assert_eq!(controller.health_state(), HealthState::Draining);
    }
}
