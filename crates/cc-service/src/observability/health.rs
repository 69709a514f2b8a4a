//! Readiness state.
//!
//! `ready` is true once the database pool and membership table are up, and
//! is flipped back to false as soon as shutdown begins so load balancers stop
//! routing new WebSocket upgrades here. Liveness needs no state: `/health`
//! answers whenever the process can serve a request.
//!
//! The `/ready` handler in `handlers::health` reads this state.

use std::sync::atomic::{AtomicBool, Ordering};

/// Health state for the Call Controller.
#[derive(Debug)]
pub struct HealthState {
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (not ready).
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (e.g., during shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
