//! Observability for the Call Controller.
//!
//! Provides metrics definitions and the liveness/readiness state shared
//! with the health handlers.

pub mod health;
pub mod metrics;
