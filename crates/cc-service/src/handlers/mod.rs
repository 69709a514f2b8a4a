//! HTTP request handlers for the Call Controller.

pub mod health;
pub mod metrics;
pub mod sessions;
pub mod signaling;

pub use health::{health_check, readiness_check};
pub use metrics::metrics_handler;
pub use sessions::{
    allocate_room_token, cancel_session, complete_session, get_session, list_sessions,
    schedule_session,
};
pub use signaling::ws_upgrade;
