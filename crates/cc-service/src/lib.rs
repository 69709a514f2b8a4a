//! Call Controller (CC) Service Library
//!
//! The real-time core of the internship app's video review calls:
//!
//! - Session registry (scheduling, room tokens, status lifecycle)
//! - Room membership table (who is connected to which call)
//! - WebSocket signaling relay (offer/answer/candidate exchange between the
//!   two participants of a session)
//! - Lifecycle synchronization (a finished call completes its session)
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> registry/*.rs
//!                       |
//!                       +-> signaling::SignalingRelay -> actors (membership -> room)
//!                                   |
//!                                   +-> lifecycle::LifecycleSynchronizer
//! ```
//!
//! # Modules
//!
//! - `actors` - Membership supervisor, room and connection actors
//! - `auth` - Access token validation
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status and signaling code mapping
//! - `handlers` - HTTP and WebSocket request handlers
//! - `lifecycle` - Session completion when a call ends
//! - `middleware` - Authentication and HTTP metrics middleware
//! - `models` - Data models
//! - `observability` - Metrics and health state
//! - `registry` - Session registry trait and implementations
//! - `routes` - Axum router setup
//! - `signaling` - Signaling event types and the relay

pub mod actors;
pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod lifecycle;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod registry;
pub mod routes;
pub mod signaling;
