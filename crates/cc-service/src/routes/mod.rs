//! HTTP routes for the Call Controller.
//!
//! Defines the Axum router and application state.

use crate::actors::ActorMetrics;
use crate::auth::JwtValidator;
use crate::config::Config;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_auth, AuthState};
use crate::observability::health::HealthState;
use crate::registry::SessionRegistry;
use crate::signaling::SignalingRelay;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

pub use crate::observability::metrics::init_metrics_recorder;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session registry (PostgreSQL in production, in-memory in tests).
    pub registry: Arc<dyn SessionRegistry>,

    /// Signaling relay, which also owns the room membership table.
    pub relay: SignalingRelay,

    /// Service configuration.
    pub config: Config,

    /// Liveness/readiness flags.
    pub health: Arc<HealthState>,

    /// Database pool used by the readiness probe. `None` when the registry
    /// is not database-backed.
    pub pool: Option<PgPool>,

    /// Validator for user access tokens (HTTP and WebSocket).
    pub jwt_validator: Arc<JwtValidator>,

    /// Shared actor metrics for connection actors.
    pub actor_metrics: Arc<ActorMetrics>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness probe (simple "OK") - public, unversioned
/// - `/ready` - Readiness probe - public, unversioned
/// - `/metrics` - Prometheus metrics endpoint - public, unversioned
/// - `/ws` - Signaling WebSocket (authenticates its own handshake)
/// - `/api/v1/sessions...` - Session endpoints - requires authentication
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        jwt_validator: Arc::clone(&state.jwt_validator),
    });

    // Public routes (no authentication middleware)
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        // Accepts the token from the header or the query string
        .route("/ws", get(handlers::ws_upgrade))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route(
            "/api/v1/sessions",
            post(handlers::schedule_session).get(handlers::list_sessions),
        )
        .route("/api/v1/sessions/:id", get(handlers::get_session))
        .route(
            "/api/v1/sessions/:id/room",
            post(handlers::allocate_room_token),
        )
        .route(
            "/api/v1/sessions/:id/cancel",
            post(handlers::cancel_session),
        )
        .route(
            "/api/v1/sessions/:id/complete",
            post(handlers::complete_session),
        )
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
