//! Health check handlers.
//!
//! - `/health`: Liveness probe - returns OK if the process is running
//! - `/ready`: Readiness probe - checks shutdown state and the database

use crate::models::ReadinessResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

/// Liveness probe handler.
///
/// Does NOT check any dependencies - failure means the process is hung.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe handler.
///
/// Returns 200 if ready, 503 if the service is shutting down or the database
/// cannot be reached. Error messages are generic; actual errors are logged.
#[tracing::instrument(skip_all, name = "cc.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if !state.health.is_ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                database: None,
                error: Some("Service is not accepting traffic".to_string()),
            }),
        );
    }

    // Without a pool the registry is in-process and always reachable
    let Some(pool) = &state.pool else {
        return (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                database: None,
                error: None,
            }),
        );
    };

    if let Err(e) = sqlx::query("SELECT 1").fetch_one(pool).await {
        tracing::warn!(target: "cc.health", error = %e, "Readiness check failed: database error");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                database: Some("unhealthy"),
                error: Some("Service dependencies unavailable".to_string()),
            }),
        );
    }

    (
        StatusCode::OK,
        Json(ReadinessResponse {
            status: "ready",
            database: Some("healthy"),
            error: None,
        }),
    )
}
