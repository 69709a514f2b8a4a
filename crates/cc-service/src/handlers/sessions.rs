//! Session handlers for the Call Controller.
//!
//! - `POST /api/v1/sessions` - Assessor schedules a session
//! - `GET /api/v1/sessions` - Caller's sessions, optionally filtered by status
//! - `GET /api/v1/sessions/{id}` - Participant-only view
//! - `POST /api/v1/sessions/{id}/room` - Room token allocation (idempotent)
//! - `POST /api/v1/sessions/{id}/cancel` - Assessor cancels
//! - `POST /api/v1/sessions/{id}/complete` - Assessor completes
//!
//! # Security
//!
//! A session that exists but does not involve the caller is reported exactly
//! like a missing one (404), so session ids cannot be probed.

use crate::errors::CcError;
use crate::models::{
    ListSessionsQuery, ListSessionsResponse, RoomTokenResponse, ScheduleSessionRequest, Session,
    SessionStatus, StatusFilter, TransitionResponse, UserRole,
};
use crate::observability::metrics;
use crate::routes::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use common::jwt::UserClaims;
use common::types::{SessionId, UserId};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Resolve the caller's user id from validated claims.
fn caller_id(claims: &UserClaims) -> Result<UserId, CcError> {
    claims
        .user_id()
        .map_err(|_| CcError::InvalidToken("The access token is invalid or expired".to_string()))
}

/// Load a session the caller participates in.
async fn load_for_participant(
    state: &AppState,
    session_id: SessionId,
    user_id: UserId,
) -> Result<Session, CcError> {
    let session = state.registry.find_by_id(session_id).await?;
    if !session.is_participant(user_id) {
        return Err(CcError::Unauthorized);
    }
    Ok(session)
}

/// Who may apply a review action to a session.
fn check_review_access(session: &Session, user_id: UserId) -> Result<(), CcError> {
    if session.assessor_id == user_id {
        Ok(())
    } else if session.is_participant(user_id) {
        Err(CcError::Forbidden(
            "Only the session's assessor can change its status".to_string(),
        ))
    } else {
        Err(CcError::Unauthorized)
    }
}

fn record_failure(operation: &str, err: &CcError) {
    metrics::record_error(operation, err.error_type_label(), err.status_code());
}

// ============================================================================
// Handler: POST /api/v1/sessions
// ============================================================================

/// Handler for POST /api/v1/sessions
///
/// # Response
///
/// - 201 Created: session scheduled, status `scheduled`, no room token yet
/// - 400 Bad Request: unparseable body or validation failure
/// - 401 Unauthorized: invalid or missing token
/// - 403 Forbidden: caller is not an assessor
#[instrument(
    skip_all,
    name = "cc.handlers.sessions.schedule",
    fields(method = "POST", endpoint = "/api/v1/sessions")
)]
pub async fn schedule_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<UserClaims>,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<Session>), CcError> {
    let result = schedule(&state, &claims, &body).await;
    if let Err(e) = &result {
        record_failure("schedule_session", e);
    }
    result.map(|session| (StatusCode::CREATED, Json(session)))
}

async fn schedule(state: &AppState, claims: &UserClaims, body: &[u8]) -> Result<Session, CcError> {
    // Deserialize manually to return 400 (not Axum's default 422)
    let request: ScheduleSessionRequest = serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(target: "cc.handlers.sessions", error = %e, "Invalid request body");
        CcError::BadRequest("Invalid request body".to_string())
    })?;

    let assessor_id = caller_id(claims)?;
    if !claims.has_role(UserRole::Assessor.as_str()) {
        warn!(
            target: "cc.handlers.sessions",
            user_id = %assessor_id,
            "Non-assessor attempted to schedule a session"
        );
        return Err(CcError::Forbidden(
            "Only assessors can schedule sessions".to_string(),
        ));
    }

    request
        .validate()
        .map_err(|msg| CcError::Validation(msg.to_string()))?;

    let session = state
        .registry
        .create(request.into_new_session(assessor_id))
        .await?;

    info!(
        target: "cc.handlers.sessions",
        session_id = %session.session_id,
        attachee_id = %session.attachee_id,
        assessor_id = %session.assessor_id,
        "Session scheduled"
    );

    Ok(session)
}

// ============================================================================
// Handler: GET /api/v1/sessions
// ============================================================================

/// Handler for GET /api/v1/sessions?status=...
///
/// Unknown status values list everything.
#[instrument(
    skip_all,
    name = "cc.handlers.sessions.list",
    fields(method = "GET", endpoint = "/api/v1/sessions")
)]
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<UserClaims>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<ListSessionsResponse>, CcError> {
    let user_id = caller_id(&claims)?;
    let filter = StatusFilter::from_query(query.status.as_deref());

    let sessions = state
        .registry
        .list_for_participant(user_id, filter)
        .await
        .inspect_err(|e| record_failure("list_sessions", e))?;

    Ok(Json(ListSessionsResponse { sessions }))
}

// ============================================================================
// Handler: GET /api/v1/sessions/{id}
// ============================================================================

/// Handler for GET /api/v1/sessions/{id}
///
/// 404 for both missing sessions and sessions the caller is not part of.
#[instrument(
    skip_all,
    name = "cc.handlers.sessions.get",
    fields(method = "GET", endpoint = "/api/v1/sessions/{id}")
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<UserClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Session>, CcError> {
    let user_id = caller_id(&claims)?;
    let session = load_for_participant(&state, SessionId(id), user_id)
        .await
        .inspect_err(|e| record_failure("get_session", e))?;
    Ok(Json(session))
}

// ============================================================================
// Handler: POST /api/v1/sessions/{id}/room
// ============================================================================

/// Handler for POST /api/v1/sessions/{id}/room
///
/// Returns the session's room token, allocating it on first use. Either
/// participant may call this; repeated calls return the same token.
#[instrument(
    skip_all,
    name = "cc.handlers.sessions.room",
    fields(method = "POST", endpoint = "/api/v1/sessions/{id}/room")
)]
pub async fn allocate_room_token(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<UserClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<RoomTokenResponse>, CcError> {
    let result = async {
        let user_id = caller_id(&claims)?;
        let session = load_for_participant(&state, SessionId(id), user_id).await?;
        let room_token = state.registry.assign_room_token(session.session_id).await?;
        Ok::<_, CcError>(RoomTokenResponse {
            session_id: session.session_id,
            room_token,
        })
    }
    .await
    .inspect_err(|e| record_failure("allocate_room_token", e))?;

    Ok(Json(result))
}

// ============================================================================
// Handlers: POST /api/v1/sessions/{id}/cancel and /complete
// ============================================================================

/// Handler for POST /api/v1/sessions/{id}/cancel
#[instrument(
    skip_all,
    name = "cc.handlers.sessions.cancel",
    fields(method = "POST", endpoint = "/api/v1/sessions/{id}/cancel")
)]
pub async fn cancel_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<UserClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, CcError> {
    review_transition(&state, &claims, SessionId(id), SessionStatus::Cancelled)
        .await
        .inspect_err(|e| record_failure("cancel_session", e))
        .map(Json)
}

/// Handler for POST /api/v1/sessions/{id}/complete
///
/// Also the manual reconciliation path for calls that ended without an
/// `end_call` event.
#[instrument(
    skip_all,
    name = "cc.handlers.sessions.complete",
    fields(method = "POST", endpoint = "/api/v1/sessions/{id}/complete")
)]
pub async fn complete_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<UserClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, CcError> {
    review_transition(&state, &claims, SessionId(id), SessionStatus::Completed)
        .await
        .inspect_err(|e| record_failure("complete_session", e))
        .map(Json)
}

/// Apply a review action. A session that is already terminal is returned
/// unchanged with `transitioned: false`.
async fn review_transition(
    state: &AppState,
    claims: &UserClaims,
    session_id: SessionId,
    to: SessionStatus,
) -> Result<TransitionResponse, CcError> {
    let user_id = caller_id(claims)?;
    let session = state.registry.find_by_id(session_id).await?;
    check_review_access(&session, user_id)?;

    match state.registry.transition(session_id, to).await {
        Ok(session) => {
            info!(
                target: "cc.handlers.sessions",
                session_id = %session.session_id,
                status = %session.status,
                "Session status changed by review action"
            );
            Ok(TransitionResponse {
                session,
                transitioned: true,
            })
        }
        Err(CcError::InvalidTransition { from, .. }) => {
            info!(
                target: "cc.handlers.sessions",
                session_id = %session_id,
                from = %from,
                to = %to,
                "Review action on terminal session ignored"
            );
            let session = state.registry.find_by_id(session_id).await?;
            Ok(TransitionResponse {
                session,
                transitioned: false,
            })
        }
        Err(e) => Err(e),
    }
}
