//! Call Controller error types.
//!
//! Every error maps to an HTTP status via the `IntoResponse` impl and to a
//! signaling error code for WebSocket clients. Messages returned to clients
//! are intentionally generic; internal details are logged server-side.

use crate::models::SessionStatus;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Message sent to signaling clients for both `Unauthorized` and `NotFound`.
///
/// The two cases are indistinguishable on the wire so room tokens cannot be
/// enumerated.
pub const NOT_AUTHORIZED_MESSAGE: &str = "You are not authorized to join this room";

/// Call Controller error type.
///
/// Maps to HTTP status codes:
/// - Unauthorized, NotFound: 404 Not Found
/// - InvalidTransition: 409 Conflict
/// - Validation, BadRequest: 400 Bad Request
/// - InvalidToken: 401 Unauthorized
/// - Forbidden: 403 Forbidden
/// - Draining: 503 Service Unavailable
/// - Database, Internal, RoomClosed: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum CcError {
    /// Caller is not one of the session's two participants.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    /// Status change attempted from a terminal state or to a non-successor.
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    /// Malformed scheduling input. Nothing was written.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// The room actor shut down because it became empty. Joins retry
    /// against a fresh room; other operations treat the caller as a non-member.
    #[error("Room closed")]
    RoomClosed,

    /// The service is shutting down and no longer creates rooms.
    #[error("Call controller is draining")]
    Draining,
}

impl CcError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            CcError::Unauthorized | CcError::NotFound(_) => 404,
            CcError::InvalidTransition { .. } => 409,
            CcError::Validation(_) | CcError::BadRequest(_) => 400,
            CcError::InvalidToken(_) => 401,
            CcError::Forbidden(_) => 403,
            CcError::Draining => 503,
            CcError::Database(_) | CcError::Internal(_) | CcError::RoomClosed => 500,
        }
    }

    /// Bounded label for the `error_type` metric dimension.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            CcError::Unauthorized => "unauthorized",
            CcError::NotFound(_) => "not_found",
            CcError::InvalidTransition { .. } => "invalid_transition",
            CcError::Validation(_) => "validation",
            CcError::InvalidToken(_) => "invalid_token",
            CcError::Forbidden(_) => "forbidden",
            CcError::BadRequest(_) => "bad_request",
            CcError::Database(_) => "database",
            CcError::Internal(_) => "internal",
            CcError::RoomClosed => "room_closed",
            CcError::Draining => "draining",
        }
    }

    /// Error code carried by the signaling `error` event.
    pub fn signaling_code(&self) -> &'static str {
        match self {
            CcError::Unauthorized | CcError::NotFound(_) | CcError::InvalidToken(_) => {
                "UNAUTHORIZED"
            }
            CcError::Validation(_) | CcError::BadRequest(_) => "BAD_REQUEST",
            CcError::Forbidden(_) => "FORBIDDEN",
            CcError::Draining => "UNAVAILABLE",
            CcError::InvalidTransition { .. }
            | CcError::Database(_)
            | CcError::Internal(_)
            | CcError::RoomClosed => "INTERNAL_ERROR",
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            CcError::Unauthorized | CcError::NotFound(_) => NOT_AUTHORIZED_MESSAGE.to_string(),
            CcError::InvalidTransition { .. } => {
                "The session can no longer change status".to_string()
            }
            CcError::Validation(msg) | CcError::BadRequest(msg) | CcError::Forbidden(msg) => {
                msg.clone()
            }
            CcError::InvalidToken(_) => "The access token is invalid or expired".to_string(),
            CcError::Draining => "Server is shutting down, please reconnect".to_string(),
            CcError::Database(_) | CcError::Internal(_) | CcError::RoomClosed => {
                "An internal error occurred".to_string()
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for CcError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            CcError::Database(err) => {
                // Log actual error server-side, return generic message to client
                tracing::error!(target: "cc.database", error = %err, "Database operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    self.client_message(),
                )
            }
            CcError::Internal(err) => {
                tracing::error!(target: "cc.internal", error = %err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    self.client_message(),
                )
            }
            CcError::RoomClosed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                self.client_message(),
            ),
            CcError::Unauthorized | CcError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "Session not found".to_string(),
            ),
            CcError::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, "INVALID_TRANSITION", self.client_message())
            }
            CcError::Validation(reason) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                reason.clone(),
            ),
            CcError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            CcError::InvalidToken(reason) => {
                (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", reason.clone())
            }
            CcError::Forbidden(reason) => (StatusCode::FORBIDDEN, "FORBIDDEN", reason.clone()),
            CcError::Draining => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                self.client_message(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) =
                "Bearer realm=\"call-controller\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

impl From<sqlx::Error> for CcError {
    fn from(err: sqlx::Error) -> Self {
        CcError::Database(err.to_string())
    }
}
