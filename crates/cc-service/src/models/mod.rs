//! Call Controller models.
//!
//! Contains the session record, the identity directory view and the
//! request/response bodies of the session API.

use crate::errors::CcError;
use chrono::{DateTime, Duration, Utc};
use common::types::{RoomToken, SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Session status enumeration.
///
/// `Scheduled` is the only non-terminal state. The only valid transitions are
/// `Scheduled -> Completed` and `Scheduled -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Call is scheduled and may still take place.
    Scheduled,

    /// Call ended (relay-observed `end_call` or explicit review action).
    Completed,

    /// Call was called off by the assessor.
    Cancelled,
}

impl SessionStatus {
    /// Returns the string representation of the status (database form).
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    /// Parse the database form of a status.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(SessionStatus::Scheduled),
            "completed" => Some(SessionStatus::Completed),
            "cancelled" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }

    /// Completed or cancelled. Terminal sessions never change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Scheduled)
    }

    /// Returns true if `to` is a valid successor of `self`.
    pub fn can_transition_to(&self, to: SessionStatus) -> bool {
        matches!(
            (self, to),
            (
                SessionStatus::Scheduled,
                SessionStatus::Completed | SessionStatus::Cancelled
            )
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Attachee,
    Assessor,
    OrgManager,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Attachee => "attachee",
            UserRole::Assessor => "assessor",
            UserRole::OrgManager => "org_manager",
            UserRole::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "attachee" => Some(UserRole::Attachee),
            "assessor" => Some(UserRole::Assessor),
            "org_manager" => Some(UserRole::OrgManager),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }
}

/// A user as seen by the registry's identity directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: UserId,
    pub username: String,
    pub role: UserRole,
}

/// The two identities allowed into a session's room.
///
/// Authorization is always checked against this fixed pair, never against
/// current room occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizedPair {
    pub attachee: UserId,
    pub assessor: UserId,
}

impl AuthorizedPair {
    pub fn contains(&self, user_id: UserId) -> bool {
        self.attachee == user_id || self.assessor == user_id
    }

    /// Returns the other participant, or `None` if `user_id` is not in the pair.
    pub fn other(&self, user_id: UserId) -> Option<UserId> {
        if user_id == self.attachee {
            Some(self.assessor)
        } else if user_id == self.assessor {
            Some(self.attachee)
        } else {
            None
        }
    }
}

/// A scheduled video call between an attachee and an assessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub session_id: SessionId,

    /// Signaling room token. Assigned lazily, immutable once set.
    pub room_token: Option<RoomToken>,

    /// Initiator participant.
    pub attachee_id: UserId,

    /// Reviewer participant (the user who scheduled the call).
    pub assessor_id: UserId,

    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Scheduled start time.
    pub start_time: DateTime<Utc>,

    /// Scheduled end time.
    pub end_time: DateTime<Utc>,

    pub status: SessionStatus,

    pub created_at: DateTime<Utc>,

    /// Bumped by every successful transition and by token assignment.
    pub updated_at: DateTime<Utc>,

    /// Set when the session reaches `Completed`.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn authorized_pair(&self) -> AuthorizedPair {
        AuthorizedPair {
            attachee: self.attachee_id,
            assessor: self.assessor_id,
        }
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.authorized_pair().contains(user_id)
    }

    /// Apply a status transition in place.
    ///
    /// # Errors
    ///
    /// Returns `CcError::InvalidTransition` without touching any field when
    /// `to` is not a valid successor of the current status.
    pub fn apply_transition(&mut self, to: SessionStatus, now: DateTime<Utc>) -> Result<(), CcError> {
        if !self.status.can_transition_to(to) {
            return Err(CcError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        self.status = to;
        self.updated_at = now;
        if to == SessionStatus::Completed {
            self.completed_at = Some(now);
        }
        Ok(())
    }
}

// ============================================================================
// Session creation
// ============================================================================

/// Maximum session title length (characters, after trimming).
pub const MAX_TITLE_LENGTH: usize = 100;

/// Maximum session description length (characters).
pub const MAX_DESCRIPTION_LENGTH: usize = 500;

/// Call durations offered by the scheduling form, in minutes.
pub const ALLOWED_DURATIONS_MINUTES: [u32; 5] = [30, 45, 60, 90, 120];

/// Input to `SessionRegistry::create`.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub attachee_id: UserId,
    pub assessor_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl NewSession {
    /// Validate the fields that do not need the identity directory.
    ///
    /// # Errors
    ///
    /// Returns an error message if validation fails.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.start_time >= self.end_time {
            return Err("Start time must be before end time");
        }

        if self.attachee_id == self.assessor_id {
            return Err("Attachee and assessor must be different users");
        }

        let title = self.title.trim();
        if title.is_empty() {
            return Err("Title is required");
        }
        if title.chars().count() > MAX_TITLE_LENGTH {
            return Err("Title must be at most 100 characters");
        }

        if let Some(description) = &self.description {
            if description.chars().count() > MAX_DESCRIPTION_LENGTH {
                return Err("Description must be at most 500 characters");
            }
        }

        Ok(())
    }
}

/// Request to schedule a call.
///
/// Sent by an assessor. The assessor is taken from the caller's token.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleSessionRequest {
    pub attachee_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    /// One of [`ALLOWED_DURATIONS_MINUTES`].
    pub duration_minutes: u32,
}

impl ScheduleSessionRequest {
    /// # Errors
    ///
    /// Returns an error message if the duration is not one of the offered values.
    pub fn validate(&self) -> Result<(), &'static str> {
        if !ALLOWED_DURATIONS_MINUTES.contains(&self.duration_minutes) {
            return Err("Duration must be one of 30, 45, 60, 90 or 120 minutes");
        }
        Ok(())
    }

    pub fn into_new_session(self, assessor_id: UserId) -> NewSession {
        let end_time = self.start_time + Duration::minutes(i64::from(self.duration_minutes));
        let description = self
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        NewSession {
            attachee_id: self.attachee_id,
            assessor_id,
            title: self.title.trim().to_string(),
            description,
            start_time: self.start_time,
            end_time,
        }
    }
}

// ============================================================================
// Session listing
// ============================================================================

/// Status filter for session listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Only(SessionStatus),
}

impl StatusFilter {
    /// Unknown values behave like `all`.
    pub fn from_query(value: Option<&str>) -> Self {
        value
            .and_then(SessionStatus::parse)
            .map_or(StatusFilter::All, StatusFilter::Only)
    }

    pub fn matches(&self, status: SessionStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(wanted) => *wanted == status,
        }
    }
}

/// Query string of `GET /api/v1/sessions`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListSessionsQuery {
    pub status: Option<String>,
}

/// Response for `GET /api/v1/sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<Session>,
}

/// Response for the room-token allocation entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomTokenResponse {
    pub session_id: SessionId,
    pub room_token: RoomToken,
}

/// Response for cancel/complete review actions.
///
/// `transitioned == false` confirms a no-op on an already terminal session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionResponse {
    pub session: Session,
    pub transitioned: bool,
}

/// Readiness check response.
///
/// Returned by the `/ready` endpoint (readiness probe).
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    /// Service readiness status ("ready" or "not_ready").
    pub status: &'static str,

    /// Database connectivity status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<&'static str>,

    /// Error message (generic, no infrastructure details).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
