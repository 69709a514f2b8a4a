//! Call lifecycle synchronization.
//!
//! Keeps the persisted session status in step with what happens in a room:
//! an `end_call` completes the session exactly once, no matter how many
//! members send it or in which order.

use crate::errors::CcError;
use crate::models::SessionStatus;
use crate::observability::metrics;
use crate::registry::SessionRegistry;
use common::types::RoomToken;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Result of reconciling a session after its call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The session moved from `SCHEDULED` to `COMPLETED`.
    Completed,
    /// The session was already completed or cancelled. Nothing changed.
    AlreadyTerminal,
    /// No session owns the room token.
    UnknownRoom,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Completed => "completed",
            SyncOutcome::AlreadyTerminal => "already_terminal",
            SyncOutcome::UnknownRoom => "unknown_room",
        }
    }
}

/// Completes sessions when their call ends.
#[derive(Clone)]
pub struct LifecycleSynchronizer {
    registry: Arc<dyn SessionRegistry>,
}

impl LifecycleSynchronizer {
    pub fn new(registry: Arc<dyn SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Mark the room's session `COMPLETED` if it is still `SCHEDULED`.
    ///
    /// Idempotent: a session that is already terminal, including one that
    /// lost a completion race, reports `AlreadyTerminal`.
    ///
    /// # Errors
    ///
    /// Returns registry I/O failures (`CcError::Database`, `CcError::Internal`).
    #[instrument(skip_all, name = "cc.lifecycle.call_ended")]
    pub async fn on_call_ended(&self, room_token: &RoomToken) -> Result<SyncOutcome, CcError> {
        let result = self.sync(room_token).await;

        match &result {
            Ok(outcome) => metrics::record_call_completion(outcome.as_str()),
            Err(_) => metrics::record_call_completion("error"),
        }

        result
    }

    async fn sync(&self, room_token: &RoomToken) -> Result<SyncOutcome, CcError> {
        let session = match self.registry.find_by_room_token(room_token).await {
            Ok(session) => session,
            Err(CcError::NotFound(_)) => {
                debug!(target: "cc.lifecycle", "Call ended for unknown room");
                return Ok(SyncOutcome::UnknownRoom);
            }
            Err(e) => return Err(e),
        };

        if session.status.is_terminal() {
            debug!(
                target: "cc.lifecycle",
                session_id = %session.session_id,
                status = %session.status,
                "Call ended for terminal session"
            );
            return Ok(SyncOutcome::AlreadyTerminal);
        }

        match self
            .registry
            .transition(session.session_id, SessionStatus::Completed)
            .await
        {
            Ok(_) => {
                info!(
                    target: "cc.lifecycle",
                    session_id = %session.session_id,
                    "Session completed by end of call"
                );
                Ok(SyncOutcome::Completed)
            }
            // Lost the race to another completion or a cancel
            Err(CcError::InvalidTransition { .. }) => Ok(SyncOutcome::AlreadyTerminal),
            Err(CcError::NotFound(_)) => Ok(SyncOutcome::UnknownRoom),
            Err(e) => Err(e),
        }
    }
}
