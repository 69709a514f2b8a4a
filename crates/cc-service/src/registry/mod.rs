//! Session Registry.
//!
//! Durable record of scheduled calls. The registry is the source of truth for
//! who may join a room and for the session lifecycle status.
//!
//! Two implementations are provided:
//! - [`PgSessionRegistry`]: PostgreSQL (production)
//! - [`InMemorySessionRegistry`]: process-local (tests, local development)
//!
//! # Invariants
//!
//! - A room token, once assigned, never changes and is globally unique
//! - Status only moves `scheduled -> completed` or `scheduled -> cancelled`
//! - A failed transition leaves the session untouched

mod memory;
mod postgres;

pub use memory::InMemorySessionRegistry;
pub use postgres::PgSessionRegistry;

use crate::errors::CcError;
use crate::models::{
    NewSession, Session, SessionStatus, StatusFilter, UserRecord, UserRole,
};
use common::types::{RoomToken, SessionId, UserId};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;

/// Base62 alphabet for room tokens.
const BASE62_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Room token length in base62 characters.
const ROOM_TOKEN_LENGTH: usize = 12;

/// Random bytes drawn per room token (72 bits).
const ROOM_TOKEN_RANDOM_BYTES: usize = 9;

/// Maximum attempts when a freshly generated token collides with an existing one.
pub const MAX_TOKEN_COLLISION_RETRIES: usize = 3;

/// Source of fresh room tokens.
///
/// Production uses [`generate_room_token`]; tests inject deterministic
/// generators to script token values and collisions.
pub type RoomTokenGenerator = Arc<dyn Fn() -> Result<RoomToken, CcError> + Send + Sync>;

/// Session persistence operations consumed by the relay, the lifecycle
/// synchronizer and the session API.
#[async_trait::async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Create a `scheduled` session without a room token.
    ///
    /// Fails with `Validation` if start >= end, either identity is unknown or
    /// does not hold the expected role, or the text fields are out of bounds.
    async fn create(&self, new_session: NewSession) -> Result<Session, CcError>;

    /// Fetch a session by id. `NotFound` if absent.
    async fn find_by_id(&self, session_id: SessionId) -> Result<Session, CcError>;

    /// Resolve a room token. `NotFound` if no session carries it.
    async fn find_by_room_token(&self, room_token: &RoomToken) -> Result<Session, CcError>;

    /// Return the session's room token, assigning one if absent.
    ///
    /// Idempotent: a session that already has a token keeps it.
    async fn assign_room_token(&self, session_id: SessionId) -> Result<RoomToken, CcError>;

    /// Move a session to `to`.
    ///
    /// Fails with `InvalidTransition` if the session is terminal or `to` is not
    /// a valid successor of `scheduled`; the session is not modified.
    async fn transition(&self, session_id: SessionId, to: SessionStatus)
        -> Result<Session, CcError>;

    /// Sessions where `user_id` is either participant, newest start first.
    async fn list_for_participant(
        &self,
        user_id: UserId,
        filter: StatusFilter,
    ) -> Result<Vec<Session>, CcError>;

    /// Identity directory lookup.
    async fn lookup_user(&self, user_id: UserId) -> Result<Option<UserRecord>, CcError>;
}

/// Generate a cryptographically secure room token.
///
/// Draws 9 bytes (72 bits) from the system CSPRNG and encodes them as 12
/// base62 characters.
pub fn generate_room_token() -> Result<RoomToken, CcError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; ROOM_TOKEN_RANDOM_BYTES];

    rng.fill(&mut bytes).map_err(|e| {
        tracing::error!(target: "cc.registry", error = %e, "Failed to generate random bytes for room token");
        CcError::Internal("RNG failure".to_string())
    })?;

    // u128 holds the 72 bits comfortably
    let mut value: u128 = 0;
    for &b in &bytes {
        value = (value << 8) | u128::from(b);
    }

    let mut token = Vec::with_capacity(ROOM_TOKEN_LENGTH);
    for _ in 0..ROOM_TOKEN_LENGTH {
        let idx = (value % 62) as usize;
        let ch = BASE62_CHARS
            .get(idx)
            .ok_or_else(|| CcError::Internal("Base62 index out of range".to_string()))?;
        token.push(*ch);
        value /= 62;
    }
    token.reverse();

    String::from_utf8(token)
        .map(RoomToken)
        .map_err(|_| CcError::Internal("Room token contained invalid UTF-8".to_string()))
}

/// Default token generator backed by [`generate_room_token`].
pub fn default_room_token_generator() -> RoomTokenGenerator {
    Arc::new(generate_room_token)
}

/// Check that both parties of a new session exist and hold the expected roles.
pub(crate) fn validate_participants(
    attachee: Option<&UserRecord>,
    assessor: Option<&UserRecord>,
) -> Result<(), CcError> {
    let attachee =
        attachee.ok_or_else(|| CcError::Validation("Attachee does not exist".to_string()))?;
    let assessor =
        assessor.ok_or_else(|| CcError::Validation("Assessor does not exist".to_string()))?;

    if attachee.role != UserRole::Attachee {
        return Err(CcError::Validation(
            "Selected user is not an attachee".to_string(),
        ));
    }
    if assessor.role != UserRole::Assessor {
        return Err(CcError::Validation(
            "Only assessors can schedule sessions".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn user(id: i64, role: UserRole) -> UserRecord {
        UserRecord {
            user_id: UserId(id),
            username: format!("user{id}"),
            role,
        }
    }

    #[test]
    fn test_generate_room_token_format() {
        let token = generate_room_token().unwrap();

        assert_eq!(token.as_str().len(), ROOM_TOKEN_LENGTH);
        assert!(token.as_str().bytes().all(|b| BASE62_CHARS.contains(&b)));
    }

    #[test]
    fn test_generate_room_token_uniqueness() {
        let tokens: HashSet<_> = (0..1000).map(|_| generate_room_token().unwrap()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_validate_participants() {
        let attachee = user(7, UserRole::Attachee);
        let assessor = user(3, UserRole::Assessor);

        assert!(validate_participants(Some(&attachee), Some(&assessor)).is_ok());
        assert!(matches!(
            validate_participants(None, Some(&assessor)),
            Err(CcError::Validation(_))
        ));
        assert!(matches!(
            validate_participants(Some(&attachee), None),
            Err(CcError::Validation(_))
        ));
        assert!(matches!(
            validate_participants(Some(&assessor), Some(&assessor)),
            Err(CcError::Validation(_))
        ));
        assert!(matches!(
            validate_participants(Some(&attachee), Some(&user(5, UserRole::OrgManager))),
            Err(CcError::Validation(_))
        ));
    }
}
