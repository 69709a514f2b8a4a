//! In-memory session registry.
//!
//! All state lives behind one mutex; every operation is a short critical
//! section with no await inside, so transitions and token assignment are
//! atomic with respect to each other.

use super::{
    default_room_token_generator, validate_participants, RoomTokenGenerator, SessionRegistry,
    MAX_TOKEN_COLLISION_RETRIES,
};
use crate::errors::CcError;
use crate::models::{
    NewSession, Session, SessionStatus, StatusFilter, UserRecord, UserRole,
};
use chrono::Utc;
use common::types::{RoomToken, SessionId, UserId};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::instrument;

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Session>,
    tokens: HashMap<RoomToken, SessionId>,
    users: HashMap<UserId, UserRecord>,
}

/// Process-local [`SessionRegistry`].
pub struct InMemorySessionRegistry {
    inner: Mutex<Inner>,
    token_generator: RoomTokenGenerator,
}

impl Default for InMemorySessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            token_generator: default_room_token_generator(),
        }
    }

    /// Seed the identity directory.
    #[must_use]
    pub fn with_user(mut self, user_id: i64, username: &str, role: UserRole) -> Self {
        self.inner.get_mut().users.insert(
            UserId(user_id),
            UserRecord {
                user_id: UserId(user_id),
                username: username.to_string(),
                role,
            },
        );
        self
    }

    /// Replace the room token source.
    #[must_use]
    pub fn with_room_token_generator(mut self, generator: RoomTokenGenerator) -> Self {
        self.token_generator = generator;
        self
    }

    /// Add a user after construction.
    pub async fn insert_user(&self, record: UserRecord) {
        self.inner.lock().await.users.insert(record.user_id, record);
    }
}

#[async_trait::async_trait]
impl SessionRegistry for InMemorySessionRegistry {
    #[instrument(skip_all, name = "cc.registry.memory.create")]
    async fn create(&self, new_session: NewSession) -> Result<Session, CcError> {
        new_session
            .validate()
            .map_err(|msg| CcError::Validation(msg.to_string()))?;

        let mut inner = self.inner.lock().await;
        validate_participants(
            inner.users.get(&new_session.attachee_id),
            inner.users.get(&new_session.assessor_id),
        )?;

        let now = Utc::now();
        let session = Session {
            session_id: SessionId::new(),
            room_token: None,
            attachee_id: new_session.attachee_id,
            assessor_id: new_session.assessor_id,
            title: new_session.title.trim().to_string(),
            description: new_session.description,
            start_time: new_session.start_time,
            end_time: new_session.end_time,
            status: SessionStatus::Scheduled,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        inner.sessions.insert(session.session_id, session.clone());
        Ok(session)
    }

    async fn find_by_id(&self, session_id: SessionId) -> Result<Session, CcError> {
        self.inner
            .lock()
            .await
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| CcError::NotFound("Session not found".to_string()))
    }

    async fn find_by_room_token(&self, room_token: &RoomToken) -> Result<Session, CcError> {
        let inner = self.inner.lock().await;
        inner
            .tokens
            .get(room_token)
            .and_then(|session_id| inner.sessions.get(session_id))
            .cloned()
            .ok_or_else(|| CcError::NotFound("Room not found".to_string()))
    }

    #[instrument(skip_all, name = "cc.registry.memory.assign_room_token", fields(session_id = %session_id))]
    async fn assign_room_token(&self, session_id: SessionId) -> Result<RoomToken, CcError> {
        let mut inner = self.inner.lock().await;

        let existing = inner
            .sessions
            .get(&session_id)
            .ok_or_else(|| CcError::NotFound("Session not found".to_string()))?
            .room_token
            .clone();
        if let Some(token) = existing {
            return Ok(token);
        }

        for attempt in 1..=MAX_TOKEN_COLLISION_RETRIES {
            let token = (self.token_generator)()?;
            if inner.tokens.contains_key(&token) {
                tracing::debug!(
                    target: "cc.registry",
                    attempt = attempt,
                    "Room token collision, retrying"
                );
                continue;
            }

            let session = inner
                .sessions
                .get_mut(&session_id)
                .ok_or_else(|| CcError::NotFound("Session not found".to_string()))?;
            session.room_token = Some(token.clone());
            session.updated_at = Utc::now();
            inner.tokens.insert(token.clone(), session_id);
            return Ok(token);
        }

        tracing::error!(
            target: "cc.registry",
            attempts = MAX_TOKEN_COLLISION_RETRIES,
            "Failed to generate a unique room token"
        );
        Err(CcError::Internal(
            "Failed to generate unique room token".to_string(),
        ))
    }

    #[instrument(skip_all, name = "cc.registry.memory.transition", fields(session_id = %session_id, to = %to))]
    async fn transition(
        &self,
        session_id: SessionId,
        to: SessionStatus,
    ) -> Result<Session, CcError> {
        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| CcError::NotFound("Session not found".to_string()))?;

        session.apply_transition(to, Utc::now())?;
        Ok(session.clone())
    }

    async fn list_for_participant(
        &self,
        user_id: UserId,
        filter: StatusFilter,
    ) -> Result<Vec<Session>, CcError> {
        let inner = self.inner.lock().await;
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.is_participant(user_id) && filter.matches(s.status))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }

    async fn lookup_user(&self, user_id: UserId) -> Result<Option<UserRecord>, CcError> {
        Ok(self.inner.lock().await.users.get(&user_id).cloned())
    }
}
