//! PostgreSQL session registry.
//!
//! # Security
//!
//! - All queries use parameterized statements (SQL injection safe)
//! - Database error details are logged server-side only
//!
//! # Concurrency
//!
//! - Token assignment is a conditional `UPDATE ... WHERE room_token IS NULL`,
//!   so concurrent first assignments produce exactly one token
//! - Transitions are a conditional `UPDATE ... WHERE status = 'scheduled'`,
//!   so racing completions produce exactly one winner

use super::{
    default_room_token_generator, validate_participants, RoomTokenGenerator, SessionRegistry,
    MAX_TOKEN_COLLISION_RETRIES,
};
use crate::errors::CcError;
use crate::models::{
    NewSession, Session, SessionStatus, StatusFilter, UserRecord, UserRole,
};
use crate::observability::metrics;
use common::types::{RoomToken, SessionId, UserId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Instant;
use tracing::instrument;

/// Columns selected for every session query.
const SESSION_COLUMNS: &str = r#"
    session_id, room_token, attachee_id, assessor_id, title, description,
    start_time, end_time, status, created_at, updated_at, completed_at
"#;

/// [`SessionRegistry`] backed by the `video_sessions` and `users` tables.
#[derive(Clone)]
pub struct PgSessionRegistry {
    pool: PgPool,
    token_generator: RoomTokenGenerator,
}

impl PgSessionRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            token_generator: default_room_token_generator(),
        }
    }

    /// Replace the room token source.
    #[must_use]
    pub fn with_room_token_generator(mut self, generator: RoomTokenGenerator) -> Self {
        self.token_generator = generator;
        self
    }

    async fn fetch_session(&self, session_id: SessionId) -> Result<Option<Session>, CcError> {
        let start = Instant::now();

        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM video_sessions WHERE session_id = $1"
        ))
        .bind(session_id.0) // $1
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("find_session", "error", start.elapsed());
            CcError::Database(e.to_string())
        })?;

        metrics::record_db_query("find_session", "success", start.elapsed());

        row.map(map_row_to_session).transpose()
    }

    /// Attempt to set the token on a session that has none yet.
    ///
    /// Returns `Ok(Some(token))` when this call assigned it, `Ok(None)` when
    /// the session already had one (or does not exist), and `Err(None)` on a
    /// unique-constraint collision with another session's token.
    async fn try_set_token(
        &self,
        session_id: SessionId,
        token: &RoomToken,
    ) -> Result<Option<RoomToken>, Option<CcError>> {
        let start = Instant::now();

        let result = sqlx::query(
            r#"
            UPDATE video_sessions
            SET room_token = $2, updated_at = NOW()
            WHERE session_id = $1 AND room_token IS NULL
            RETURNING room_token
            "#,
        )
        .bind(session_id.0) // $1
        .bind(token.as_str()) // $2
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(row) => {
                metrics::record_db_query("assign_room_token", "success", start.elapsed());
                Ok(row.map(|r| RoomToken(r.get("room_token"))))
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                metrics::record_db_query("assign_room_token", "conflict", start.elapsed());
                Err(None)
            }
            Err(e) => {
                metrics::record_db_query("assign_room_token", "error", start.elapsed());
                Err(Some(CcError::Database(e.to_string())))
            }
        }
    }

    async fn fetch_user(&self, user_id: UserId) -> Result<Option<UserRecord>, CcError> {
        let start = Instant::now();

        let row = sqlx::query(
            r#"
            SELECT user_id, username, role
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.0) // $1
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("lookup_user", "error", start.elapsed());
            CcError::Database(e.to_string())
        })?;

        metrics::record_db_query("lookup_user", "success", start.elapsed());

        row.map(map_row_to_user).transpose()
    }
}

#[async_trait::async_trait]
impl SessionRegistry for PgSessionRegistry {
    #[instrument(skip_all, name = "cc.repo.create_session")]
    async fn create(&self, new_session: NewSession) -> Result<Session, CcError> {
        new_session
            .validate()
            .map_err(|msg| CcError::Validation(msg.to_string()))?;

        let attachee = self.fetch_user(new_session.attachee_id).await?;
        let assessor = self.fetch_user(new_session.assessor_id).await?;
        validate_participants(attachee.as_ref(), assessor.as_ref())?;

        let start = Instant::now();

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO video_sessions (
                attachee_id, assessor_id, title, description,
                start_time, end_time, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'scheduled')
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(new_session.attachee_id.0) // $1
        .bind(new_session.assessor_id.0) // $2
        .bind(new_session.title.trim()) // $3
        .bind(new_session.description.as_deref()) // $4
        .bind(new_session.start_time) // $5
        .bind(new_session.end_time) // $6
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("create_session", "error", start.elapsed());
            CcError::Database(e.to_string())
        })?;

        metrics::record_db_query("create_session", "success", start.elapsed());

        let session = map_row_to_session(row)?;

        tracing::info!(
            target: "cc.repo",
            session_id = %session.session_id,
            "Session scheduled"
        );

        Ok(session)
    }

    #[instrument(skip_all, name = "cc.repo.find_by_id")]
    async fn find_by_id(&self, session_id: SessionId) -> Result<Session, CcError> {
        self.fetch_session(session_id)
            .await?
            .ok_or_else(|| CcError::NotFound("Session not found".to_string()))
    }

    #[instrument(skip_all, name = "cc.repo.find_by_room_token")]
    async fn find_by_room_token(&self, room_token: &RoomToken) -> Result<Session, CcError> {
        let start = Instant::now();

        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM video_sessions WHERE room_token = $1"
        ))
        .bind(room_token.as_str()) // $1
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("find_by_room_token", "error", start.elapsed());
            CcError::Database(e.to_string())
        })?;

        metrics::record_db_query("find_by_room_token", "success", start.elapsed());

        match row {
            Some(row) => map_row_to_session(row),
            None => Err(CcError::NotFound("Room not found".to_string())),
        }
    }

    #[instrument(skip_all, name = "cc.repo.assign_room_token", fields(session_id = %session_id))]
    async fn assign_room_token(&self, session_id: SessionId) -> Result<RoomToken, CcError> {
        for attempt in 1..=MAX_TOKEN_COLLISION_RETRIES {
            let candidate = (self.token_generator)()?;

            match self.try_set_token(session_id, &candidate).await {
                Ok(Some(token)) => return Ok(token),
                Ok(None) => {
                    // Either already assigned (possibly by a concurrent caller)
                    // or the session does not exist.
                    return self
                        .find_by_id(session_id)
                        .await?
                        .room_token
                        .ok_or_else(|| {
                            CcError::Internal("Room token missing after assignment".to_string())
                        });
                }
                Err(None) => {
                    tracing::debug!(
                        target: "cc.repo",
                        attempt = attempt,
                        "Room token collision, retrying"
                    );
                }
                Err(Some(e)) => return Err(e),
            }
        }

        tracing::error!(
            target: "cc.repo",
            attempts = MAX_TOKEN_COLLISION_RETRIES,
            "Failed to generate a unique room token"
        );
        Err(CcError::Internal(
            "Failed to generate unique room token".to_string(),
        ))
    }

    #[instrument(skip_all, name = "cc.repo.transition", fields(session_id = %session_id, to = %to))]
    async fn transition(
        &self,
        session_id: SessionId,
        to: SessionStatus,
    ) -> Result<Session, CcError> {
        let current = self.find_by_id(session_id).await?;
        if !current.status.can_transition_to(to) {
            return Err(CcError::InvalidTransition {
                from: current.status,
                to,
            });
        }

        let start = Instant::now();

        let row = sqlx::query(&format!(
            r#"
            UPDATE video_sessions
            SET status = $2,
                updated_at = NOW(),
                completed_at = CASE WHEN $2 = 'completed' THEN NOW() ELSE completed_at END
            WHERE session_id = $1 AND status = 'scheduled'
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(session_id.0) // $1
        .bind(to.as_str()) // $2
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("transition_session", "error", start.elapsed());
            CcError::Database(e.to_string())
        })?;

        metrics::record_db_query("transition_session", "success", start.elapsed());

        match row {
            Some(row) => map_row_to_session(row),
            None => {
                // Lost a race with another transition; report what won.
                let latest = self.find_by_id(session_id).await?;
                Err(CcError::InvalidTransition {
                    from: latest.status,
                    to,
                })
            }
        }
    }

    #[instrument(skip_all, name = "cc.repo.list_for_participant")]
    async fn list_for_participant(
        &self,
        user_id: UserId,
        filter: StatusFilter,
    ) -> Result<Vec<Session>, CcError> {
        let start = Instant::now();
        let status = match filter {
            StatusFilter::All => None,
            StatusFilter::Only(status) => Some(status.as_str()),
        };

        let rows = sqlx::query(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM video_sessions
            WHERE (attachee_id = $1 OR assessor_id = $1)
              AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY start_time DESC
            "#
        ))
        .bind(user_id.0) // $1
        .bind(status) // $2
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("list_sessions", "error", start.elapsed());
            CcError::Database(e.to_string())
        })?;

        metrics::record_db_query("list_sessions", "success", start.elapsed());

        rows.into_iter().map(map_row_to_session).collect()
    }

    async fn lookup_user(&self, user_id: UserId) -> Result<Option<UserRecord>, CcError> {
        self.fetch_user(user_id).await
    }
}

fn map_row_to_session(row: PgRow) -> Result<Session, CcError> {
    let status: String = row.get("status");
    let status = SessionStatus::parse(&status).ok_or_else(|| {
        CcError::Internal(format!("Unknown session status in database: {status}"))
    })?;
    let room_token: Option<String> = row.get("room_token");

    Ok(Session {
        session_id: SessionId(row.get("session_id")),
        room_token: room_token.map(RoomToken),
        attachee_id: UserId(row.get("attachee_id")),
        assessor_id: UserId(row.get("assessor_id")),
        title: row.get("title"),
        description: row.get("description"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        status,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
    })
}

fn map_row_to_user(row: PgRow) -> Result<UserRecord, CcError> {
    let role: String = row.get("role");
    let role = UserRole::parse(&role)
        .ok_or_else(|| CcError::Internal(format!("Unknown user role in database: {role}")))?;

    Ok(UserRecord {
        user_id: UserId(row.get("user_id")),
        username: row.get("username"),
        role,
    })
}
