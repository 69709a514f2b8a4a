//! Signaling event types.
//!
//! Inbound and outbound events are closed tagged enums carried as JSON text
//! frames: `{"type": "join", "room_token": "..."}`. Anything that does not
//! deserialize into [`ClientEvent`] is rejected with a `BAD_REQUEST` error
//! event rather than ignored.
//!
//! Call-setup payloads (`relay_*`) are opaque JSON values. The server never
//! inspects them.

use crate::errors::CcError;
use crate::models::UserRole;
use common::types::{RoomToken, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Join {
        room_token: RoomToken,
    },
    Leave {
        room_token: RoomToken,
    },
    RelayOffer {
        room_token: RoomToken,
        payload: Value,
    },
    RelayAnswer {
        room_token: RoomToken,
        payload: Value,
    },
    RelayCandidate {
        room_token: RoomToken,
        payload: Value,
    },
    EndCall {
        room_token: RoomToken,
    },
}

impl ClientEvent {
    /// Parse one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns `CcError::BadRequest` for malformed JSON or unknown event types.
    pub fn parse(text: &str) -> Result<Self, CcError> {
        serde_json::from_str(text).map_err(|e| {
            tracing::debug!(target: "cc.relay", error = %e, "Malformed signaling event");
            CcError::BadRequest("Malformed signaling event".to_string())
        })
    }

    pub fn room_token(&self) -> &RoomToken {
        match self {
            ClientEvent::Join { room_token }
            | ClientEvent::Leave { room_token }
            | ClientEvent::RelayOffer { room_token, .. }
            | ClientEvent::RelayAnswer { room_token, .. }
            | ClientEvent::RelayCandidate { room_token, .. }
            | ClientEvent::EndCall { room_token } => room_token,
        }
    }

    /// Event name used for logs and the `event` metric label.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join { .. } => "join",
            ClientEvent::Leave { .. } => "leave",
            ClientEvent::RelayOffer { .. } => RelayKind::Offer.as_str(),
            ClientEvent::RelayAnswer { .. } => RelayKind::Answer.as_str(),
            ClientEvent::RelayCandidate { .. } => RelayKind::Candidate.as_str(),
            ClientEvent::EndCall { .. } => "end_call",
        }
    }
}

/// Call-setup message kind relayed between the two participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Offer,
    Answer,
    Candidate,
}

impl RelayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayKind::Offer => "relay_offer",
            RelayKind::Answer => "relay_answer",
            RelayKind::Candidate => "relay_candidate",
        }
    }

    /// Build the outbound event delivered to the other participant.
    pub fn into_event(self, room_token: RoomToken, from: UserId, payload: Value) -> ServerEvent {
        match self {
            RelayKind::Offer => ServerEvent::RelayOffer {
                room_token,
                from,
                payload,
            },
            RelayKind::Answer => ServerEvent::RelayAnswer {
                room_token,
                from,
                payload,
            },
            RelayKind::Candidate => ServerEvent::RelayCandidate {
                room_token,
                from,
                payload,
            },
        }
    }
}

/// The other participant of a session, as shown to a joining user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: UserId,
    #[serde(default)]
    pub username: Option<String>,
    pub role: UserRole,
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent to the caller after a successful join.
    Joined {
        room_token: RoomToken,
        peer_info: PeerInfo,
        /// Connected members in join order, caller included.
        current_members: Vec<UserId>,
        session_title: String,
    },
    PeerJoined {
        room_token: RoomToken,
        user_id: UserId,
        #[serde(default)]
        username: Option<String>,
    },
    PeerLeft {
        room_token: RoomToken,
        user_id: UserId,
    },
    RelayOffer {
        room_token: RoomToken,
        from: UserId,
        payload: Value,
    },
    RelayAnswer {
        room_token: RoomToken,
        from: UserId,
        payload: Value,
    },
    RelayCandidate {
        room_token: RoomToken,
        from: UserId,
        payload: Value,
    },
    CallEnded {
        room_token: RoomToken,
        user_id: UserId,
    },
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_token: Option<RoomToken>,
    },
}

impl ServerEvent {
    /// Client-facing error event. Internal details never leave the server.
    pub fn error(err: &CcError, room_token: Option<RoomToken>) -> Self {
        ServerEvent::Error {
            code: err.signaling_code().to_string(),
            message: err.client_message(),
            room_token,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Joined { .. } => "joined",
            ServerEvent::PeerJoined { .. } => "peer_joined",
            ServerEvent::PeerLeft { .. } => "peer_left",
            ServerEvent::RelayOffer { .. } => "relay_offer",
            ServerEvent::RelayAnswer { .. } => "relay_answer",
            ServerEvent::RelayCandidate { .. } => "relay_candidate",
            ServerEvent::CallEnded { .. } => "call_ended",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Call-setup payloads can be lost under backpressure; clients
    /// renegotiate. Presence and teardown events cannot.
    pub fn is_droppable(&self) -> bool {
        matches!(
            self,
            ServerEvent::RelayOffer { .. }
                | ServerEvent::RelayAnswer { .. }
                | ServerEvent::RelayCandidate { .. }
        )
    }
}
