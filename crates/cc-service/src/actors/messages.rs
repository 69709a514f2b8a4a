//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Request-reply uses `tokio::sync::oneshot`.

use super::connection::ConnectionActorHandle;
use super::room::RoomActorHandle;
use crate::errors::CcError;
use crate::models::AuthorizedPair;
use crate::signaling::events::{PeerInfo, RelayKind, ServerEvent};
use common::types::{RoomToken, UserId};
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Messages sent to the `MembershipActor` supervisor.
#[derive(Debug)]
pub enum MembershipMessage {
    /// Return the live room for a token, spawning one if absent or closed.
    GetOrCreateRoom {
        room_token: RoomToken,
        authorized: AuthorizedPair,
        respond_to: oneshot::Sender<Result<RoomActorHandle, CcError>>,
    },

    /// Return the live room for a token, if any.
    GetRoom {
        room_token: RoomToken,
        respond_to: oneshot::Sender<Option<RoomActorHandle>>,
    },

    /// Live rooms whose authorized pair includes the user.
    RoomsFor {
        user_id: UserId,
        respond_to: oneshot::Sender<Vec<RoomActorHandle>>,
    },

    /// Sent by a room actor after its member set became empty and it stopped.
    RoomClosed { room_token: RoomToken, room_id: Uuid },

    GetStatus {
        respond_to: oneshot::Sender<MembershipStatus>,
    },

    /// Stop creating rooms and cancel every room actor.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), CcError>>,
    },
}

/// Messages sent to a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    Join {
        request: JoinRequest,
        respond_to: oneshot::Sender<Result<JoinOutcome, CcError>>,
    },

    /// Remove the user and all of their connections.
    ///
    /// Also used when any one of the user's connections drops.
    ///
    /// Replies with the remaining members, or `None` if the user was not a member.
    Leave {
        user_id: UserId,
        respond_to: oneshot::Sender<Option<Vec<UserId>>>,
    },

    /// Forward a call-setup payload to the other members.
    Relay {
        from: UserId,
        kind: RelayKind,
        payload: Value,
        /// Number of connections the event was delivered to.
        respond_to: oneshot::Sender<Result<usize, CcError>>,
    },

    /// Fan `call_ended` out to every member, caller included.
    EndCall {
        from: UserId,
        respond_to: oneshot::Sender<Result<usize, CcError>>,
    },

    GetSnapshot {
        respond_to: oneshot::Sender<RoomSnapshot>,
    },
}

/// Messages sent to a `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Deliver an event to the client.
    Send { event: ServerEvent },
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Everything a room needs to admit one connection.
///
/// The room sends `joined` to `connection` itself, before any other member
/// can react to the matching `peer_joined`.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub user_id: UserId,
    pub username: Option<String>,
    pub connection: ConnectionActorHandle,
    /// The other participant of the session.
    pub peer_info: PeerInfo,
    pub session_title: String,
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Members in join order, including the caller.
    pub members: Vec<UserId>,
    /// True when this join created the room entry.
    pub is_new_room: bool,
    /// False when the user was already a member (rejoin or extra connection).
    pub newly_joined: bool,
}

/// Point-in-time view of one room.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub room_token: RoomToken,
    pub room_id: Uuid,
    pub members: Vec<UserId>,
    pub connection_count: usize,
    pub created_at: i64,
}

/// Status of the membership supervisor.
#[derive(Debug, Clone)]
pub struct MembershipStatus {
    pub room_count: usize,
    pub connection_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}
