//! `RoomActor` - single writer for one signaling room.
//!
//! Each `RoomActor`:
//! - Owns the ordered member list and each member's live connections
//! - Re-checks every join against the session's authorized pair
//! - Fans events out to connection actors without waiting on them
//!
//! # Empty-room protocol
//!
//! When a removal leaves the member set empty, the actor marks itself closed
//! before replying, stops, and sends `RoomClosed` to the membership
//! supervisor. Messages still queued behind it are dropped, so their senders
//! observe `CcError::RoomClosed` and joins retry against a fresh room.

use crate::errors::CcError;
use crate::models::AuthorizedPair;
use crate::signaling::events::{RelayKind, ServerEvent};

use super::connection::ConnectionActorHandle;
use super::messages::{JoinOutcome, JoinRequest, MembershipMessage, RoomMessage, RoomSnapshot};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::types::{RoomToken, UserId};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Handle to a `RoomActor`.
///
/// Any failure to reach the actor is reported as `CcError::RoomClosed`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_token: RoomToken,
    room_id: Uuid,
    closed: Arc<AtomicBool>,
}

impl RoomActorHandle {
    #[must_use]
    pub fn room_token(&self) -> &RoomToken {
        &self.room_token
    }

    /// Identifies this room instance. A token reused after the room emptied
    /// gets a new id.
    #[must_use]
    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    /// True once the room emptied or its task stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.sender.is_closed()
    }

    pub async fn join(&self, request: JoinRequest) -> Result<JoinOutcome, CcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Join {
            request,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| CcError::RoomClosed)?
    }

    /// Remove a user and all of their connections.
    ///
    /// Returns the remaining members, or `None` if the user was not a member.
    pub async fn leave(&self, user_id: UserId) -> Result<Option<Vec<UserId>>, CcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Leave {
            user_id,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| CcError::RoomClosed)
    }

    /// Relay a call-setup payload to the other members.
    pub async fn relay(
        &self,
        from: UserId,
        kind: RelayKind,
        payload: Value,
    ) -> Result<usize, CcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Relay {
            from,
            kind,
            payload,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| CcError::RoomClosed)?
    }

    /// Send `call_ended` to every member's connections.
    pub async fn end_call(&self, from: UserId) -> Result<usize, CcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::EndCall {
            from,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| CcError::RoomClosed)?
    }

    pub async fn snapshot(&self) -> Result<RoomSnapshot, CcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::GetSnapshot { respond_to: tx })
            .await?;
        rx.await.map_err(|_| CcError::RoomClosed)
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn send(&self, message: RoomMessage) -> Result<(), CcError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CcError::RoomClosed);
        }
        self.sender
            .send(message)
            .await
            .map_err(|_| CcError::RoomClosed)
    }
}

/// A member and the connections they joined the room through.
#[derive(Debug)]
struct RoomMember {
    user_id: UserId,
    username: Option<String>,
    connections: Vec<ConnectionActorHandle>,
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_token: RoomToken,
    room_id: Uuid,
    authorized: AuthorizedPair,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    /// Weak so a lingering room never keeps the supervisor mailbox open.
    supervisor: mpsc::WeakSender<MembershipMessage>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
    /// Members in join order.
    members: Vec<RoomMember>,
    has_had_members: bool,
    closed: Arc<AtomicBool>,
    created_at: i64,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        room_token: RoomToken,
        authorized: AuthorizedPair,
        cancel_token: CancellationToken,
        supervisor: mpsc::WeakSender<MembershipMessage>,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let room_id = Uuid::new_v4();
        let closed = Arc::new(AtomicBool::new(false));

        let actor = Self {
            room_token: room_token.clone(),
            room_id,
            authorized,
            receiver,
            cancel_token: cancel_token.clone(),
            supervisor,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, room_id.to_string()),
            members: Vec::new(),
            has_had_members: false,
            closed: Arc::clone(&closed),
            created_at: chrono::Utc::now().timestamp(),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_token,
            room_id,
            closed,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "cc.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        debug!(
            target: "cc.actor.room",
            room_id = %self.room_id,
            "RoomActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "cc.actor.room",
                        room_id = %self.room_id,
                        members = self.members.len(),
                        "RoomActor received cancellation signal"
                    );
                    self.closed.store(true, Ordering::Release);
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_dequeue(self.receiver.len());
                            self.handle_message(message);
                            self.metrics.record_message_processed();

                            if self.closed.load(Ordering::Acquire) {
                                self.notify_closed();
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "cc.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            self.closed.store(true, Ordering::Release);
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "cc.actor.room",
            room_id = %self.room_id,
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                request,
                respond_to,
            } => {
                let result = self.handle_join(request);
                let _ = respond_to.send(result);
            }

            RoomMessage::Leave {
                user_id,
                respond_to,
            } => {
                let result = self.handle_leave(user_id);
                let _ = respond_to.send(result);
            }

            RoomMessage::Relay {
                from,
                kind,
                payload,
                respond_to,
            } => {
                let result = self.handle_relay(from, kind, payload);
                let _ = respond_to.send(result);
            }

            RoomMessage::EndCall { from, respond_to } => {
                let result = self.handle_end_call(from);
                let _ = respond_to.send(result);
            }

            RoomMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    fn handle_join(&mut self, request: JoinRequest) -> Result<JoinOutcome, CcError> {
        let JoinRequest {
            user_id,
            username,
            connection,
            peer_info,
            session_title,
        } = request;

        if !self.authorized.contains(user_id) {
            warn!(
                target: "cc.actor.room",
                room_id = %self.room_id,
                user_id = %user_id,
                "Join rejected: user not in authorized pair"
            );
            return Err(CcError::Unauthorized);
        }

        let is_new_room = !self.has_had_members;
        self.has_had_members = true;

        let connection_id = connection.connection_id();
        let (newly_joined, new_connection) = match self.member_mut(user_id) {
            Some(member) => {
                if member
                    .connections
                    .iter()
                    .any(|c| c.connection_id() == connection_id)
                {
                    (false, false)
                } else {
                    member.connections.push(connection.clone());
                    (false, true)
                }
            }
            None => {
                self.members.push(RoomMember {
                    user_id,
                    username: username.clone(),
                    connections: vec![connection.clone()],
                });
                (true, true)
            }
        };

        let members = self.member_ids();

        // Caller learns the room state before any peer can react to it
        let joined = ServerEvent::Joined {
            room_token: self.room_token.clone(),
            peer_info,
            current_members: members.clone(),
            session_title,
        };
        self.deliver(&connection, user_id, joined);

        if new_connection {
            self.broadcast(
                &ServerEvent::PeerJoined {
                    room_token: self.room_token.clone(),
                    user_id,
                    username,
                },
                Some(user_id),
            );
        }

        debug!(
            target: "cc.actor.room",
            room_id = %self.room_id,
            user_id = %user_id,
            newly_joined,
            new_connection,
            member_count = members.len(),
            "Member joined"
        );

        Ok(JoinOutcome {
            members,
            is_new_room,
            newly_joined,
        })
    }

    fn handle_leave(&mut self, user_id: UserId) -> Option<Vec<UserId>> {
        let position = self.members.iter().position(|m| m.user_id == user_id)?;
        self.members.remove(position);
        Some(self.after_member_removed(user_id))
    }

    /// Notify the rest of the room and close it if nobody is left.
    fn after_member_removed(&mut self, user_id: UserId) -> Vec<UserId> {
        let remaining = self.member_ids();

        self.broadcast(
            &ServerEvent::PeerLeft {
                room_token: self.room_token.clone(),
                user_id,
            },
            None,
        );

        debug!(
            target: "cc.actor.room",
            room_id = %self.room_id,
            user_id = %user_id,
            member_count = remaining.len(),
            "Member left"
        );

        if remaining.is_empty() {
            // Set before the reply goes out so no caller can observe an
            // empty room that still accepts joins
            self.closed.store(true, Ordering::Release);
        }

        remaining
    }

    fn handle_relay(
        &self,
        from: UserId,
        kind: RelayKind,
        payload: Value,
    ) -> Result<usize, CcError> {
        if !self.is_member(from) {
            return Err(CcError::Unauthorized);
        }

        let event = kind.into_event(self.room_token.clone(), from, payload);
        Ok(self.broadcast(&event, Some(from)))
    }

    fn handle_end_call(&self, from: UserId) -> Result<usize, CcError> {
        if !self.is_member(from) {
            return Err(CcError::Unauthorized);
        }

        let delivered = self.broadcast(
            &ServerEvent::CallEnded {
                room_token: self.room_token.clone(),
                user_id: from,
            },
            None,
        );

        info!(
            target: "cc.actor.room",
            room_id = %self.room_id,
            user_id = %from,
            delivered,
            "Call ended"
        );

        Ok(delivered)
    }

    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_token: self.room_token.clone(),
            room_id: self.room_id,
            members: self.member_ids(),
            connection_count: self.members.iter().map(|m| m.connections.len()).sum(),
            created_at: self.created_at,
        }
    }

    /// Deliver an event to every connection, skipping `exclude`'s.
    ///
    /// Returns the number of connections that accepted the event.
    fn broadcast(&self, event: &ServerEvent, exclude: Option<UserId>) -> usize {
        let mut delivered = 0;

        for member in &self.members {
            if Some(member.user_id) == exclude {
                continue;
            }
            for connection in &member.connections {
                if self.deliver(connection, member.user_id, event.clone()) {
                    delivered += 1;
                }
            }
        }

        delivered
    }

    /// Hand one event to a connection without waiting.
    ///
    /// A full mailbox drops relay payloads. For any other event the
    /// connection is cancelled: its client would otherwise hold a stale view
    /// of the room, and its transport applies leave semantics on the way out.
    fn deliver(
        &self,
        connection: &ConnectionActorHandle,
        user_id: UserId,
        event: ServerEvent,
    ) -> bool {
        let droppable = event.is_droppable();
        let name = event.name();

        let Err(e) = connection.try_send(event) else {
            return true;
        };

        if droppable {
            warn!(
                target: "cc.actor.room",
                room_id = %self.room_id,
                user_id = %user_id,
                connection_id = %connection.connection_id(),
                event = name,
                error = %e,
                "Dropped relay event for lagging connection"
            );
        } else {
            warn!(
                target: "cc.actor.room",
                room_id = %self.room_id,
                user_id = %user_id,
                connection_id = %connection.connection_id(),
                event = name,
                error = %e,
                "Closing lagging connection"
            );
            connection.cancel();
        }

        false
    }

    fn notify_closed(&self) {
        debug!(
            target: "cc.actor.room",
            room_id = %self.room_id,
            "Room empty, closing"
        );

        if let Some(supervisor) = self.supervisor.upgrade() {
            let message = MembershipMessage::RoomClosed {
                room_token: self.room_token.clone(),
                room_id: self.room_id,
            };
            if supervisor.try_send(message).is_err() {
                // Supervisor health check reaps the finished task instead
                debug!(
                    target: "cc.actor.room",
                    room_id = %self.room_id,
                    "Supervisor unavailable for room close notification"
                );
            }
        }
    }

    fn member_mut(&mut self, user_id: UserId) -> Option<&mut RoomMember> {
        self.members.iter_mut().find(|m| m.user_id == user_id)
    }

    fn is_member(&self, user_id: UserId) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }

    fn member_ids(&self) -> Vec<UserId> {
        self.members.iter().map(|m| m.user_id).collect()
    }
}
