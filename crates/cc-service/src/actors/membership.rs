//! `MembershipActor` - singleton supervisor for room actors.
//!
//! The `MembershipActor` is the top-level actor of the signaling hierarchy:
//!
//! - Singleton per call controller instance
//! - Routes room tokens to `RoomActor` instances
//! - Creates rooms on first join and drops them once they report empty
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors child actor health (panic detection via `JoinHandle`)
//!
//! The supervisor only ever hands out handles. Per-room work (joins, leaves,
//! fan-out) happens inside the room actors, so one busy room never blocks
//! another. Callers that already hold a room's handle (the relay caches one
//! per joined room on each connection) talk to the room directly and never
//! queue behind the supervisor.
//!
//! # Graceful Shutdown
//!
//! On SIGTERM, the supervisor:
//! 1. Sets `accepting_new = false`
//! 2. Cancels the root `CancellationToken` (propagates to all rooms)
//! 3. Waits for room tasks to finish

use crate::errors::CcError;
use crate::models::AuthorizedPair;
use crate::signaling::events::RelayKind;

use super::messages::{JoinOutcome, JoinRequest, MembershipMessage, MembershipStatus, RoomSnapshot};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle};

use common::types::{RoomToken, UserId};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Default channel buffer size for the supervisor mailbox.
const MEMBERSHIP_CHANNEL_BUFFER: usize = 1000;

/// A join that races with a room closing is retried against a fresh room.
pub const MAX_JOIN_ATTEMPTS: usize = 3;

/// How often the supervisor reaps room tasks that stopped without a close
/// notification.
const ROOM_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// A successful join: the room's handle plus what the room reported.
#[derive(Debug, Clone)]
pub struct JoinedRoom {
    pub room: RoomActorHandle,
    pub outcome: JoinOutcome,
}

/// Handle to the `MembershipActor`.
///
/// This is the room membership table used by the signaling relay. Cloning
/// is cheap; all clones talk to the same supervisor.
#[derive(Clone, Debug)]
pub struct MembershipTable {
    sender: mpsc::Sender<MembershipMessage>,
    cancel_token: CancellationToken,
}

impl MembershipTable {
    /// Create a new `MembershipActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(cc_id: String, metrics: Arc<ActorMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(MEMBERSHIP_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = MembershipActor::new(
            cc_id,
            receiver,
            sender.downgrade(),
            cancel_token.clone(),
            metrics,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Join a room, creating it if absent.
    ///
    /// # Errors
    ///
    /// - `CcError::Unauthorized` if the user is not in the authorized pair
    /// - `CcError::Draining` once shutdown has started
    /// - `CcError::RoomClosed` if every attempt raced with a closing room
    pub async fn join(
        &self,
        room_token: &RoomToken,
        authorized: AuthorizedPair,
        request: JoinRequest,
    ) -> Result<JoinedRoom, CcError> {
        if !authorized.contains(request.user_id) {
            return Err(CcError::Unauthorized);
        }

        for attempt in 1..=MAX_JOIN_ATTEMPTS {
            let room = self.get_or_create_room(room_token, authorized).await?;
            match room.join(request.clone()).await {
                Err(CcError::RoomClosed) => {
                    debug!(
                        target: "cc.actor.membership",
                        room_id = %room.room_id(),
                        attempt,
                        "Join raced with room close, retrying"
                    );
                }
                Ok(outcome) => return Ok(JoinedRoom { room, outcome }),
                Err(e) => return Err(e),
            }
        }

        warn!(
            target: "cc.actor.membership",
            user_id = %request.user_id,
            attempts = MAX_JOIN_ATTEMPTS,
            "Join failed: room kept closing"
        );
        Err(CcError::RoomClosed)
    }

    /// Remove a user from one room.
    ///
    /// Returns the remaining members, or `None` if the room does not exist or
    /// the user was not a member.
    pub async fn leave(
        &self,
        room_token: &RoomToken,
        user_id: UserId,
    ) -> Result<Option<Vec<UserId>>, CcError> {
        let Some(room) = self.get_room(room_token).await? else {
            return Ok(None);
        };

        match room.leave(user_id).await {
            Ok(remaining) => Ok(remaining),
            Err(CcError::RoomClosed) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Apply leave semantics to every room the user could be in.
    ///
    /// This is also the cleanup for a dropped connection: losing any one
    /// connection removes the user, with all of their connections, from each
    /// room. Each room is processed atomically inside its own actor. Returns
    /// the rooms the user actually left with their remaining members.
    pub async fn remove_from_all_rooms(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(RoomToken, Vec<UserId>)>, CcError> {
        let rooms = self.rooms_for(user_id).await?;
        let mut left = Vec::new();

        for room in rooms {
            match room.leave(user_id).await {
                Ok(Some(remaining)) => left.push((room.room_token().clone(), remaining)),
                Ok(None) | Err(CcError::RoomClosed) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(left)
    }

    /// Relay a call-setup payload to the other members of a room.
    ///
    /// A missing or closing room is reported as `Unauthorized`: the caller
    /// cannot be a member of it.
    pub async fn relay(
        &self,
        room_token: &RoomToken,
        from: UserId,
        kind: RelayKind,
        payload: Value,
    ) -> Result<usize, CcError> {
        let room = self
            .get_room(room_token)
            .await?
            .ok_or(CcError::Unauthorized)?;

        room.relay(from, kind, payload)
            .await
            .map_err(non_member_if_closed)
    }

    /// Send `call_ended` to every member of a room, caller included.
    pub async fn end_call(&self, room_token: &RoomToken, from: UserId) -> Result<usize, CcError> {
        let room = self
            .get_room(room_token)
            .await?
            .ok_or(CcError::Unauthorized)?;

        room.end_call(from).await.map_err(non_member_if_closed)
    }

    /// Point-in-time view of a room, if it exists.
    pub async fn snapshot(&self, room_token: &RoomToken) -> Result<Option<RoomSnapshot>, CcError> {
        let Some(room) = self.get_room(room_token).await? else {
            return Ok(None);
        };

        match room.snapshot().await {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(CcError::RoomClosed) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Get the current supervisor status.
    pub async fn status(&self) -> Result<MembershipStatus, CcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(MembershipMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop creating rooms and cancel every room actor.
    pub async fn shutdown(&self) -> Result<(), CcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(MembershipMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for spawning connection actors.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    async fn get_or_create_room(
        &self,
        room_token: &RoomToken,
        authorized: AuthorizedPair,
    ) -> Result<RoomActorHandle, CcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(MembershipMessage::GetOrCreateRoom {
                room_token: room_token.clone(),
                authorized,
                respond_to: tx,
            })
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))?
    }

    async fn get_room(&self, room_token: &RoomToken) -> Result<Option<RoomActorHandle>, CcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(MembershipMessage::GetRoom {
                room_token: room_token.clone(),
                respond_to: tx,
            })
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    async fn rooms_for(&self, user_id: UserId) -> Result<Vec<RoomActorHandle>, CcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(MembershipMessage::RoomsFor {
                user_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }
}

/// A room that closed under the caller cannot have the caller as a member.
pub(crate) fn non_member_if_closed(err: CcError) -> CcError {
    match err {
        CcError::RoomClosed => CcError::Unauthorized,
        other => other,
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
    authorized: AuthorizedPair,
    created_at: i64,
}

/// The `MembershipActor` implementation.
pub struct MembershipActor {
    cc_id: String,
    receiver: mpsc::Receiver<MembershipMessage>,
    /// Given to room actors for their close notification.
    self_sender: mpsc::WeakSender<MembershipMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    rooms: HashMap<RoomToken, ManagedRoom>,
    /// Both participants of every managed room, so per-user lookups touch
    /// only that user's rooms.
    rooms_by_user: HashMap<UserId, HashSet<RoomToken>>,
    accepting_new: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl MembershipActor {
    fn new(
        cc_id: String,
        receiver: mpsc::Receiver<MembershipMessage>,
        self_sender: mpsc::WeakSender<MembershipMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Membership, &cc_id);

        Self {
            cc_id,
            receiver,
            self_sender,
            cancel_token,
            rooms: HashMap::new(),
            rooms_by_user: HashMap::new(),
            accepting_new: true,
            metrics,
            mailbox,
        }
    }

    #[instrument(skip_all, name = "cc.actor.membership", fields(cc_id = %self.cc_id))]
    async fn run(mut self) {
        info!(
            target: "cc.actor.membership",
            cc_id = %self.cc_id,
            "MembershipActor started"
        );

        let mut health_check = tokio::time::interval(ROOM_HEALTH_CHECK_INTERVAL);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "cc.actor.membership",
                        cc_id = %self.cc_id,
                        "MembershipActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                // Reap room tasks that stopped without a close notification
                _ = health_check.tick() => {
                    self.check_room_health().await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_dequeue(self.receiver.len());
                            self.handle_message(message).await;
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "cc.actor.membership",
                                cc_id = %self.cc_id,
                                "MembershipActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "cc.actor.membership",
            cc_id = %self.cc_id,
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "MembershipActor stopped"
        );
    }

    async fn handle_message(&mut self, message: MembershipMessage) {
        match message {
            MembershipMessage::GetOrCreateRoom {
                room_token,
                authorized,
                respond_to,
            } => {
                let result = self.get_or_create_room(room_token, authorized);
                let _ = respond_to.send(result);
            }

            MembershipMessage::GetRoom {
                room_token,
                respond_to,
            } => {
                let room = self
                    .rooms
                    .get(&room_token)
                    .filter(|managed| !managed.handle.is_closed())
                    .map(|managed| managed.handle.clone());
                let _ = respond_to.send(room);
            }

            MembershipMessage::RoomsFor {
                user_id,
                respond_to,
            } => {
                let rooms = self
                    .rooms_by_user
                    .get(&user_id)
                    .into_iter()
                    .flatten()
                    .filter_map(|room_token| self.rooms.get(room_token))
                    .filter(|managed| !managed.handle.is_closed())
                    .map(|managed| managed.handle.clone())
                    .collect();
                let _ = respond_to.send(rooms);
            }

            MembershipMessage::RoomClosed {
                room_token,
                room_id,
            } => {
                self.remove_closed_room(&room_token, room_id).await;
            }

            MembershipMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            MembershipMessage::Shutdown { respond_to } => {
                let result = self.initiate_shutdown();
                let _ = respond_to.send(result);
            }
        }
    }

    /// Return the live room for a token, replacing a closed one.
    fn get_or_create_room(
        &mut self,
        room_token: RoomToken,
        authorized: AuthorizedPair,
    ) -> Result<RoomActorHandle, CcError> {
        if let Some(managed) = self.rooms.get(&room_token) {
            if !managed.handle.is_closed() {
                return Ok(managed.handle.clone());
            }
        }

        if !self.accepting_new {
            return Err(CcError::Draining);
        }

        // A closed entry whose notification is still queued
        if let Some(stale) = self.remove_room(&room_token) {
            self.reap(stale);
        }

        let (handle, task_handle) = RoomActor::spawn(
            room_token.clone(),
            authorized,
            self.cancel_token.child_token(),
            self.self_sender.clone(),
            Arc::clone(&self.metrics),
        );

        let room_id = handle.room_id();
        for user_id in [authorized.attachee, authorized.assessor] {
            self.rooms_by_user
                .entry(user_id)
                .or_default()
                .insert(room_token.clone());
        }
        self.rooms.insert(
            room_token,
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
                authorized,
                created_at: chrono::Utc::now().timestamp(),
            },
        );

        self.metrics.room_created();

        info!(
            target: "cc.actor.membership",
            cc_id = %self.cc_id,
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room actor created"
        );

        Ok(handle)
    }

    /// Drop the routing entry if it still points at the room that closed.
    async fn remove_closed_room(&mut self, room_token: &RoomToken, room_id: Uuid) {
        let matches = self
            .rooms
            .get(room_token)
            .is_some_and(|managed| managed.handle.room_id() == room_id);

        if !matches {
            debug!(
                target: "cc.actor.membership",
                cc_id = %self.cc_id,
                room_id = %room_id,
                "Ignoring close notification for replaced room"
            );
            return;
        }

        if let Some(managed) = self.remove_room(room_token) {
            let lifetime_secs = chrono::Utc::now().timestamp() - managed.created_at;
            info!(
                target: "cc.actor.membership",
                cc_id = %self.cc_id,
                room_id = %room_id,
                lifetime_secs,
                total_rooms = self.rooms.len(),
                "Room actor removed"
            );
            self.reap(managed);
        }
    }

    /// Drop a routing entry together with its participant index entries.
    fn remove_room(&mut self, room_token: &RoomToken) -> Option<ManagedRoom> {
        let managed = self.rooms.remove(room_token)?;

        for user_id in [managed.authorized.attachee, managed.authorized.assessor] {
            if let Some(tokens) = self.rooms_by_user.get_mut(&user_id) {
                tokens.remove(room_token);
                if tokens.is_empty() {
                    self.rooms_by_user.remove(&user_id);
                }
            }
        }

        Some(managed)
    }

    /// Cancel a removed room and await its task off the message loop.
    fn reap(&self, managed: ManagedRoom) {
        managed.handle.cancel();
        self.metrics.room_removed();

        let cc_id = self.cc_id.clone();
        let room_id = managed.handle.room_id();
        tokio::spawn(async move {
            match tokio::time::timeout(Duration::from_secs(5), managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "cc.actor.membership",
                        cc_id = %cc_id,
                        room_id = %room_id,
                        "Room actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "cc.actor.membership",
                        cc_id = %cc_id,
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "cc.actor.membership",
                        cc_id = %cc_id,
                        room_id = %room_id,
                        "Room actor task cleanup timed out"
                    );
                }
            }
        });
    }

    fn get_status(&self) -> MembershipStatus {
        MembershipStatus {
            room_count: self.rooms.len(),
            connection_count: self.metrics.connection_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    fn initiate_shutdown(&mut self) -> Result<(), CcError> {
        info!(
            target: "cc.actor.membership",
            cc_id = %self.cc_id,
            room_count = self.rooms.len(),
            "Initiating graceful shutdown"
        );

        self.accepting_new = false;

        // Propagates to every room and connection actor
        self.cancel_token.cancel();

        Ok(())
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "cc.actor.membership",
            cc_id = %self.cc_id,
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        self.rooms_by_user.clear();
        for (_, managed) in self.rooms.drain() {
            let room_id = managed.handle.room_id();
            match tokio::time::timeout(Duration::from_secs(30), managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "cc.actor.membership",
                        cc_id = %self.cc_id,
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "cc.actor.membership",
                        cc_id = %self.cc_id,
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "cc.actor.membership",
                        cc_id = %self.cc_id,
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }

        info!(
            target: "cc.actor.membership",
            cc_id = %self.cc_id,
            "Graceful shutdown complete"
        );
    }

    /// Check health of managed room actors.
    async fn check_room_health(&mut self) {
        let finished: Vec<RoomToken> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_token, _)| room_token.clone())
            .collect();

        for room_token in finished {
            if let Some(managed) = self.remove_room(&room_token) {
                let room_id = managed.handle.room_id();
                match managed.task_handle.await {
                    Ok(()) => {
                        debug!(
                            target: "cc.actor.membership",
                            cc_id = %self.cc_id,
                            room_id = %room_id,
                            "Room actor exited"
                        );
                    }
                    Err(join_error) => {
                        if join_error.is_panic() {
                            error!(
                                target: "cc.actor.membership",
                                cc_id = %self.cc_id,
                                room_id = %room_id,
                                error = ?join_error,
                                "Room actor panicked - members lost their room"
                            );
                            self.metrics.record_panic(ActorType::Room);
                        }
                    }
                }

                self.metrics.room_removed();
            }
        }
    }
}
