//! Signaling relay.
//!
//! Translates inbound [`ClientEvent`]s into registry lookups and membership
//! operations. Registry I/O always completes before the membership table is
//! touched, so no room is ever held waiting on the database.
//!
//! Failures are answered with an `error` event on the caller's connection
//! only. `Unauthorized` and `NotFound` are indistinguishable to the client.
//!
//! Each [`SignalingPeer`] keeps the handles of the rooms it joined. Relay,
//! end-call and leave go straight to those room actors; the membership
//! supervisor is consulted only on join and on a cache miss.

use crate::actors::membership::non_member_if_closed;
use crate::actors::{ConnectionActorHandle, JoinRequest, MembershipTable, RoomActorHandle};
use crate::errors::CcError;
use crate::lifecycle::LifecycleSynchronizer;
use crate::models::{Session, UserRole};
use crate::observability::metrics;
use crate::registry::SessionRegistry;
use crate::signaling::events::{ClientEvent, PeerInfo, RelayKind, ServerEvent};
use common::types::{RoomToken, UserId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// The authenticated side of one signaling connection.
#[derive(Debug)]
pub struct SignalingPeer {
    pub user_id: UserId,
    /// Display name from the access token, shown to the other participant.
    pub username: Option<String>,
    pub connection: ConnectionActorHandle,
    /// Rooms joined through this connection.
    rooms: HashMap<RoomToken, RoomActorHandle>,
}

impl SignalingPeer {
    pub fn new(
        user_id: UserId,
        username: Option<String>,
        connection: ConnectionActorHandle,
    ) -> Self {
        Self {
            user_id,
            username,
            connection,
            rooms: HashMap::new(),
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection.connection_id()
    }

    /// Tokens of the rooms joined through this connection.
    pub fn joined_rooms(&self) -> impl Iterator<Item = &RoomToken> {
        self.rooms.keys()
    }

    /// The cached room for a token, if it is still open.
    ///
    /// A closed room is evicted: a newer room under the same token may exist,
    /// and only the supervisor knows about it.
    fn room(&mut self, room_token: &RoomToken) -> Option<RoomActorHandle> {
        match self.rooms.get(room_token) {
            Some(room) if !room.is_closed() => Some(room.clone()),
            Some(_) => {
                self.rooms.remove(room_token);
                None
            }
            None => None,
        }
    }
}

/// Routes signaling events between the two participants of a session.
#[derive(Clone)]
pub struct SignalingRelay {
    registry: Arc<dyn SessionRegistry>,
    membership: MembershipTable,
    lifecycle: LifecycleSynchronizer,
}

impl SignalingRelay {
    pub fn new(
        registry: Arc<dyn SessionRegistry>,
        membership: MembershipTable,
        lifecycle: LifecycleSynchronizer,
    ) -> Self {
        Self {
            registry,
            membership,
            lifecycle,
        }
    }

    pub fn membership(&self) -> &MembershipTable {
        &self.membership
    }

    /// Handle one inbound text frame.
    ///
    /// Malformed frames get a `BAD_REQUEST` error event.
    pub async fn handle_text(&self, peer: &mut SignalingPeer, text: &str) {
        match ClientEvent::parse(text) {
            Ok(event) => self.handle_event(peer, event).await,
            Err(e) => {
                metrics::record_signaling_error("unknown", e.error_type_label());
                self.send_error(peer, &e, None).await;
            }
        }
    }

    /// Handle one parsed event, replying with an `error` event on failure.
    #[instrument(
        skip_all,
        name = "cc.relay.event",
        fields(event = event.name(), user_id = %peer.user_id)
    )]
    pub async fn handle_event(&self, peer: &mut SignalingPeer, event: ClientEvent) {
        let start = Instant::now();
        let name = event.name();
        let room_token = event.room_token().clone();

        let result = self.dispatch(peer, event).await;

        match result {
            Ok(()) => {
                metrics::record_signaling_event(name, "success", start.elapsed());
            }
            Err(e) => {
                metrics::record_signaling_event(name, "error", start.elapsed());
                metrics::record_signaling_error(name, e.error_type_label());
                debug!(
                    target: "cc.relay",
                    event = name,
                    user_id = %peer.user_id,
                    error = %e,
                    "Signaling event rejected"
                );
                self.send_error(peer, &e, Some(room_token)).await;
            }
        }
    }

    async fn dispatch(
        &self,
        peer: &mut SignalingPeer,
        event: ClientEvent,
    ) -> Result<(), CcError> {
        match event {
            ClientEvent::Join { room_token } => self.join(peer, room_token).await,
            ClientEvent::Leave { room_token } => {
                self.leave(peer, &room_token).await;
                Ok(())
            }
            ClientEvent::RelayOffer {
                room_token,
                payload,
            } => self.relay(peer, &room_token, RelayKind::Offer, payload).await,
            ClientEvent::RelayAnswer {
                room_token,
                payload,
            } => self.relay(peer, &room_token, RelayKind::Answer, payload).await,
            ClientEvent::RelayCandidate {
                room_token,
                payload,
            } => {
                self.relay(peer, &room_token, RelayKind::Candidate, payload)
                    .await
            }
            ClientEvent::EndCall { room_token } => self.end_call(peer, &room_token).await,
        }
    }

    async fn join(&self, peer: &mut SignalingPeer, room_token: RoomToken) -> Result<(), CcError> {
        // All registry reads happen before the room sees the join
        let session = self.registry.find_by_room_token(&room_token).await?;
        if !session.is_participant(peer.user_id) {
            warn!(
                target: "cc.relay",
                user_id = %peer.user_id,
                session_id = %session.session_id,
                "Join rejected: not a participant"
            );
            return Err(CcError::Unauthorized);
        }

        let peer_info = self.peer_info(&session, peer.user_id).await?;

        let joined = self
            .membership
            .join(
                &room_token,
                session.authorized_pair(),
                JoinRequest {
                    user_id: peer.user_id,
                    username: peer.username.clone(),
                    connection: peer.connection.clone(),
                    peer_info,
                    session_title: session.title.clone(),
                },
            )
            .await?;
        let outcome = joined.outcome;
        peer.rooms.insert(room_token, joined.room);

        info!(
            target: "cc.relay",
            user_id = %peer.user_id,
            session_id = %session.session_id,
            members = outcome.members.len(),
            newly_joined = outcome.newly_joined,
            is_new_room = outcome.is_new_room,
            "User joined room"
        );

        Ok(())
    }

    /// The other participant of the session, connected or not.
    async fn peer_info(&self, session: &Session, user_id: UserId) -> Result<PeerInfo, CcError> {
        let pair = session.authorized_pair();
        let other = pair.other(user_id).ok_or(CcError::Unauthorized)?;

        let role = if other == pair.assessor {
            UserRole::Assessor
        } else {
            UserRole::Attachee
        };
        let username = self
            .registry
            .lookup_user(other)
            .await?
            .map(|record| record.username);

        Ok(PeerInfo {
            id: other,
            username,
            role,
        })
    }

    /// Leave is best-effort: non-members and missing rooms are silent no-ops.
    async fn leave(&self, peer: &mut SignalingPeer, room_token: &RoomToken) {
        let result = match peer.room(room_token) {
            Some(room) => match room.leave(peer.user_id).await {
                Err(CcError::RoomClosed) => Ok(None),
                other => other,
            },
            None => self.membership.leave(room_token, peer.user_id).await,
        };
        peer.rooms.remove(room_token);

        match result {
            Ok(Some(remaining)) => {
                info!(
                    target: "cc.relay",
                    user_id = %peer.user_id,
                    remaining = remaining.len(),
                    "User left room"
                );
            }
            Ok(None) => {
                debug!(
                    target: "cc.relay",
                    user_id = %peer.user_id,
                    "Leave from non-member ignored"
                );
            }
            Err(e) => {
                warn!(
                    target: "cc.relay",
                    user_id = %peer.user_id,
                    error = %e,
                    "Leave failed"
                );
            }
        }
    }

    async fn relay(
        &self,
        peer: &mut SignalingPeer,
        room_token: &RoomToken,
        kind: RelayKind,
        payload: Value,
    ) -> Result<(), CcError> {
        let delivered = match peer.room(room_token) {
            Some(room) => room
                .relay(peer.user_id, kind, payload)
                .await
                .map_err(non_member_if_closed)?,
            None => {
                self.membership
                    .relay(room_token, peer.user_id, kind, payload)
                    .await?
            }
        };

        debug!(
            target: "cc.relay",
            user_id = %peer.user_id,
            kind = kind.as_str(),
            delivered,
            "Relayed call-setup message"
        );

        Ok(())
    }

    async fn end_call(
        &self,
        peer: &mut SignalingPeer,
        room_token: &RoomToken,
    ) -> Result<(), CcError> {
        match peer.room(room_token) {
            Some(room) => room
                .end_call(peer.user_id)
                .await
                .map_err(non_member_if_closed)?,
            None => self.membership.end_call(room_token, peer.user_id).await?,
        };

        // The room has already fanned out; status sync never fails the event
        match self.lifecycle.on_call_ended(room_token).await {
            Ok(outcome) => {
                debug!(
                    target: "cc.relay",
                    user_id = %peer.user_id,
                    outcome = outcome.as_str(),
                    "Call end synchronized"
                );
            }
            Err(e) => {
                warn!(
                    target: "cc.relay",
                    user_id = %peer.user_id,
                    error = %e,
                    "Failed to synchronize call end"
                );
            }
        }

        Ok(())
    }

    /// Clean up after a closed connection.
    ///
    /// A dropped connection is a leave: the user is removed, with all of
    /// their connections, from every room they are in, and each remaining
    /// member sees one `peer_left`. Awaited by the transport before the
    /// connection counts as closed. Returns the number of rooms the user left.
    #[instrument(skip_all, name = "cc.relay.disconnect", fields(user_id = %peer.user_id))]
    pub async fn disconnect(&self, peer: &mut SignalingPeer) -> usize {
        peer.rooms.clear();

        match self.membership.remove_from_all_rooms(peer.user_id).await {
            Ok(left) => {
                if !left.is_empty() {
                    info!(
                        target: "cc.relay",
                        user_id = %peer.user_id,
                        rooms_left = left.len(),
                        "Disconnect cleanup complete"
                    );
                }
                left.len()
            }
            Err(e) => {
                warn!(
                    target: "cc.relay",
                    user_id = %peer.user_id,
                    error = %e,
                    "Disconnect cleanup failed"
                );
                0
            }
        }
    }

    async fn send_error(&self, peer: &SignalingPeer, err: &CcError, room_token: Option<RoomToken>) {
        let event = ServerEvent::error(err, room_token);
        if let Err(e) = peer.connection.send(event).await {
            debug!(
                target: "cc.relay",
                user_id = %peer.user_id,
                error = %e,
                "Could not deliver error event"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{ActorMetrics, ConnectionActor};
    use crate::models::{NewSession, SessionStatus};
    use crate::registry::InMemorySessionRegistry;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;
    use tokio::sync::mpsc;

    const ATTACHEE: UserId = UserId(7);
    const ASSESSOR: UserId = UserId(3);
    const OUTSIDER: UserId = UserId(9);
    const OTHER_ATTACHEE: UserId = UserId(11);

    struct Harness {
        registry: Arc<InMemorySessionRegistry>,
        relay: SignalingRelay,
        metrics: Arc<ActorMetrics>,
        room_token: RoomToken,
    }

    struct Client {
        peer: SignalingPeer,
        events: mpsc::Receiver<ServerEvent>,
    }

    impl Client {
        async fn next(&mut self) -> ServerEvent {
            tokio::time::timeout(std::time::Duration::from_secs(1), self.events.recv())
                .await
                .expect("timed out waiting for event")
                .expect("connection closed")
        }

        async fn assert_silent(&mut self) {
            let result =
                tokio::time::timeout(std::time::Duration::from_millis(50), self.events.recv())
                    .await;
            assert!(result.is_err(), "unexpected event: {result:?}");
        }
    }

    async fn harness() -> Harness {
        let registry = Arc::new(
            InMemorySessionRegistry::new()
                .with_user(7, "attachee7", UserRole::Attachee)
                .with_user(3, "assessor3", UserRole::Assessor)
                .with_user(9, "attachee9", UserRole::Attachee)
                .with_user(11, "attachee11", UserRole::Attachee),
        );
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let session = registry
            .create(NewSession {
                attachee_id: ATTACHEE,
                assessor_id: ASSESSOR,
                title: "Week 4 review".to_string(),
                description: None,
                start_time: start,
                end_time: start + Duration::minutes(60),
            })
            .await
            .unwrap();
        let room_token = registry.assign_room_token(session.session_id).await.unwrap();

        let metrics = ActorMetrics::new();
        let membership = MembershipTable::new("cc-relay-test".to_string(), Arc::clone(&metrics));
        let relay = SignalingRelay::new(
            registry.clone(),
            membership,
            LifecycleSynchronizer::new(registry.clone()),
        );

        Harness {
            registry,
            relay,
            metrics,
            room_token,
        }
    }

    impl Harness {
        fn connect(&self, user_id: UserId) -> Client {
            let (tx, events) = mpsc::channel(32);
            let (connection, _task) = ConnectionActor::spawn(
                Uuid::new_v4(),
                user_id,
                tx,
                self.relay.membership().child_token(),
                Arc::clone(&self.metrics),
            );
            Client {
                peer: SignalingPeer::new(user_id, Some(format!("user{user_id}")), connection),
                events,
            }
        }

        fn frame(&self, event_type: &str) -> String {
            frame(event_type, &self.room_token)
        }

        /// A second session between `OTHER_ATTACHEE` and the same assessor.
        async fn other_room(&self) -> RoomToken {
            let start = Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap();
            let session = self
                .registry
                .create(NewSession {
                    attachee_id: OTHER_ATTACHEE,
                    assessor_id: ASSESSOR,
                    title: "Week 5 review".to_string(),
                    description: None,
                    start_time: start,
                    end_time: start + Duration::minutes(60),
                })
                .await
                .unwrap();
            self.registry
                .assign_room_token(session.session_id)
                .await
                .unwrap()
        }
    }

    fn frame(event_type: &str, room_token: &RoomToken) -> String {
        json!({"type": event_type, "room_token": room_token}).to_string()
    }

    impl Client {
        /// Drain everything queued within a short window.
        async fn drain(&mut self) -> Vec<ServerEvent> {
            let mut events = Vec::new();
            while let Ok(Some(event)) =
                tokio::time::timeout(std::time::Duration::from_millis(50), self.events.recv())
                    .await
            {
                events.push(event);
            }
            events
        }
    }

    fn unauthorized(room_token: &RoomToken) -> ServerEvent {
        ServerEvent::Error {
            code: "UNAUTHORIZED".to_string(),
            message: "You are not authorized to join this room".to_string(),
            room_token: Some(room_token.clone()),
        }
    }

    #[tokio::test]
    async fn test_join_sequence_for_both_participants() {
        let h = harness().await;
        let mut attachee = h.connect(ATTACHEE);
        let mut assessor = h.connect(ASSESSOR);

        h.relay.handle_text(&mut attachee.peer, &h.frame("join")).await;
        assert_eq!(
            attachee.next().await,
            ServerEvent::Joined {
                room_token: h.room_token.clone(),
                peer_info: PeerInfo {
                    id: ASSESSOR,
                    username: Some("assessor3".to_string()),
                    role: UserRole::Assessor,
                },
                current_members: vec![ATTACHEE],
                session_title: "Week 4 review".to_string(),
            }
        );
        assessor.assert_silent().await;

        h.relay.handle_text(&mut assessor.peer, &h.frame("join")).await;
        assert_eq!(
            attachee.next().await,
            ServerEvent::PeerJoined {
                room_token: h.room_token.clone(),
                user_id: ASSESSOR,
                username: Some("user3".to_string()),
            }
        );
        assert_eq!(
            assessor.next().await,
            ServerEvent::Joined {
                room_token: h.room_token.clone(),
                peer_info: PeerInfo {
                    id: ATTACHEE,
                    username: Some("attachee7".to_string()),
                    role: UserRole::Attachee,
                },
                current_members: vec![ATTACHEE, ASSESSOR],
                session_title: "Week 4 review".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_outsider_join_is_unauthorized_and_changes_nothing() {
        let h = harness().await;
        let mut attachee = h.connect(ATTACHEE);
        let mut outsider = h.connect(OUTSIDER);

        h.relay.handle_text(&mut attachee.peer, &h.frame("join")).await;
        attachee.next().await;

        h.relay.handle_text(&mut outsider.peer, &h.frame("join")).await;
        assert_eq!(outsider.next().await, unauthorized(&h.room_token));
        attachee.assert_silent().await;

        let snapshot = h
            .relay
            .membership()
            .snapshot(&h.room_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.members, vec![ATTACHEE]);
    }

    #[tokio::test]
    async fn test_unknown_room_looks_like_unauthorized() {
        let h = harness().await;
        let mut attachee = h.connect(ATTACHEE);
        let bogus = RoomToken::from("r-bogus");

        let frame = json!({"type": "join", "room_token": "r-bogus"}).to_string();
        h.relay.handle_text(&mut attachee.peer, &frame).await;

        assert_eq!(attachee.next().await, unauthorized(&bogus));
    }

    #[tokio::test]
    async fn test_end_call_completes_session_once() {
        let h = harness().await;
        let mut attachee = h.connect(ATTACHEE);
        let mut assessor = h.connect(ASSESSOR);

        h.relay.handle_text(&mut attachee.peer, &h.frame("join")).await;
        h.relay.handle_text(&mut assessor.peer, &h.frame("join")).await;
        attachee.next().await;
        attachee.next().await;
        assessor.next().await;

        h.relay.handle_text(&mut attachee.peer, &h.frame("end_call")).await;
        let ended_by_attachee = ServerEvent::CallEnded {
            room_token: h.room_token.clone(),
            user_id: ATTACHEE,
        };
        assert_eq!(attachee.next().await, ended_by_attachee);
        assert_eq!(assessor.next().await, ended_by_attachee);

        let completed = h.registry.find_by_room_token(&h.room_token).await.unwrap();
        assert_eq!(completed.status, SessionStatus::Completed);
        assert!(completed.completed_at.is_some());

        h.relay.handle_text(&mut assessor.peer, &h.frame("end_call")).await;
        let ended_by_assessor = ServerEvent::CallEnded {
            room_token: h.room_token.clone(),
            user_id: ASSESSOR,
        };
        assert_eq!(attachee.next().await, ended_by_assessor);
        assert_eq!(assessor.next().await, ended_by_assessor);

        let after = h.registry.find_by_room_token(&h.room_token).await.unwrap();
        assert_eq!(after, completed);
    }

    #[tokio::test]
    async fn test_relay_passes_payload_through() {
        let h = harness().await;
        let mut attachee = h.connect(ATTACHEE);
        let mut assessor = h.connect(ASSESSOR);

        h.relay.handle_text(&mut attachee.peer, &h.frame("join")).await;
        h.relay.handle_text(&mut assessor.peer, &h.frame("join")).await;
        attachee.next().await;
        attachee.next().await;
        assessor.next().await;

        let payload = json!({"candidate": "candidate:1 1 UDP 2122252543 10.0.0.2 50000 typ host"});
        let frame = json!({
            "type": "relay_candidate",
            "room_token": h.room_token,
            "payload": payload,
        })
        .to_string();
        h.relay.handle_text(&mut assessor.peer, &frame).await;

        assert_eq!(
            attachee.next().await,
            ServerEvent::RelayCandidate {
                room_token: h.room_token.clone(),
                from: ASSESSOR,
                payload,
            }
        );
        assessor.assert_silent().await;
    }

    #[tokio::test]
    async fn test_relay_from_non_member_is_unauthorized() {
        let h = harness().await;
        let mut attachee = h.connect(ATTACHEE);
        let mut assessor = h.connect(ASSESSOR);

        h.relay.handle_text(&mut attachee.peer, &h.frame("join")).await;
        attachee.next().await;

        let frame = json!({"type": "relay_offer", "room_token": h.room_token, "payload": {}})
            .to_string();
        h.relay.handle_text(&mut assessor.peer, &frame).await;

        assert_eq!(assessor.next().await, unauthorized(&h.room_token));
        attachee.assert_silent().await;
    }

    #[tokio::test]
    async fn test_leave_from_non_member_is_silent() {
        let h = harness().await;
        let mut assessor = h.connect(ASSESSOR);

        h.relay.handle_text(&mut assessor.peer, &h.frame("leave")).await;
        assessor.assert_silent().await;
    }

    #[tokio::test]
    async fn test_leave_notifies_remaining_member() {
        let h = harness().await;
        let mut attachee = h.connect(ATTACHEE);
        let mut assessor = h.connect(ASSESSOR);

        h.relay.handle_text(&mut attachee.peer, &h.frame("join")).await;
        h.relay.handle_text(&mut assessor.peer, &h.frame("join")).await;
        attachee.next().await;
        attachee.next().await;
        assessor.next().await;

        h.relay.handle_text(&mut assessor.peer, &h.frame("leave")).await;
        assert_eq!(
            attachee.next().await,
            ServerEvent::PeerLeft {
                room_token: h.room_token.clone(),
                user_id: ASSESSOR,
            }
        );
        assessor.assert_silent().await;
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_bad_request() {
        let h = harness().await;
        let mut attachee = h.connect(ATTACHEE);

        h.relay.handle_text(&mut attachee.peer, r#"{"type":"mute"}"#).await;

        let event = attachee.next().await;
        assert!(matches!(
            event,
            ServerEvent::Error { ref code, room_token: None, .. } if code == "BAD_REQUEST"
        ));
    }

    #[tokio::test]
    async fn test_disconnect_cleans_up_rooms() {
        let h = harness().await;
        let mut attachee = h.connect(ATTACHEE);
        let mut assessor = h.connect(ASSESSOR);

        h.relay.handle_text(&mut attachee.peer, &h.frame("join")).await;
        h.relay.handle_text(&mut assessor.peer, &h.frame("join")).await;
        attachee.next().await;
        attachee.next().await;

        let rooms_left = h.relay.disconnect(&mut assessor.peer).await;
        assert_eq!(rooms_left, 1);
        assert_eq!(attachee.next().await.name(), "peer_left");
        assert_eq!(assessor.peer.joined_rooms().count(), 0);

        // Disconnecting again finds nothing to clean up
        assert_eq!(h.relay.disconnect(&mut assessor.peer).await, 0);
    }

    #[tokio::test]
    async fn test_dropping_one_of_two_connections_leaves_the_room() {
        let h = harness().await;
        let mut attachee = h.connect(ATTACHEE);
        let mut tab1 = h.connect(ASSESSOR);
        let mut tab2 = h.connect(ASSESSOR);

        h.relay.handle_text(&mut attachee.peer, &h.frame("join")).await;
        h.relay.handle_text(&mut tab1.peer, &h.frame("join")).await;
        h.relay.handle_text(&mut tab2.peer, &h.frame("join")).await;
        attachee.drain().await;
        tab2.drain().await;

        let rooms_left = h.relay.disconnect(&mut tab1.peer).await;
        assert_eq!(rooms_left, 1);

        assert_eq!(
            attachee.drain().await,
            vec![ServerEvent::PeerLeft {
                room_token: h.room_token.clone(),
                user_id: ASSESSOR,
            }]
        );
        let snapshot = h
            .relay
            .membership()
            .snapshot(&h.room_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.members, vec![ATTACHEE]);

        // The other tab has to join again before it can signal
        let offer = json!({"type": "relay_offer", "room_token": h.room_token, "payload": {}})
            .to_string();
        h.relay.handle_text(&mut tab2.peer, &offer).await;
        assert_eq!(tab2.next().await, unauthorized(&h.room_token));
        attachee.assert_silent().await;
    }

    #[tokio::test]
    async fn test_disconnect_from_two_rooms_sends_one_peer_left_each() {
        let h = harness().await;
        let other_token = h.other_room().await;
        let mut attachee = h.connect(ATTACHEE);
        let mut other_attachee = h.connect(OTHER_ATTACHEE);
        let mut assessor = h.connect(ASSESSOR);

        h.relay.handle_text(&mut attachee.peer, &h.frame("join")).await;
        h.relay
            .handle_text(&mut other_attachee.peer, &frame("join", &other_token))
            .await;
        h.relay.handle_text(&mut assessor.peer, &h.frame("join")).await;
        h.relay
            .handle_text(&mut assessor.peer, &frame("join", &other_token))
            .await;
        attachee.drain().await;
        other_attachee.drain().await;
        assert_eq!(assessor.peer.joined_rooms().count(), 2);

        let rooms_left = h.relay.disconnect(&mut assessor.peer).await;
        assert_eq!(rooms_left, 2);

        assert_eq!(
            attachee.drain().await,
            vec![ServerEvent::PeerLeft {
                room_token: h.room_token.clone(),
                user_id: ASSESSOR,
            }]
        );
        assert_eq!(
            other_attachee.drain().await,
            vec![ServerEvent::PeerLeft {
                room_token: other_token,
                user_id: ASSESSOR,
            }]
        );
    }

    #[tokio::test]
    async fn test_connection_tracks_joined_rooms() {
        let h = harness().await;
        let mut attachee = h.connect(ATTACHEE);

        h.relay.handle_text(&mut attachee.peer, &h.frame("join")).await;
        attachee.next().await;
        let joined: Vec<_> = attachee.peer.joined_rooms().cloned().collect();
        assert_eq!(joined, vec![h.room_token.clone()]);

        h.relay.handle_text(&mut attachee.peer, &h.frame("leave")).await;
        assert_eq!(attachee.peer.joined_rooms().count(), 0);
    }

    #[tokio::test]
    async fn test_stale_cached_room_falls_back_to_supervisor() {
        let h = harness().await;
        let mut tab1 = h.connect(ATTACHEE);
        let mut tab2 = h.connect(ATTACHEE);
        let mut assessor = h.connect(ASSESSOR);

        h.relay.handle_text(&mut tab1.peer, &h.frame("join")).await;
        h.relay.handle_text(&mut tab2.peer, &h.frame("join")).await;
        tab1.drain().await;

        // Leaving through tab2 empties and closes the room tab1 cached
        h.relay.handle_text(&mut tab2.peer, &h.frame("leave")).await;
        h.relay.handle_text(&mut assessor.peer, &h.frame("join")).await;
        assessor.next().await;

        let offer = json!({"type": "relay_offer", "room_token": h.room_token, "payload": {}})
            .to_string();
        h.relay.handle_text(&mut tab1.peer, &offer).await;
        assert_eq!(tab1.next().await, unauthorized(&h.room_token));
        assert_eq!(tab1.peer.joined_rooms().count(), 0);
        assessor.assert_silent().await;

        // Rejoining caches the new room
        h.relay.handle_text(&mut tab1.peer, &h.frame("join")).await;
        assert_eq!(tab1.next().await.name(), "joined");
        h.relay.handle_text(&mut tab1.peer, &offer).await;
        assert_eq!(assessor.next().await.name(), "peer_joined");
        assert_eq!(assessor.next().await.name(), "relay_offer");
    }

    #[test]
    fn test_rejected_events_are_counted() {
        use crate::observability::metrics::test_support::{block_on, counter, record_locally};

        let recorder = record_locally(|| {
            block_on(async {
                let h = harness().await;
                let mut outsider = h.connect(OUTSIDER);

                h.relay.handle_text(&mut outsider.peer, &h.frame("join")).await;
                h.relay.handle_text(&mut outsider.peer, "not json").await;
                outsider.next().await;
                outsider.next().await;
            });
        });

        assert_eq!(
            counter(
                &recorder,
                "cc_signaling_errors_total",
                &[("event", "join"), ("error_type", "unauthorized")]
            ),
            Some(1)
        );
        assert_eq!(
            counter(
                &recorder,
                "cc_signaling_errors_total",
                &[("event", "unknown"), ("error_type", "bad_request")]
            ),
            Some(1)
        );
        assert_eq!(
            counter(
                &recorder,
                "cc_signaling_events_total",
                &[("event", "join"), ("status", "error")]
            ),
            Some(1)
        );
    }
}
