//! Signaling WebSocket integration tests.
//!
//! Spawns the real server and drives it with WebSocket clients, covering the
//! full join / relay / end-call flow between an attachee (7) and an assessor
//! (3), plus an unrelated user (9).

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use cc_service::errors::NOT_AUTHORIZED_MESSAGE;
use cc_service::models::{NewSession, SessionStatus};
use cc_service::registry::SessionRegistry;
use cc_test_utils::{test_registry, TestCcServer, TestWsClient};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use common::types::{RoomToken, UserId};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const QUIET: Duration = Duration::from_millis(300);

/// Schedule a 7/3 session and allocate its room token.
async fn scheduled_room(server: &TestCcServer) -> Result<RoomToken> {
    let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
    let session = server
        .registry()
        .create(NewSession {
            attachee_id: UserId(7),
            assessor_id: UserId(3),
            title: "Week 4 review".to_string(),
            description: None,
            start_time: start,
            end_time: start + ChronoDuration::minutes(60),
        })
        .await?;
    Ok(server.registry().assign_room_token(session.session_id).await?)
}

async fn session_status(server: &TestCcServer, room: &RoomToken) -> Result<SessionStatus> {
    Ok(server.registry().find_by_room_token(room).await?.status)
}

async fn connect(server: &TestCcServer, user_id: i64, role: &str) -> Result<TestWsClient> {
    TestWsClient::connect(server, &server.token_for(user_id, role)).await
}

#[tokio::test]
async fn test_handshake_requires_valid_token() -> Result<()> {
    let server = TestCcServer::spawn_in_memory(test_registry()).await?;

    let status = TestWsClient::rejected_status(&server, None).await?;
    assert_eq!(status.map(|s| s.as_u16()), Some(401));

    let status = TestWsClient::rejected_status(&server, Some("not-a-jwt")).await?;
    assert_eq!(status.map(|s| s.as_u16()), Some(401));

    let valid = server.token_for(7, "attachee");
    let status = TestWsClient::rejected_status(&server, Some(&valid)).await?;
    assert!(status.is_none());

    Ok(())
}

#[tokio::test]
async fn test_query_token_is_accepted() -> Result<()> {
    let server = TestCcServer::spawn_in_memory(test_registry()).await?;
    let room = scheduled_room(&server).await?;

    let mut client =
        TestWsClient::connect_with_query_token(&server, &server.token_for(7, "attachee")).await?;
    client.join(room.as_str()).await?;

    let joined = client.next_event().await?;
    assert_eq!(joined["type"], "joined");

    Ok(())
}

#[tokio::test]
async fn test_full_call_between_participants() -> Result<()> {
    let server = TestCcServer::spawn_in_memory(test_registry()).await?;
    let room = scheduled_room(&server).await?;

    // Attachee joins first
    let mut attachee = connect(&server, 7, "attachee").await?;
    attachee.join(room.as_str()).await?;
    let joined = attachee.next_event().await?;
    assert_eq!(joined["type"], "joined");
    assert_eq!(joined["room_token"], room.as_str());
    assert_eq!(joined["current_members"], json!([7]));
    assert_eq!(joined["peer_info"]["id"], 3);
    assert_eq!(joined["peer_info"]["role"], "assessor");
    assert_eq!(joined["peer_info"]["username"], "assessor3");
    assert_eq!(joined["session_title"], "Week 4 review");

    // Assessor joins; attachee is told
    let mut assessor = connect(&server, 3, "assessor").await?;
    assessor.join(room.as_str()).await?;
    let joined = assessor.next_event().await?;
    assert_eq!(joined["type"], "joined");
    assert_eq!(joined["current_members"], json!([7, 3]));
    assert_eq!(joined["peer_info"]["id"], 7);

    let peer_joined = attachee.next_event().await?;
    assert_eq!(peer_joined["type"], "peer_joined");
    assert_eq!(peer_joined["user_id"], 3);

    // Offer / answer / candidate reach only the other side, payload untouched
    let offer = json!({"sdp": "v=0 offer", "type": "offer"});
    assessor
        .send_json(&json!({"type": "relay_offer", "room_token": room.as_str(), "payload": offer}))
        .await?;
    let received = attachee.next_event().await?;
    assert_eq!(received["type"], "relay_offer");
    assert_eq!(received["from"], 3);
    assert_eq!(received["payload"], offer);
    assessor.assert_no_event(QUIET).await;

    let answer = json!({"sdp": "v=0 answer", "type": "answer"});
    attachee
        .send_json(&json!({"type": "relay_answer", "room_token": room.as_str(), "payload": answer}))
        .await?;
    let received = assessor.next_event().await?;
    assert_eq!(received["type"], "relay_answer");
    assert_eq!(received["payload"], answer);

    let candidate = json!({"candidate": "candidate:1 1 UDP 2122 10.0.0.1 5000 typ host"});
    attachee
        .send_json(&json!({
            "type": "relay_candidate",
            "room_token": room.as_str(),
            "payload": candidate
        }))
        .await?;
    let received = assessor.next_event().await?;
    assert_eq!(received["type"], "relay_candidate");
    assert_eq!(received["from"], 7);

    // End call: both sides notified, session completed once
    assessor
        .send_json(&json!({"type": "end_call", "room_token": room.as_str()}))
        .await?;
    let ended = attachee.next_event().await?;
    assert_eq!(ended["type"], "call_ended");
    assert_eq!(ended["user_id"], 3);
    let ended = assessor.next_event().await?;
    assert_eq!(ended["type"], "call_ended");

    // The session update happens after the fan-out
    tokio::time::sleep(QUIET).await;
    let completed = server.registry().find_by_room_token(&room).await?;
    assert_eq!(completed.status, SessionStatus::Completed);

    // A second end_call is harmless
    attachee
        .send_json(&json!({"type": "end_call", "room_token": room.as_str()}))
        .await?;
    assessor.next_event_of_type("call_ended").await?;
    tokio::time::sleep(QUIET).await;
    let again = server.registry().find_by_room_token(&room).await?;
    assert_eq!(again, completed);

    Ok(())
}

#[tokio::test]
async fn test_outsider_cannot_join_and_cannot_tell_why() -> Result<()> {
    let server = TestCcServer::spawn_in_memory(test_registry()).await?;
    let room = scheduled_room(&server).await?;

    let mut attachee = connect(&server, 7, "attachee").await?;
    attachee.join(room.as_str()).await?;
    attachee.next_event().await?;

    let mut outsider = connect(&server, 9, "attachee").await?;
    outsider.join(room.as_str()).await?;
    let rejected = outsider.next_event().await?;
    assert_eq!(rejected["type"], "error");
    assert_eq!(rejected["code"], "UNAUTHORIZED");
    assert_eq!(rejected["message"], NOT_AUTHORIZED_MESSAGE);

    outsider.join("r-does-not-exist").await?;
    let missing = outsider.next_event().await?;
    assert_eq!(missing["code"], rejected["code"]);
    assert_eq!(missing["message"], rejected["message"]);

    // Relaying into someone else's room is rejected the same way
    outsider
        .send_json(&json!({"type": "relay_offer", "room_token": room.as_str(), "payload": {}}))
        .await?;
    let relay_rejected = outsider.next_event().await?;
    assert_eq!(relay_rejected["code"], "UNAUTHORIZED");

    // The member never heard about any of it
    attachee.assert_no_event(QUIET).await;

    let snapshot = server.membership().snapshot(&room).await?.unwrap();
    assert_eq!(snapshot.members, vec![UserId(7)]);

    Ok(())
}

#[tokio::test]
async fn test_disconnect_notifies_peer_and_allows_rejoin() -> Result<()> {
    let server = TestCcServer::spawn_in_memory(test_registry()).await?;
    let room = scheduled_room(&server).await?;

    let mut attachee = connect(&server, 7, "attachee").await?;
    attachee.join(room.as_str()).await?;
    attachee.next_event().await?;

    let mut assessor = connect(&server, 3, "assessor").await?;
    assessor.join(room.as_str()).await?;
    assessor.next_event().await?;
    attachee.next_event_of_type("peer_joined").await?;

    assessor.close().await?;

    let left = attachee.next_event().await?;
    assert_eq!(left["type"], "peer_left");
    assert_eq!(left["user_id"], 3);

    // Reconnect and rejoin the same room
    let mut assessor = connect(&server, 3, "assessor").await?;
    assessor.join(room.as_str()).await?;
    let joined = assessor.next_event().await?;
    assert_eq!(joined["current_members"], json!([7, 3]));
    attachee.next_event_of_type("peer_joined").await?;

    // Leaving without ending the call does not complete the session
    assert_eq!(session_status(&server, &room).await?, SessionStatus::Scheduled);

    Ok(())
}

#[tokio::test]
async fn test_closing_one_tab_removes_the_user() -> Result<()> {
    let server = TestCcServer::spawn_in_memory(test_registry()).await?;
    let room = scheduled_room(&server).await?;

    let mut attachee = connect(&server, 7, "attachee").await?;
    attachee.join(room.as_str()).await?;
    attachee.next_event().await?;

    let mut tab1 = connect(&server, 3, "assessor").await?;
    tab1.join(room.as_str()).await?;
    tab1.next_event().await?;
    attachee.next_event_of_type("peer_joined").await?;

    let mut tab2 = connect(&server, 3, "assessor").await?;
    tab2.join(room.as_str()).await?;
    tab2.next_event().await?;
    attachee.next_event_of_type("peer_joined").await?;

    tab1.close().await?;

    let left = attachee.next_event().await?;
    assert_eq!(left["type"], "peer_left");
    assert_eq!(left["user_id"], 3);
    attachee.assert_no_event(QUIET).await;

    let snapshot = server.membership().snapshot(&room).await?.unwrap();
    assert_eq!(snapshot.members, vec![UserId(7)]);

    // The surviving tab rejoins before it can signal again
    tab2.join(room.as_str()).await?;
    let joined = tab2.next_event().await?;
    assert_eq!(joined["current_members"], json!([7, 3]));
    attachee.next_event_of_type("peer_joined").await?;

    Ok(())
}

#[tokio::test]
async fn test_explicit_leave_then_last_member_leaves() -> Result<()> {
    let server = TestCcServer::spawn_in_memory(test_registry()).await?;
    let room = scheduled_room(&server).await?;

    let mut attachee = connect(&server, 7, "attachee").await?;
    attachee.join(room.as_str()).await?;
    attachee.next_event().await?;

    let mut assessor = connect(&server, 3, "assessor").await?;
    assessor.join(room.as_str()).await?;
    assessor.next_event().await?;
    attachee.next_event_of_type("peer_joined").await?;

    assessor
        .send_json(&json!({"type": "leave", "room_token": room.as_str()}))
        .await?;
    let left = attachee.next_event().await?;
    assert_eq!(left["type"], "peer_left");
    // Leave is silent for the sender
    assessor.assert_no_event(QUIET).await;

    attachee
        .send_json(&json!({"type": "leave", "room_token": room.as_str()}))
        .await?;
    tokio::time::sleep(QUIET).await;
    assert!(server.membership().snapshot(&room).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_malformed_frames_get_bad_request() -> Result<()> {
    let server = TestCcServer::spawn_in_memory(test_registry()).await?;
    let mut client = connect(&server, 7, "attachee").await?;

    client.send_text("{not json").await?;
    let error = client.next_event().await?;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "BAD_REQUEST");

    client
        .send_json(&json!({"type": "teleport", "room_token": "r-1"}))
        .await?;
    let error = client.next_event().await?;
    assert_eq!(error["code"], "BAD_REQUEST");

    // The connection survives bad input
    client.join("r-unknown").await?;
    let error: Value = client.next_event().await?;
    assert_eq!(error["code"], "UNAUTHORIZED");
    assert_eq!(error["room_token"], "r-unknown");

    Ok(())
}

#[tokio::test]
async fn test_join_into_finished_session_still_relays() -> Result<()> {
    let server = TestCcServer::spawn_in_memory(test_registry()).await?;
    let room = scheduled_room(&server).await?;
    let session = server.registry().find_by_room_token(&room).await?;
    server
        .registry()
        .transition(session.session_id, SessionStatus::Cancelled)
        .await?;

    // Membership depends on the authorized pair, not on status
    let mut attachee = connect(&server, 7, "attachee").await?;
    attachee.join(room.as_str()).await?;
    assert_eq!(attachee.next_event().await?["type"], "joined");

    attachee
        .send_json(&json!({"type": "end_call", "room_token": room.as_str()}))
        .await?;
    attachee.next_event_of_type("call_ended").await?;
    tokio::time::sleep(QUIET).await;

    // Cancelled stays cancelled
    assert_eq!(session_status(&server, &room).await?, SessionStatus::Cancelled);

    Ok(())
}

#[tokio::test]
async fn test_silent_client_is_dropped_after_idle_timeout() -> Result<()> {
    let server = TestCcServer::spawn_with(
        Arc::new(test_registry()),
        None,
        &[
            ("WS_PING_INTERVAL_SECONDS", "1"),
            ("WS_IDLE_TIMEOUT_SECONDS", "2"),
        ],
    )
    .await?;
    let room = scheduled_room(&server).await?;

    let mut attachee = connect(&server, 7, "attachee").await?;
    attachee.join(room.as_str()).await?;
    attachee.next_event().await?;

    // The assessor joins, then stops reading: no pongs, no frames
    let mut assessor = connect(&server, 3, "assessor").await?;
    assessor.join(room.as_str()).await?;
    assessor.next_event().await?;
    attachee.next_event_of_type("peer_joined").await?;

    let left = attachee.next_event_within(Duration::from_secs(6)).await?;
    assert_eq!(left["type"], "peer_left");
    assert_eq!(left["user_id"], 3);

    drop(assessor);
    Ok(())
}
