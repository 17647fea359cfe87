// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::match_same_arms,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for the connect-and-join handshake.
//!
//! Drives a real [`carelink::session::Session`] over the loopback transport
//! against a scripted backend and verifies:
//! - the identify frame carries the stored credentials
//! - a successful join triggers the pending-requests refresh and the
//!   presence announcement
//! - an unanswered identify leaves the session connected, not joined
//! - credentials stored after connect can join via an explicit call

#[path = "harness.rs"]
mod harness;

use harness::{
    credentialed_store, expect_no_frame, new_session, next_event, recv_frame, serve_join,
    wait_for_event,
};
use serde_json::json;
use std::sync::Arc;

use carelink::session::{ConnectionState, SessionEvent};
use carelink::storage::{self, CredentialStore, MemoryStore};
use carelink_proto::frame::{EventFrame, topic};

#[tokio::test]
async fn join_handshake_carries_stored_credentials() {
    let (session, mut events, server) = new_session(credentialed_store());

    let server_task = tokio::spawn(async move {
        let conn = server.accept().await.unwrap();

        let identify = recv_frame(&conn).await.unwrap();
        assert_eq!(identify.event, topic::IDENTIFY);
        assert_eq!(identify.payload["user_id"], "42");
        assert_eq!(identify.payload["session_id"], "sess-1");
        assert_eq!(identify.payload["user_type"], "Doctor");
        assert_eq!(identify.payload["is_admin"], 0);
        conn.send(EventFrame::ack(identify.ack_id.unwrap(), json!({"code": "100"})));

        let refresh = recv_frame(&conn).await.unwrap();
        assert_eq!(refresh.event, topic::FETCH_PENDING_REQUESTS);
        conn.send(EventFrame::ack(
            refresh.ack_id.unwrap(),
            json!({"code": "100", "data": {"chat_requests": [
                {"broadcast_id": "b-1", "userid": "7", "member_name": "Nurse Im"}
            ]}}),
        ));

        let presence = recv_frame(&conn).await.unwrap();
        assert_eq!(presence.event, topic::PRESENCE_UPDATE);
        assert_eq!(presence.payload["user_id"], "42");
        assert_eq!(presence.payload["online"], true);
        conn
    });

    session.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
    assert_eq!(next_event(&mut events).await, SessionEvent::Joined);
    assert_eq!(session.state(), ConnectionState::Joined);

    match wait_for_event(&mut events, |e| matches!(e, SessionEvent::ChatRequests(_))).await {
        SessionEvent::ChatRequests(requests) => {
            assert_eq!(requests.len(), 1);
            assert_eq!(requests[0].requester_name, "Nurse Im");
        }
        other => panic!("expected ChatRequests, got {other:?}"),
    }

    let _conn = server_task.await.unwrap();
}

#[tokio::test]
async fn admin_and_role_flags_reach_the_identify_frame() {
    let store = credentialed_store();
    store.set(storage::USER_TYPE, "Nurse");
    store.set(storage::ADMIN, "1");
    let (session, _events, server) = new_session(store);

    let server_task = tokio::spawn(async move {
        let conn = server.accept().await.unwrap();
        let identify = recv_frame(&conn).await.unwrap();
        assert_eq!(identify.payload["user_type"], "Nurse");
        assert_eq!(identify.payload["is_admin"], 1);
        conn.send(EventFrame::ack(identify.ack_id.unwrap(), json!({"code": "100"})));
        serve_join_tail(&conn).await;
        conn
    });

    session.connect().await.unwrap();
    let _conn = server_task.await.unwrap();
}

/// Answer the post-join refresh and wait for presence, for tests that
/// already handled the identify frame themselves.
async fn serve_join_tail(conn: &carelink::transport::loopback::PeerConn) {
    loop {
        let frame = recv_frame(conn).await.unwrap();
        if let Some(id) = frame.ack_id {
            conn.send(EventFrame::ack(
                id,
                json!({"code": "100", "data": {"chat_requests": []}}),
            ));
        }
        if frame.event == topic::PRESENCE_UPDATE {
            return;
        }
    }
}

#[tokio::test]
async fn unanswered_identify_leaves_the_session_connected() {
    let (session, mut events, server) = new_session(credentialed_store());

    let server_task = tokio::spawn(async move {
        let conn = server.accept().await.unwrap();
        // Swallow the identify frame; never ack it.
        let identify = recv_frame(&conn).await.unwrap();
        assert_eq!(identify.event, topic::IDENTIFY);
        conn
    });

    session.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
    assert_eq!(session.state(), ConnectionState::Connected);

    // The join timed out; no Joined event may follow.
    let got = tokio::time::timeout(std::time::Duration::from_millis(100), events.recv()).await;
    assert!(got.is_err(), "expected no events, got {got:?}");
    let _conn = server_task.await.unwrap();
}

#[tokio::test]
async fn credentials_stored_after_connect_can_join_explicitly() {
    let store = Arc::new(MemoryStore::new());
    let (session, mut events, server) = new_session(store.clone());

    session.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
    let conn = server.accept().await.unwrap();

    // Without credentials nothing is sent.
    expect_no_frame(&conn).await;
    assert_eq!(session.state(), ConnectionState::Connected);

    store.set(storage::USER_ID, "42");
    store.set(storage::SESSION_ID, "sess-1");

    let server_task = tokio::spawn(async move {
        serve_join(&conn, json!([])).await;
        conn
    });
    session.join_if_credentialed().await;

    assert_eq!(next_event(&mut events).await, SessionEvent::Joined);
    assert_eq!(session.state(), ConnectionState::Joined);
    let _conn = server_task.await.unwrap();
}
