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

//! Integration tests for call signaling over a joined session.
//!
//! Verifies that invites delivered on the socket and the push channel
//! share one deduplication table, that answering a call notifies the
//! server and hands off the conference details, that declining stays
//! local, and that outbound call creation and room joins follow the
//! request/ack protocol.

#[path = "harness.rs"]
mod harness;

use harness::{
    credentialed_store, expect_no_event, expect_no_frame, new_session, recv_frame, serve_join,
    wait_for_event,
};
use serde_json::json;

use carelink::calls::{CallController, InviteSource};
use carelink::error::SessionError;
use carelink::session::{Session, SessionEvent};
use carelink::transport::loopback::{LoopbackTransport, PeerConn};
use carelink_proto::envelope::{self, IvMode};
use carelink_proto::frame::{EventFrame, topic};

async fn joined_session() -> (
    Session<LoopbackTransport>,
    tokio::sync::mpsc::Receiver<SessionEvent>,
    PeerConn,
) {
    let (session, mut events, server) = new_session(credentialed_store());
    let server_task = tokio::spawn(async move {
        let conn = server.accept().await.unwrap();
        serve_join(&conn, json!([])).await;
        conn
    });
    session.connect().await.unwrap();
    wait_for_event(&mut events, |e| *e == SessionEvent::Joined).await;
    let conn = server_task.await.unwrap();
    (session, events, conn)
}

#[tokio::test]
async fn socket_invite_is_presented_once() {
    let (session, mut events, conn) = joined_session().await;

    let payload = json!({
        "alert_type": "DirectCall",
        "broadcast_id": "room-1",
        "caller_name": "Nurse Im"
    });
    conn.send(EventFrame::notify(topic::CALL_INVITE, payload.clone()));

    match wait_for_event(&mut events, |e| matches!(e, SessionEvent::IncomingCall(_))).await {
        SessionEvent::IncomingCall(invite) => {
            assert_eq!(invite.broadcast_id, "room-1");
            assert_eq!(invite.caller_name, "Nurse Im");
            assert_eq!(invite.source, InviteSource::Socket);
        }
        other => panic!("expected IncomingCall, got {other:?}"),
    }

    // The same call arriving over push is a duplicate.
    session.handle_push_payload(&payload);
    expect_no_event(&mut events).await;
}

#[tokio::test]
async fn push_invite_uses_the_nested_payload_shape() {
    let (session, mut events, _conn) = joined_session().await;

    session.handle_push_payload(&json!({
        "aps": {"alert": {"broadcast_id": "room-2"}},
        "sender_name": "Dr. Mensah"
    }));

    match wait_for_event(&mut events, |e| matches!(e, SessionEvent::IncomingCall(_))).await {
        SessionEvent::IncomingCall(invite) => {
            assert_eq!(invite.broadcast_id, "room-2");
            assert_eq!(invite.caller_name, "Dr. Mensah");
            assert_eq!(invite.source, InviteSource::Push);
        }
        other => panic!("expected IncomingCall, got {other:?}"),
    }
}

#[tokio::test]
async fn new_message_alert_marks_threads_stale() {
    let (_session, mut events, conn) = joined_session().await;
    conn.send(EventFrame::notify(
        topic::CALL_INVITE,
        json!({"alert_type": "NewMessage"}),
    ));
    wait_for_event(&mut events, |e| *e == SessionEvent::RecentThreadsStale).await;
}

#[tokio::test]
async fn accepting_notifies_the_server_and_hands_off() {
    let (session, mut events, conn) = joined_session().await;

    conn.send(EventFrame::notify(
        topic::CALL_INVITE,
        json!({"broadcast_id": "room-3", "caller_name": "Nurse Im"}),
    ));
    wait_for_event(&mut events, |e| matches!(e, SessionEvent::IncomingCall(_))).await;

    let controller = CallController::new(session);
    let handoff = controller.accept("room-3").await.unwrap();
    assert_eq!(handoff.room_id, "room-3");
    assert_eq!(handoff.server_url.as_deref(), Some("https://meet.example"));

    let accept = recv_frame(&conn).await.unwrap();
    assert_eq!(accept.event, topic::ACCEPT_CALL);
    assert_eq!(accept.payload["user_id"], "42");
    assert_eq!(accept.payload["broadcast_id"], "room-3");

    let details = recv_frame(&conn).await.unwrap();
    assert_eq!(details.event, topic::DEVICE_DETAILS);
    assert_eq!(details.payload["broadcast_id"], "room-3");
    assert!(details.payload["device_type"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(details.payload["app_version"].as_str().is_some_and(|s| !s.is_empty()));
}

#[tokio::test]
async fn declining_stays_local() {
    let (session, mut events, conn) = joined_session().await;

    conn.send(EventFrame::notify(
        topic::CALL_INVITE,
        json!({"broadcast_id": "room-4"}),
    ));
    wait_for_event(&mut events, |e| matches!(e, SessionEvent::IncomingCall(_))).await;

    let controller = CallController::new(session.clone());
    controller.decline("room-4");
    expect_no_frame(&conn).await;

    // The declined call stays suppressed within the window.
    session.handle_push_payload(&json!({"broadcast_id": "room-4"}));
    expect_no_event(&mut events).await;
}

#[tokio::test]
async fn create_call_returns_the_room_from_an_encrypted_ack() {
    let (session, _events, conn) = joined_session().await;
    let controller = CallController::new(session);

    let task = tokio::spawn(async move {
        controller
            .create_call("Dr. Osei", &["7".to_string(), "9".to_string()])
            .await
    });

    let frame = recv_frame(&conn).await.unwrap();
    assert_eq!(frame.event, topic::CREATE_CALL);
    assert_eq!(frame.payload["user_id"], "42");
    assert_eq!(frame.payload["organization_id"], "org-7");
    assert_eq!(frame.payload["participants"], json!(["7", "9"]));

    let reply = envelope::encrypt(r#"{"broadcast_id":"room-new"}"#, IvMode::Explicit);
    conn.send(EventFrame::ack(frame.ack_id.unwrap(), json!(reply)));

    assert_eq!(task.await.unwrap().unwrap(), "room-new");
}

#[tokio::test]
async fn create_call_accepts_a_plain_object_ack() {
    let (session, _events, conn) = joined_session().await;
    let controller = CallController::new(session);

    let task = tokio::spawn(async move {
        controller.create_call("Dr. Osei", &["7".to_string()]).await
    });

    let frame = recv_frame(&conn).await.unwrap();
    assert_eq!(frame.event, topic::CREATE_CALL);
    conn.send(EventFrame::ack(frame.ack_id.unwrap(), json!({"broadcast_id": "42"})));

    assert_eq!(task.await.unwrap().unwrap(), "42");
}

#[tokio::test]
async fn create_call_without_a_room_in_the_ack_fails() {
    let (session, _events, conn) = joined_session().await;
    let controller = CallController::new(session);

    let task = tokio::spawn(async move {
        controller.create_call("Dr. Osei", &["7".to_string()]).await
    });
    let frame = recv_frame(&conn).await.unwrap();
    conn.send(EventFrame::ack(frame.ack_id.unwrap(), json!({"code": "500"})));

    assert!(matches!(
        task.await.unwrap(),
        Err(SessionError::CallCreationFailed)
    ));
}

#[tokio::test]
async fn join_existing_maps_status_codes() {
    let (session, _events, conn) = joined_session().await;
    let controller = CallController::new(session.clone());

    let task = tokio::spawn(async move { controller.join_existing("room-5").await });
    let frame = recv_frame(&conn).await.unwrap();
    assert_eq!(frame.event, topic::JOIN_EXISTING_CALL);
    assert_eq!(frame.payload["broadcast_id"], "room-5");
    conn.send(EventFrame::ack(frame.ack_id.unwrap(), json!({"code": 200})));
    task.await.unwrap().unwrap();

    // A non-200 status surfaces as a server error.
    let controller = CallController::new(session);
    let task = tokio::spawn(async move { controller.join_existing("room-6").await });
    let frame = recv_frame(&conn).await.unwrap();
    conn.send(EventFrame::ack(
        frame.ack_id.unwrap(),
        json!({"code": 403, "message": "room is closed"}),
    ));
    match task.await.unwrap() {
        Err(SessionError::ServerError { code, message }) => {
            assert_eq!(code, "403");
            assert_eq!(message, "room is closed");
        }
        other => panic!("expected ServerError, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_arguments_are_rejected_locally() {
    let (session, _events, conn) = joined_session().await;
    let controller = CallController::new(session);

    assert!(matches!(
        controller.accept("").await,
        Err(SessionError::InvalidArgument(_))
    ));
    assert!(matches!(
        controller.create_call("Dr. Osei", &[]).await,
        Err(SessionError::InvalidArgument(_))
    ));
    assert!(matches!(
        controller.join_existing("  ").await,
        Err(SessionError::InvalidArgument(_))
    ));
    expect_no_frame(&conn).await;
}
