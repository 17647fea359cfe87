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

//! Integration tests for the chat protocol over a joined session.
//!
//! Covers the full flow a thread view exercises: listing recent threads
//! from an encrypted acknowledgement, paging history with encrypted
//! bodies, sending a message and receiving its echo, live delivery of
//! inbound messages, and the chat-request lifecycle.

#[path = "harness.rs"]
mod harness;

use harness::{credentialed_store, new_session, recv_frame, serve_join, wait_for_event};
use serde_json::json;

use carelink::chat::ChatClient;
use carelink::session::SessionEvent;
use carelink::transport::loopback::PeerConn;
use carelink_proto::envelope::{self, IvMode};
use carelink_proto::frame::{EventFrame, topic};

/// Connect, join, and hand back the server connection with the join
/// handshake already consumed.
async fn joined_session() -> (
    ChatClient<carelink::transport::loopback::LoopbackTransport>,
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
    (ChatClient::new(session), events, conn)
}

/// Ack the next request frame with the given payload and return the frame.
async fn ack_next(conn: &PeerConn, payload: serde_json::Value) -> EventFrame {
    let frame = recv_frame(conn).await.unwrap();
    conn.send(EventFrame::ack(frame.ack_id.unwrap(), payload));
    frame
}

#[tokio::test]
async fn recent_threads_arrive_in_an_encrypted_envelope() {
    let (chat, _events, conn) = joined_session().await;

    let reply = json!({
        "code": "100",
        "data": {"recent_chats": [
            {
                "broadcast_id": "b-1",
                "member_name": "Nurse Im",
                "receiver_id": "7",
                "message": envelope::encrypt("last message text", IvMode::Zero),
                "unread_count": 2
            }
        ]}
    });
    let wire = envelope::encrypt(&reply.to_string(), IvMode::Explicit);

    let task = tokio::spawn(async move { chat.fetch_recent_threads().await });
    let frame = ack_next(&conn, json!(wire)).await;
    assert_eq!(frame.event, topic::FETCH_RECENT_THREADS);

    let threads = task.await.unwrap().unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].display_name, "Nurse Im");
    assert_eq!(threads[0].last_message, "last message text");
    assert_eq!(threads[0].unread_count, 2);
}

#[tokio::test]
async fn history_pages_decode_mixed_bodies() {
    let (chat, _events, conn) = joined_session().await;

    let task = tokio::spawn(async move { chat.fetch_history("7", "b-1", 0, false).await });
    let frame = ack_next(
        &conn,
        json!({"result": [
            {"message_id": "m1", "message": envelope::encrypt("encrypted one", IvMode::Zero), "userid": "7"},
            {"message_id": "m2", "message": "already plain", "userid": "42"}
        ]}),
    )
    .await;
    assert_eq!(frame.event, topic::FETCH_HISTORY);
    assert_eq!(frame.payload["receiver_id"], "7");
    assert_eq!(frame.payload["broadcast_id"], "b-1");

    let messages = task.await.unwrap().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].body, "encrypted one");
    assert_eq!(messages[1].body, "already plain");
}

#[tokio::test]
async fn sent_messages_are_encrypted_and_echoed() {
    let (chat, _events, conn) = joined_session().await;

    let task =
        tokio::spawn(async move { chat.send_message("see you soon", "b-1", "7", false, "").await });
    let frame = ack_next(&conn, json!({"message_id": "srv-9"})).await;
    assert_eq!(frame.event, topic::SEND_MESSAGE);

    let wire = frame.payload["message"].as_str().unwrap();
    assert_ne!(wire, "see you soon");
    assert_eq!(envelope::decode_body(wire), "see you soon");

    let echo = task.await.unwrap().unwrap().unwrap();
    assert_eq!(echo.message_id, "srv-9");
    assert_eq!(echo.body, "see you soon");
    assert_eq!(echo.sender_name, "Dr. Osei");
}

#[tokio::test]
async fn live_deliveries_surface_as_events() {
    let (_chat, mut events, conn) = joined_session().await;

    conn.send(EventFrame::notify(
        topic::MESSAGE_RECEIVED,
        json!({
            "message_id": "m-live",
            "message": envelope::encrypt("incoming text", IvMode::Zero),
            "userid": "7",
            "member_name": "Nurse Im"
        }),
    ));

    match wait_for_event(&mut events, |e| matches!(e, SessionEvent::MessageReceived(_))).await {
        SessionEvent::MessageReceived(msg) => {
            assert_eq!(msg.message_id, "m-live");
            assert_eq!(msg.body, "incoming text");
            assert_eq!(msg.sender_name, "Nurse Im");
        }
        other => panic!("expected MessageReceived, got {other:?}"),
    }
}

#[tokio::test]
async fn chat_request_lifecycle_notifies_and_refreshes() {
    let (chat, mut events, conn) = joined_session().await;

    // A new request arrives as a push-style notification.
    conn.send(EventFrame::notify(topic::CHAT_REQUEST_CREATED, json!({})));
    wait_for_event(&mut events, |e| *e == SessionEvent::ChatRequestCreated).await;

    // Accepting fires the one-way notification, then refreshes the list.
    let task = tokio::spawn(async move { chat.accept_request("b-2", "ap-1").await });

    let accept = recv_frame(&conn).await.unwrap();
    assert_eq!(accept.event, topic::ACCEPT_REQUEST);
    assert_eq!(accept.ack_id, None);
    assert_eq!(accept.payload["broadcast_id"], "b-2");
    assert_eq!(accept.payload["appointment_id"], "ap-1");

    ack_next(&conn, json!({"code": 100, "data": {"chat_requests": []}})).await;
    assert!(task.await.unwrap().unwrap().is_empty());
}

#[tokio::test]
async fn request_accepted_notification_surfaces_as_event() {
    let (_chat, mut events, conn) = joined_session().await;
    conn.send(EventFrame::notify(topic::CHAT_REQUEST_ACCEPTED, json!({})));
    wait_for_event(&mut events, |e| *e == SessionEvent::ChatRequestAccepted).await;
}
