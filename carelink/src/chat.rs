//! Chat operations over a shared [`Session`].
//!
//! Covers the thread list, pending requests, the user directory, message
//! history, and sending. Every fetch goes through the ack decode path in
//! `carelink-proto` and degrades to an empty result when the server sends
//! something unreadable; the caller never has to branch on response shape.

use serde_json::json;

use carelink_proto::ack::decode_ack;
use carelink_proto::envelope::{self, IvMode};
use carelink_proto::frame::topic;
use carelink_proto::types::{
    self, ChatMessage, ChatRequest, ChatThread, MessageKind, RoleGroup,
};

use crate::error::SessionError;
use crate::session::Session;
use crate::storage;
use crate::transport::EventTransport;

/// Whether a receiver id addresses a real counterpart.
///
/// The backend hands out `"0"` for threads with no counterpart yet, and
/// older rows leave the field empty. Operations on such threads are
/// answered locally without touching the network.
fn is_addressable(receiver_id: &str) -> bool {
    let id = receiver_id.trim();
    !id.is_empty() && id != "0"
}

/// Chat client bound to one session. Cheap to construct; holds a clone of
/// the session handle.
pub struct ChatClient<T: EventTransport> {
    session: Session<T>,
}

impl<T: EventTransport> ChatClient<T> {
    #[must_use]
    pub fn new(session: Session<T>) -> Self {
        Self { session }
    }

    fn user_id(&self) -> String {
        self.session
            .store()
            .get(storage::USER_ID)
            .unwrap_or_default()
    }

    /// Fetch the recent conversation list.
    ///
    /// An unreadable or empty acknowledgement yields an empty list, not an
    /// error; the UI keeps whatever it was showing.
    ///
    /// # Errors
    ///
    /// Only request-level failures: [`SessionError::NotConnected`],
    /// [`SessionError::Timeout`], or a transport error.
    pub async fn fetch_recent_threads(&self) -> Result<Vec<ChatThread>, SessionError> {
        let ack = self
            .session
            .request_ack(
                topic::FETCH_RECENT_THREADS,
                json!({"user_id": self.user_id()}),
            )
            .await?;
        Ok(decode_ack(ack)
            .map(|dec| types::parse_recent_threads(&dec))
            .unwrap_or_default())
    }

    /// Fetch chat requests waiting for this user to accept or reject.
    ///
    /// # Errors
    ///
    /// Request-level failures only; unreadable acks yield an empty list.
    pub async fn fetch_pending_requests(&self) -> Result<Vec<ChatRequest>, SessionError> {
        let ack = self
            .session
            .request_ack(
                topic::FETCH_PENDING_REQUESTS,
                json!({"user_id": self.user_id()}),
            )
            .await?;
        Ok(decode_ack(ack)
            .map(|dec| types::parse_pending_requests(&dec))
            .unwrap_or_default())
    }

    /// Fetch the user directory, grouped by role.
    ///
    /// `for_group_chat` asks the server for the roster eligible for group
    /// conversations rather than direct ones.
    ///
    /// # Errors
    ///
    /// Request-level failures only; unreadable acks yield an empty list.
    pub async fn fetch_users(&self, for_group_chat: bool) -> Result<Vec<RoleGroup>, SessionError> {
        let ack = self
            .session
            .request_ack(
                topic::FETCH_USERS,
                json!({"user_id": self.user_id(), "is_group_chat": for_group_chat}),
            )
            .await?;
        Ok(decode_ack(ack)
            .map(|dec| types::parse_directory(&dec))
            .unwrap_or_default())
    }

    /// Fetch one page of message history for a thread.
    ///
    /// Threads without an addressable counterpart resolve to an empty page
    /// locally; no request is sent.
    ///
    /// # Errors
    ///
    /// Request-level failures only; unreadable acks yield an empty page.
    pub async fn fetch_history(
        &self,
        receiver_id: &str,
        broadcast_id: &str,
        offset: u32,
        is_group: bool,
    ) -> Result<Vec<ChatMessage>, SessionError> {
        if !is_addressable(receiver_id) {
            tracing::debug!(broadcast_id, "no addressable receiver, empty history");
            return Ok(Vec::new());
        }
        let ack = self
            .session
            .request_ack(
                topic::FETCH_HISTORY,
                json!({
                    "user_id": self.user_id(),
                    "receiver_id": receiver_id,
                    "broadcast_id": broadcast_id,
                    "offset": offset,
                    "is_group_chat": is_group,
                }),
            )
            .await?;
        Ok(decode_ack(ack)
            .map(|dec| types::parse_history(&dec))
            .unwrap_or_default())
    }

    /// Send a chat message and return the local echo for the thread view.
    ///
    /// The body is flattened to a single line and encrypted before it goes
    /// on the wire; the echo carries the readable text. Returns `None`
    /// without any network traffic when the thread has no addressable
    /// counterpart.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`], [`SessionError::Timeout`], or a
    /// transport error. An ack that decodes to nothing is not an error;
    /// the echo then carries a locally generated message id.
    pub async fn send_message(
        &self,
        body: &str,
        broadcast_id: &str,
        receiver_id: &str,
        is_group: bool,
        group_name: &str,
    ) -> Result<Option<ChatMessage>, SessionError> {
        if !is_addressable(receiver_id) {
            tracing::debug!(broadcast_id, "no addressable receiver, message dropped");
            return Ok(None);
        }
        // The wire format is line-oriented; embedded newlines break older
        // clients rendering the preview.
        let clean_body = body.replace(['\r', '\n'], " ");
        let user_id = self.user_id();
        let user_name = self
            .session
            .store()
            .get(storage::USER_NAME)
            .unwrap_or_default();

        let ack = self
            .session
            .request_ack(
                topic::SEND_MESSAGE,
                json!({
                    "user_id": user_id,
                    "user_name": user_name,
                    "message": envelope::encrypt(&clean_body, IvMode::Zero),
                    "broadcast_id": broadcast_id,
                    "receiver_id": receiver_id,
                    "is_group_chat": is_group,
                    "group_name": group_name,
                }),
            )
            .await?;

        let mut message_id = decode_ack(ack)
            .map(|dec| types::str_field(&dec, &["message_id", "messageId", "id"]))
            .unwrap_or_default();
        if message_id.is_empty() {
            message_id = uuid::Uuid::now_v7().to_string();
        }

        Ok(Some(ChatMessage {
            message_id,
            chat_id: broadcast_id.to_string(),
            sender_id: user_id,
            sender_name: user_name,
            body: clean_body,
            timestamp: chrono::Utc::now().to_rfc3339(),
            kind: MessageKind::Text,
        }))
    }

    /// Accept a pending chat request, then return the refreshed pending
    /// list. The accept itself is one-way; the refreshed list is how the
    /// caller observes the result.
    ///
    /// # Errors
    ///
    /// Only the refresh can fail; the accept notification is best-effort.
    pub async fn accept_request(
        &self,
        broadcast_id: &str,
        appointment_id: &str,
    ) -> Result<Vec<ChatRequest>, SessionError> {
        self.session
            .fire_and_forget(
                topic::ACCEPT_REQUEST,
                json!({
                    "user_id": self.user_id(),
                    "broadcast_id": broadcast_id,
                    "appointment_id": appointment_id,
                }),
            )
            .await;
        self.fetch_pending_requests().await
    }

    /// Reject a pending chat request, then return the refreshed pending
    /// list.
    ///
    /// # Errors
    ///
    /// Only the refresh can fail; the reject notification is best-effort.
    pub async fn reject_request(
        &self,
        broadcast_id: &str,
        appointment_id: &str,
    ) -> Result<Vec<ChatRequest>, SessionError> {
        self.session
            .fire_and_forget(
                topic::REJECT_REQUEST,
                json!({
                    "user_id": self.user_id(),
                    "broadcast_id": broadcast_id,
                    "appointment_id": appointment_id,
                }),
            )
            .await;
        self.fetch_pending_requests().await
    }
}
