//! Event frames for the `CareLink` signaling protocol.
//!
//! Every message on the wire is a JSON text frame carrying an event topic,
//! an arbitrary JSON payload, and an optional acknowledgement correlation
//! id. Requests that expect a reply set `ack_id`; the server answers with
//! an [`topic::ACK`] frame echoing the same id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event topics understood by the backend.
pub mod topic {
    /// Announce identity after connecting; the server binds the connection
    /// to the session on acknowledgement.
    pub const IDENTIFY: &str = "identify";
    /// Fetch the user directory grouped by role.
    pub const FETCH_USERS: &str = "fetch-users";
    /// Fetch the recent conversation list.
    pub const FETCH_RECENT_THREADS: &str = "fetch-recent-threads";
    /// Fetch pending chat requests addressed to this user.
    pub const FETCH_PENDING_REQUESTS: &str = "fetch-pending-requests";
    /// Fetch message history for one thread.
    pub const FETCH_HISTORY: &str = "fetch-history";
    /// Send a chat message.
    pub const SEND_MESSAGE: &str = "send-message";
    /// Accept a pending chat request.
    pub const ACCEPT_REQUEST: &str = "accept-request";
    /// Reject a pending chat request.
    pub const REJECT_REQUEST: &str = "reject-request";
    /// Start an outbound call with a set of participants.
    pub const CREATE_CALL: &str = "create-call";
    /// Join a call room that already exists.
    pub const JOIN_EXISTING_CALL: &str = "join-existing-call";
    /// Tell the server an incoming call was answered.
    pub const ACCEPT_CALL: &str = "accept-call";
    /// Report device platform details after answering a call.
    pub const DEVICE_DETAILS: &str = "device-details";
    /// Announce presence state for this session.
    pub const PRESENCE_UPDATE: &str = "presence-update";

    /// Server-initiated session termination.
    pub const LOGOUT: &str = "logout";
    /// Incoming call invitation.
    pub const CALL_INVITE: &str = "call-invite";
    /// A new chat request was created for this user.
    pub const CHAT_REQUEST_CREATED: &str = "chat-request-created";
    /// A chat request this user sent was accepted.
    pub const CHAT_REQUEST_ACCEPTED: &str = "chat-request-accepted";
    /// A chat message was delivered to one of this user's threads.
    pub const MESSAGE_RECEIVED: &str = "message-received";

    /// Reply frame correlating to a request's `ack_id`.
    pub const ACK: &str = "ack";
}

/// A single frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    /// Event topic, one of the [`topic`] constants.
    pub event: String,
    /// Topic-specific payload. May be any JSON value, including null.
    #[serde(default)]
    pub payload: Value,
    /// Correlation id for request/ack pairs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<u64>,
}

impl EventFrame {
    /// A fire-and-forget frame with no correlation id.
    pub fn notify(event: &str, payload: Value) -> Self {
        Self {
            event: event.to_string(),
            payload,
            ack_id: None,
        }
    }

    /// A request frame expecting an ack with the same `ack_id`.
    pub fn request(event: &str, payload: Value, ack_id: u64) -> Self {
        Self {
            event: event.to_string(),
            payload,
            ack_id: Some(ack_id),
        }
    }

    /// An ack frame answering the request with id `ack_id`.
    pub fn ack(ack_id: u64, payload: Value) -> Self {
        Self {
            event: topic::ACK.to_string(),
            payload,
            ack_id: Some(ack_id),
        }
    }

    /// Whether this frame is an acknowledgement reply.
    pub fn is_ack(&self) -> bool {
        self.event == topic::ACK
    }
}

/// Error type for frame encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Frame text is not valid JSON or lacks an event topic.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Encodes an [`EventFrame`] into JSON frame text.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the payload cannot be serialized.
pub fn encode(frame: &EventFrame) -> Result<String, CodecError> {
    serde_json::to_string(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes an [`EventFrame`] from JSON frame text.
///
/// # Errors
///
/// Returns `CodecError::InvalidFrame` if the text is not a frame-shaped
/// JSON object.
pub fn decode(text: &str) -> Result<EventFrame, CodecError> {
    let frame: EventFrame =
        serde_json::from_str(text).map_err(|e| CodecError::InvalidFrame(e.to_string()))?;
    if frame.event.is_empty() {
        return Err(CodecError::InvalidFrame("empty event topic".into()));
    }
    Ok(frame)
}

/// Kinds of chat-related inbound events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatEventKind {
    /// [`topic::CHAT_REQUEST_CREATED`]
    RequestCreated,
    /// [`topic::CHAT_REQUEST_ACCEPTED`]
    RequestAccepted,
    /// [`topic::MESSAGE_RECEIVED`]
    MessageReceived,
}

/// Routing classification for inbound topics.
///
/// This is the single source of truth for inbound routing; the session's
/// dispatch loop is its only consumer, so a topic can never end up with
/// two competing handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
    /// An incoming call invitation.
    CallInvite,
    /// A chat protocol event.
    Chat(ChatEventKind),
    /// Server-initiated logout.
    Logout,
    /// Anything else; logged and dropped.
    Unknown,
}

impl InboundKind {
    /// Classify an inbound event topic.
    pub fn classify(event: &str) -> Self {
        match event {
            topic::CALL_INVITE => Self::CallInvite,
            topic::CHAT_REQUEST_CREATED => Self::Chat(ChatEventKind::RequestCreated),
            topic::CHAT_REQUEST_ACCEPTED => Self::Chat(ChatEventKind::RequestAccepted),
            topic::MESSAGE_RECEIVED => Self::Chat(ChatEventKind::MessageReceived),
            topic::LOGOUT => Self::Logout,
            _ => Self::Unknown,
        }
    }
}
