//! Call signaling: invite routing, deduplication, and call control.
//!
//! The same call regularly arrives twice, once over the socket and once
//! over a push channel, so every invite passes through the
//! [`CallRegistry`] before anything is shown to the user. The
//! [`CallController`] carries the user-driven operations: answer, decline,
//! start a call, join an existing room.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use carelink_proto::ack::decode_ack;
use carelink_proto::frame::topic;
use carelink_proto::types;

use crate::error::SessionError;
use crate::session::Session;
use crate::storage;
use crate::transport::EventTransport;

/// Where an invite payload arrived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteSource {
    /// Delivered on the signaling socket.
    Socket,
    /// Delivered by the platform push channel.
    Push,
}

/// An incoming call that passed deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInvite {
    /// Room id; doubles as the conference room name.
    pub broadcast_id: String,
    /// Display name for the prompt; never empty.
    pub caller_name: String,
    pub source: InviteSource,
}

/// Everything the embedder needs to start the conference client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConferenceHandoff {
    pub room_id: String,
    /// Conference server base URL from storage, when one is configured.
    pub server_url: Option<String>,
}

/// What the dispatcher should do with one invite payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteRouting {
    /// Show the incoming-call prompt.
    Present(CallInvite),
    /// Not a call; the recent-threads list is stale.
    RefreshThreads,
    /// Duplicate, unknown kind, or unusable payload.
    Ignore,
}

/// Alert kinds carried in the `alert_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlertKind {
    /// A call invitation, including the legacy empty alert type.
    Call,
    /// A chat message landed; refresh the thread list.
    NewMessage,
    /// A known kind with no client-side action here.
    KnownNonCall,
    /// Something newer than this client; ignored safely.
    Unknown,
}

/// Alert kinds the backend sends that are not calls and need no action.
const KNOWN_NON_CALL: &[&str] = &[
    "ChatAccepted",
    "ChatEnd",
    "TaskListAlert",
    "AppointmentConfirmation",
    "waiting_room",
    "InboxMessage",
    "SEND_PATIENT_CLINICAL_UPDATE_TO_DOCTOR",
    "clinical_updates_for_doctor",
];

fn classify_alert(alert_type: &str) -> AlertKind {
    match alert_type {
        "" | "GroupCall" | "DirectCall" | "CALLFROMWEB" => AlertKind::Call,
        "NewMessage" => AlertKind::NewMessage,
        t if KNOWN_NON_CALL.contains(&t) => AlertKind::KnownNonCall,
        _ => AlertKind::Unknown,
    }
}

/// Per-room dedup entry.
struct InviteEntry {
    presented_at: Instant,
    resolved: bool,
}

/// Deduplication table for incoming calls.
///
/// One entry per broadcast id; entries expire after the window whether or
/// not the call was answered. The check and the insert happen under one
/// lock so two deliveries racing on the same id can never both present.
pub struct CallRegistry {
    window: Duration,
    entries: parking_lot::Mutex<HashMap<String, InviteEntry>>,
}

impl CallRegistry {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Whether an invite for this room should be shown now.
    ///
    /// Returns `true` at most once per broadcast id per window, and
    /// records the presentation in the same critical section.
    pub fn should_present(&self, broadcast_id: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| now.duration_since(entry.presented_at) < self.window);
        if let Some(entry) = entries.get(broadcast_id) {
            if entry.resolved {
                tracing::debug!(broadcast_id, "re-ring for an already handled call");
            }
            return false;
        }
        entries.insert(
            broadcast_id.to_string(),
            InviteEntry {
                presented_at: now,
                resolved: false,
            },
        );
        true
    }

    /// Mark an invite answered or declined. Idempotent; unknown ids are a
    /// no-op. The entry still expires on the window, so a re-ring for the
    /// same room stays suppressed until then.
    pub fn resolve(&self, broadcast_id: &str) {
        if let Some(entry) = self.entries.lock().get_mut(broadcast_id) {
            entry.resolved = true;
        }
    }
}

/// Normalize and route one invite payload through the registry.
///
/// Handles the field drift the backend exhibits: the broadcast id may be
/// flat or nested under `aps.alert`, and the caller name comes from the
/// first of several aliases. Payloads without a broadcast id are dropped
/// with a warning.
pub fn route_invite(registry: &CallRegistry, payload: &Value, source: InviteSource) -> InviteRouting {
    if !payload.is_object() {
        tracing::warn!("invite payload is not an object, ignoring");
        return InviteRouting::Ignore;
    }

    let alert_type = types::str_field(payload, &["alert_type", "alertType"]);
    match classify_alert(alert_type.trim()) {
        AlertKind::Call => {}
        AlertKind::NewMessage => return InviteRouting::RefreshThreads,
        AlertKind::KnownNonCall => {
            tracing::debug!(alert_type, "non-call alert, no action");
            return InviteRouting::Ignore;
        }
        AlertKind::Unknown => {
            tracing::debug!(alert_type, "unrecognized alert type, ignoring");
            return InviteRouting::Ignore;
        }
    }

    let mut broadcast_id = types::str_field(payload, &["broadcast_id", "broadcastId"]);
    if broadcast_id.is_empty() {
        broadcast_id = types::str_field(&payload["aps"]["alert"], &["broadcast_id"]);
    }
    if broadcast_id.is_empty() {
        tracing::warn!("call payload carries no broadcast id, dropping");
        return InviteRouting::Ignore;
    }

    if !registry.should_present(&broadcast_id) {
        tracing::debug!(broadcast_id, "duplicate call invite suppressed");
        return InviteRouting::Ignore;
    }

    let mut caller_name =
        types::str_field(payload, &["caller_name", "sender_name", "sender_display_name"]);
    if caller_name.is_empty() {
        caller_name = "Incoming Call".to_string();
    }

    InviteRouting::Present(CallInvite {
        broadcast_id,
        caller_name,
        source,
    })
}

/// User-driven call operations over a shared [`Session`].
pub struct CallController<T: EventTransport> {
    session: Session<T>,
}

impl<T: EventTransport> CallController<T> {
    #[must_use]
    pub fn new(session: Session<T>) -> Self {
        Self { session }
    }

    /// Answer an incoming call.
    ///
    /// Tells the server the call was accepted and reports device details,
    /// both best-effort: the user already answered, so neither failure may
    /// block the handoff to the conference client.
    ///
    /// # Errors
    ///
    /// Only [`SessionError::InvalidArgument`] for an empty room id.
    pub async fn accept(&self, broadcast_id: &str) -> Result<ConferenceHandoff, SessionError> {
        let broadcast_id = broadcast_id.trim();
        if broadcast_id.is_empty() {
            return Err(SessionError::InvalidArgument("broadcast_id"));
        }
        let user_id = self
            .session
            .store()
            .get(storage::USER_ID)
            .unwrap_or_default();

        self.session
            .fire_and_forget(
                topic::ACCEPT_CALL,
                json!({"user_id": user_id, "broadcast_id": broadcast_id}),
            )
            .await;
        self.session
            .fire_and_forget(
                topic::DEVICE_DETAILS,
                json!({
                    "broadcast_id": broadcast_id,
                    "user_id": user_id,
                    "device_type": std::env::consts::OS,
                    "app_version": env!("CARGO_PKG_VERSION"),
                }),
            )
            .await;

        self.session.inner.calls.resolve(broadcast_id);
        Ok(ConferenceHandoff {
            room_id: broadcast_id.to_string(),
            server_url: self.session.store().get(storage::CONFERENCE_SERVER_URL),
        })
    }

    /// Decline an incoming call. Local only; the server is not told.
    pub fn decline(&self, broadcast_id: &str) {
        self.session.inner.calls.resolve(broadcast_id.trim());
    }

    /// Start an outbound call and return the room id to join.
    ///
    /// The acknowledgement arrives either as a plain object carrying
    /// `broadcast_id` or as an encrypted envelope; both are handled.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidArgument`] for a missing caller or empty
    /// participant list, [`SessionError::CallCreationFailed`] when the ack
    /// carries no room id, or the request-level error.
    pub async fn create_call(
        &self,
        caller_name: &str,
        participants: &[String],
    ) -> Result<String, SessionError> {
        let user_id = self
            .session
            .store()
            .get(storage::USER_ID)
            .unwrap_or_default();
        if user_id.trim().is_empty() {
            return Err(SessionError::InvalidArgument("caller user id"));
        }
        if participants.is_empty() {
            return Err(SessionError::InvalidArgument("participants"));
        }
        let organization_id = self
            .session
            .store()
            .get(storage::ORGANIZATION_ID)
            .unwrap_or_default();

        let ack = self
            .session
            .request_ack(
                topic::CREATE_CALL,
                json!({
                    "user_id": user_id,
                    "caller_name": caller_name,
                    "participants": participants,
                    "organization_id": organization_id,
                }),
            )
            .await?;

        let decoded = decode_ack(ack).ok_or(SessionError::CallCreationFailed)?;
        let room_id = types::str_field(&decoded, &["broadcast_id", "broadcastId"]);
        if room_id.is_empty() {
            tracing::warn!("create-call ack carried no broadcast id");
            return Err(SessionError::CallCreationFailed);
        }
        Ok(room_id)
    }

    /// Join a call room that already exists.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidArgument`] for an empty room id,
    /// [`SessionError::Decode`] for an unreadable ack,
    /// [`SessionError::ServerError`] for any status other than `200`, or
    /// the request-level error.
    pub async fn join_existing(&self, room_id: &str) -> Result<(), SessionError> {
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return Err(SessionError::InvalidArgument("room_id"));
        }
        let user_id = self
            .session
            .store()
            .get(storage::USER_ID)
            .unwrap_or_default();

        let ack = self
            .session
            .request_ack(
                topic::JOIN_EXISTING_CALL,
                json!({"user_id": user_id, "broadcast_id": room_id}),
            )
            .await?;

        let decoded = decode_ack(ack).ok_or(SessionError::Decode)?;
        if types::has_code(&decoded, 200) {
            return Ok(());
        }
        let code = types::str_field(&decoded, &["code"]);
        let message = types::str_field(&decoded, &["message", "msg"]);
        Err(SessionError::ServerError { code, message })
    }
}
