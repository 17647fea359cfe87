//! Payload types and tolerant parsers for decoded server responses.
//!
//! The backend's field names have drifted across releases, so every parser
//! here accepts the known aliases and fills sensible defaults instead of
//! failing. Parsers return empty collections for anything unreadable; a
//! malformed row is skipped, never fatal.

use serde_json::Value;

use crate::envelope;

/// One conversation in the recent-threads list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatThread {
    pub chat_id: String,
    /// Room id shared with call signaling.
    pub broadcast_id: String,
    pub display_name: String,
    pub is_group: bool,
    /// Counterpart user id for direct threads; empty for groups.
    pub receiver_id: String,
    /// Decoded plaintext of the last message, for list previews.
    pub last_message: String,
    pub last_message_time: String,
    pub unread_count: u32,
}

/// A pending chat request awaiting accept or reject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub broadcast_id: String,
    pub requester_id: String,
    pub requester_name: String,
    pub created_at: String,
    pub appointment_id: String,
}

/// Content classification of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Document,
}

/// One message in a thread, body already decoded to plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub message_id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub body: String,
    pub timestamp: String,
    pub kind: MessageKind,
}

/// One user in the directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub id: String,
    pub name: String,
}

/// A role bucket in the directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGroup {
    pub role_name: String,
    pub users: Vec<DirectoryUser>,
}

/// Reads the first present alias as a trimmed string.
///
/// Numbers are rendered so ids that flip between `"42"` and `42` across
/// server versions read the same.
pub fn str_field(row: &Value, aliases: &[&str]) -> String {
    for key in aliases {
        match &row[*key] {
            Value::String(s) if !s.trim().is_empty() => return s.trim().to_string(),
            Value::Number(n) => return n.to_string(),
            _ => {}
        }
    }
    String::new()
}

/// Reads a count field that may be a number or a numeric string.
fn count_field(row: &Value, aliases: &[&str]) -> u32 {
    for key in aliases {
        match &row[*key] {
            Value::Number(n) => {
                if let Some(v) = n.as_u64() {
                    return u32::try_from(v).unwrap_or(u32::MAX);
                }
            }
            Value::String(s) => {
                if let Ok(v) = s.trim().parse() {
                    return v;
                }
            }
            _ => {}
        }
    }
    0
}

/// Reads a flag that may arrive as `true`, `1`, or `"1"`.
fn flag_field(row: &Value, aliases: &[&str]) -> bool {
    for key in aliases {
        match &row[*key] {
            Value::Bool(b) => return *b,
            Value::Number(n) => return n.as_u64() == Some(1),
            Value::String(s) => return s.trim() == "1" || s.trim().eq_ignore_ascii_case("true"),
            _ => {}
        }
    }
    false
}

/// Whether a decoded response carries the given success code.
///
/// Codes arrive as strings or numbers depending on server version.
pub fn has_code(dec: &Value, expected: u64) -> bool {
    match &dec["code"] {
        Value::Number(n) => n.as_u64() == Some(expected),
        Value::String(s) => s.trim().parse() == Ok(expected),
        _ => false,
    }
}

/// Parses the recent-threads response.
///
/// Expects `{ code: 100, data: { recent_chats: [...] } }`; anything else
/// yields an empty list.
pub fn parse_recent_threads(dec: &Value) -> Vec<ChatThread> {
    if !has_code(dec, 100) {
        return Vec::new();
    }
    let Some(rows) = dec["data"]["recent_chats"].as_array() else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            let broadcast_id = str_field(row, &["broadcast_id", "broadcastId", "id", "chat_id"]);
            if broadcast_id.is_empty() {
                return None;
            }
            Some(ChatThread {
                chat_id: str_field(row, &["chat_id", "id"]),
                broadcast_id,
                display_name: str_field(row, &["member_name", "user_name", "group_name", "name"]),
                is_group: flag_field(row, &["group_chat", "is_group"]),
                receiver_id: str_field(row, &["receiver_id", "member_id", "user_id"]),
                last_message: envelope::decode_body(&str_field(
                    row,
                    &["message", "last_message", "chat_message"],
                )),
                last_message_time: str_field(row, &["createdOn", "timestamp", "created_at"]),
                unread_count: count_field(row, &["unread_count", "unreadCount"]),
            })
        })
        .collect()
}

/// Parses the pending-requests response.
///
/// Expects `{ code: 100, data: { chat_requests: [...] } }`.
pub fn parse_pending_requests(dec: &Value) -> Vec<ChatRequest> {
    if !has_code(dec, 100) {
        return Vec::new();
    }
    let Some(rows) = dec["data"]["chat_requests"].as_array() else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            let broadcast_id = str_field(row, &["broadcast_id", "broadcastId", "id"]);
            if broadcast_id.is_empty() {
                return None;
            }
            Some(ChatRequest {
                broadcast_id,
                requester_id: str_field(row, &["userid", "user_id", "sender_id"]),
                requester_name: str_field(
                    row,
                    &["member_name", "user_name", "sender_name", "name"],
                ),
                created_at: str_field(row, &["createdOn", "created_at", "timestamp"]),
                appointment_id: str_field(row, &["appointment_id", "appointmentId"]),
            })
        })
        .collect()
}

/// Parses a history response.
///
/// The row array lives under `result` or `messageArrayList`, at top level
/// or inside `data`. Message bodies go through [`envelope::decode_body`].
pub fn parse_history(dec: &Value) -> Vec<ChatMessage> {
    let rows = ["result", "messageArrayList"]
        .iter()
        .find_map(|key| dec[*key].as_array().or_else(|| dec["data"][*key].as_array()));
    let Some(rows) = rows else {
        return Vec::new();
    };
    rows.iter().map(parse_message_row).collect()
}

/// Parses one message row from history or a live delivery payload.
pub fn parse_message_row(row: &Value) -> ChatMessage {
    ChatMessage {
        message_id: str_field(row, &["message_id", "messageId", "id"]),
        chat_id: str_field(row, &["chat_id", "broadcast_id", "broadcastId"]),
        sender_id: str_field(row, &["userid", "sender_id", "from", "user_id"]),
        sender_name: str_field(row, &["member_name", "user_name", "sender_name", "name"]),
        body: envelope::decode_body(&str_field(row, &["message", "body", "chat_message"])),
        timestamp: str_field(row, &["createdOn", "timestamp", "created_at"]),
        kind: parse_kind(&str_field(row, &["type", "message_type"])),
    }
}

fn parse_kind(raw: &str) -> MessageKind {
    match raw.to_ascii_lowercase().as_str() {
        "image" | "img" => MessageKind::Image,
        "doc" | "document" | "file" => MessageKind::Document,
        _ => MessageKind::Text,
    }
}

/// Parses the directory response into role buckets.
///
/// The bucket array lives under `usersList`, `users_list`, or is the
/// response root itself.
pub fn parse_directory(dec: &Value) -> Vec<RoleGroup> {
    let rows = dec["usersList"]
        .as_array()
        .or_else(|| dec["users_list"].as_array())
        .or_else(|| dec["data"]["usersList"].as_array())
        .or_else(|| dec.as_array());
    let Some(rows) = rows else {
        return Vec::new();
    };
    rows.iter()
        .map(|group| RoleGroup {
            role_name: str_field(group, &["role_name", "role", "name"]),
            users: group["users"]
                .as_array()
                .or_else(|| group["usersList"].as_array())
                .or_else(|| group["members"].as_array())
                .map(|users| {
                    users
                        .iter()
                        .filter_map(|user| {
                            let id = str_field(user, &["user_id", "id", "userid"]);
                            if id.is_empty() {
                                return None;
                            }
                            Some(DirectoryUser {
                                id,
                                name: str_field(user, &["name", "user_name", "member_name"]),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect()
}
