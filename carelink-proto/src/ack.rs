//! Normalization of acknowledgement payloads.
//!
//! The backend answers requests with one of three historical shapes: a
//! plain JSON object, a base64 envelope string, or either of those wrapped
//! in a single-element array. [`RawAck`] names the shape explicitly and
//! [`RawAck::into_json`] is the one decode path every call site uses.

use serde_json::Value;

use crate::envelope;

/// An acknowledgement payload in the shape the server sent it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawAck {
    /// Already-decoded JSON object.
    Object(Value),
    /// Base64 envelope text still to be decrypted.
    Text(String),
    /// Array-wrapped payload; older servers wrap the real payload in a
    /// one-element array.
    Wrapped(Box<RawAck>),
}

impl RawAck {
    /// Classifies a raw ack value.
    ///
    /// Arrays unwrap to their first element recursively; null, empty
    /// strings, and empty arrays normalize to `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Array(mut items) => {
                if items.is_empty() {
                    None
                } else {
                    Self::from_value(items.swap_remove(0)).map(|inner| Self::Wrapped(Box::new(inner)))
                }
            }
            Value::String(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(Self::Text(trimmed.to_string()))
                }
            }
            obj @ Value::Object(_) => Some(Self::Object(obj)),
            // Bare numbers and booleans carry no usable payload.
            _ => None,
        }
    }

    /// Decodes this ack into JSON, decrypting envelope text if needed.
    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Object(value) => Some(value),
            Self::Text(wire) => envelope::decode_json(&wire),
            Self::Wrapped(inner) => inner.into_json(),
        }
    }
}

/// Normalizes and decodes an ack value in one step.
pub fn decode_ack(value: Value) -> Option<Value> {
    RawAck::from_value(value).and_then(RawAck::into_json)
}
