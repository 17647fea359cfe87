//! Error taxonomy for session-level operations.

use crate::transport::TransportError;

/// Errors surfaced by session, call, and chat operations.
///
/// Business-level failures the protocol tolerates (an undecryptable list
/// response, a missing optional field) do not appear here; those surface
/// as empty results. These variants are for failures the caller must see.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No live connection and the single retry cycle did not produce one.
    #[error("not connected")]
    NotConnected,

    /// The server did not acknowledge the request in time.
    #[error("request timed out")]
    Timeout,

    /// The acknowledgement arrived but could not be decoded.
    #[error("could not decode server response")]
    Decode,

    /// The caller passed an argument the operation cannot work with.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The server answered with a non-success status code.
    #[error("server error {code}: {message}")]
    ServerError {
        /// Status code as the server sent it.
        code: String,
        /// Human-readable message, possibly empty.
        message: String,
    },

    /// The create-call acknowledgement carried no usable room id.
    #[error("call creation failed: no room id in response")]
    CallCreationFailed,

    /// Transport-level send or receive failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
