//! Transport layer abstraction for the `CareLink` client.
//!
//! Defines the [`EventTransport`] trait the session runs over. Concrete
//! implementations:
//! - [`ws::WsTransport`] — WebSocket connection to the signaling backend
//! - [`loopback::LoopbackTransport`] — in-process transport for testing

pub mod loopback;
pub mod ws;

use carelink_proto::frame::EventFrame;

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection to the server has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The endpoint could not be reached.
    #[error("endpoint {0} is unreachable")]
    Unreachable(String),

    /// The endpoint URL is malformed or uses an unsupported scheme.
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),

    /// A frame could not be encoded for the wire.
    #[error("frame codec error: {0}")]
    Codec(String),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Async transport carrying [`EventFrame`]s to and from the backend.
///
/// A transport value outlives individual connections: after a drop,
/// calling [`EventTransport::connect`] again on the same value establishes
/// a fresh link, which is what the session's reconnect loop relies on.
pub trait EventTransport: Send + Sync + 'static {
    /// Establish (or re-establish) the connection.
    fn connect(
        &self,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Send one frame.
    ///
    /// Returns `Ok(())` when the frame has been handed to the underlying
    /// connection. This does NOT guarantee the server processed it — the
    /// caller must wait for an application-level acknowledgment.
    fn send(
        &self,
        frame: &EventFrame,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Receive the next inbound frame.
    ///
    /// Blocks asynchronously until a frame arrives. Resolves with
    /// [`TransportError::ConnectionClosed`] when the link drops; never
    /// blocks forever on a dead connection.
    fn recv(
        &self,
    ) -> impl std::future::Future<Output = Result<EventFrame, TransportError>> + Send;

    /// Close the current connection, if any.
    fn close(&self) -> impl std::future::Future<Output = ()> + Send;

    /// Whether a connection is currently established.
    fn is_connected(&self) -> bool;
}
