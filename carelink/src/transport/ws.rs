//! WebSocket transport to the signaling backend.
//!
//! Implements [`EventTransport`] over a `tokio-tungstenite` connection.
//! Frames travel as JSON text messages. A background reader task feeds
//! inbound frames into a channel; malformed frames are logged and skipped
//! rather than dropping the connection. The transport value survives
//! connection loss: calling [`EventTransport::connect`] again replaces the
//! link in place, which is what the session's reconnect loop does.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, Notify, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use carelink_proto::frame::{self, EventFrame};

use super::{EventTransport, TransportError};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Capacity of the inbound frame channel per connection.
const INCOMING_BUFFER: usize = 256;

/// WebSocket transport implementing [`EventTransport`].
pub struct WsTransport {
    /// The backend URL (ws:// or wss://).
    url: String,
    /// Timeout for one connection attempt.
    connect_timeout: Duration,
    /// Write half of the current connection (shared for concurrent sends).
    sender: Mutex<Option<WsSender>>,
    /// Channel fed by the current connection's background reader task.
    /// Never held across an await; `recv` takes the receiver out first.
    incoming: parking_lot::Mutex<Option<mpsc::Receiver<EventFrame>>>,
    /// Wakes a pending `recv` when `close` tears the link down.
    close_signal: Notify,
    /// Whether the current connection is active.
    connected: Arc<AtomicBool>,
}

impl WsTransport {
    /// Create a transport for the given backend URL. Does not connect.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] when the URL does not parse
    /// or its scheme is not `ws` or `wss`.
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self, TransportError> {
        let parsed =
            url::Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl(format!(
                "{url}: scheme must be ws or wss"
            )));
        }
        Ok(Self {
            url: url.to_string(),
            connect_timeout,
            sender: Mutex::new(None),
            incoming: parking_lot::Mutex::new(None),
            close_signal: Notify::new(),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The backend URL this transport connects to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl EventTransport for WsTransport {
    /// Establish a fresh WebSocket connection, replacing any previous one.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if the connection attempt times out.
    /// - [`TransportError::Unreachable`] if the URL cannot be connected.
    /// - [`TransportError::Io`] for TLS and handshake failures.
    async fn connect(&self) -> Result<(), TransportError> {
        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
                .await
                .map_err(|_| {
                    tracing::warn!(url = %self.url, "WebSocket connect timed out");
                    TransportError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = %self.url, err = %e, "WebSocket connect failed");
                    map_ws_connect_error(&self.url, e)
                })?;

        let (ws_sender, ws_reader) = ws_stream.split();

        let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
        self.connected.store(true, Ordering::Relaxed);
        tokio::spawn(reader_loop(ws_reader, tx, Arc::clone(&self.connected)));

        *self.sender.lock().await = Some(ws_sender);
        *self.incoming.lock() = Some(rx);
        tracing::info!(url = %self.url, "connected to signaling backend");
        Ok(())
    }

    async fn send(&self, frame: &EventFrame) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }
        let text = frame::encode(frame).map_err(|e| TransportError::Codec(e.to_string()))?;

        let mut guard = self.sender.lock().await;
        let Some(sender) = guard.as_mut() else {
            return Err(TransportError::ConnectionClosed);
        };
        sender.send(Message::Text(text.into())).await.map_err(|e| {
            tracing::warn!(err = %e, "WebSocket send failed");
            self.connected.store(false, Ordering::Relaxed);
            TransportError::ConnectionClosed
        })
    }

    /// Take the receiver out of its slot for the duration of the await so
    /// `close` and `connect` never block behind an idle reader. A close
    /// while a recv is pending wakes it through the notify.
    async fn recv(&self) -> Result<EventFrame, TransportError> {
        let Some(mut rx) = self.incoming.lock().take() else {
            return Err(TransportError::ConnectionClosed);
        };
        let closed = self.close_signal.notified();
        if !self.connected.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }
        let frame = tokio::select! {
            frame = rx.recv() => frame,
            () = closed => None,
        };
        match frame {
            Some(frame) => {
                let mut slot = self.incoming.lock();
                // A reconnect may have installed a fresh link meanwhile;
                // only put the receiver back into an empty slot.
                if slot.is_none() {
                    *slot = Some(rx);
                }
                Ok(frame)
            }
            None => Err(TransportError::ConnectionClosed),
        }
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::Relaxed);
        if let Some(mut sender) = self.sender.lock().await.take() {
            let _ = sender.send(Message::Close(None)).await;
        }
        self.incoming.lock().take();
        self.close_signal.notify_waiters();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// Background task reading WebSocket messages into the frame channel.
///
/// Text frames are decoded as [`EventFrame`]s; malformed ones are logged
/// and skipped. The task exits on close or read error and flips the
/// connected flag so sends fail fast.
async fn reader_loop(
    mut ws_reader: WsReader,
    tx: mpsc::Sender<EventFrame>,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match frame::decode(text.as_str()) {
                Ok(event_frame) => {
                    if tx.send(event_frame).await.is_err() {
                        // Receiver dropped, the link was replaced or closed.
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("WebSocket closed by server");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {
                // Control and binary frames carry nothing for this protocol.
            }
            Err(e) => {
                tracing::warn!(err = %e, "WebSocket read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    tracing::debug!("WebSocket reader task exiting");
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            // DNS/network failures surface as io errors.
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                TransportError::Unreachable(url.to_string())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Tls(_) => TransportError::Io(std::io::Error::other(format!("TLS error: {err}"))),
        WsError::Http(response) => TransportError::Io(std::io::Error::other(format!(
            "HTTP error: status {}",
            response.status()
        ))),
        other => TransportError::Io(std::io::Error::other(format!("connection error: {other}"))),
    }
}
