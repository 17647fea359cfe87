//! Loopback transport for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels to simulate a connection
//! to the backend. [`LoopbackTransport::create_pair`] returns a client
//! transport and a [`LoopbackServer`] that plays the server role: tests
//! accept connections from it, read the client's frames, and script
//! replies. Reconnection works the same way it does over a real socket —
//! each [`EventTransport::connect`] call produces a fresh [`PeerConn`] on
//! the server's accept queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify, mpsc};

use carelink_proto::frame::EventFrame;

use super::{EventTransport, TransportError};

/// Shared state between the client transport and the server end.
struct ServerState {
    /// Set by [`LoopbackServer::shutdown`]; connects fail afterwards.
    closed: AtomicBool,
    accept_tx: mpsc::UnboundedSender<PeerConn>,
}

/// In-process transport backed by `tokio::sync::mpsc` channels.
pub struct LoopbackTransport {
    state: Arc<ServerState>,
    /// Sender for outgoing frames on the current link.
    out_tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<EventFrame>>>,
    /// Receiver for inbound frames on the current link. Never held across
    /// an await; `recv` takes the receiver out first.
    incoming: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<EventFrame>>>,
    /// Wakes a pending `recv` when `close` tears the link down.
    close_signal: Notify,
    connected: AtomicBool,
}

/// Server end of a loopback pair; used by tests to script the backend.
pub struct LoopbackServer {
    state: Arc<ServerState>,
    accept_rx: Mutex<mpsc::UnboundedReceiver<PeerConn>>,
}

/// One accepted connection, as seen from the server side.
pub struct PeerConn {
    /// Sends frames toward the client.
    tx: mpsc::UnboundedSender<EventFrame>,
    /// Receives frames the client sent.
    rx: Mutex<mpsc::UnboundedReceiver<EventFrame>>,
}

impl LoopbackTransport {
    /// Create a connected client transport and server pair.
    ///
    /// The transport starts disconnected; call
    /// [`connect`](EventTransport::connect) to put a connection on the
    /// server's accept queue.
    pub fn create_pair() -> (LoopbackTransport, LoopbackServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let state = Arc::new(ServerState {
            closed: AtomicBool::new(false),
            accept_tx,
        });
        let transport = LoopbackTransport {
            state: Arc::clone(&state),
            out_tx: parking_lot::Mutex::new(None),
            incoming: parking_lot::Mutex::new(None),
            close_signal: Notify::new(),
            connected: AtomicBool::new(false),
        };
        let server = LoopbackServer {
            state,
            accept_rx: Mutex::new(accept_rx),
        };
        (transport, server)
    }
}

impl EventTransport for LoopbackTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.state.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Unreachable("loopback".to_string()));
        }
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        let conn = PeerConn {
            tx: server_tx,
            rx: Mutex::new(server_rx),
        };
        self.state
            .accept_tx
            .send(conn)
            .map_err(|_| TransportError::Unreachable("loopback".to_string()))?;
        *self.out_tx.lock() = Some(client_tx);
        self.connected.store(true, Ordering::Relaxed);
        *self.incoming.lock() = Some(client_rx);
        Ok(())
    }

    async fn send(&self, frame: &EventFrame) -> Result<(), TransportError> {
        let tx = self.out_tx.lock().clone();
        let Some(tx) = tx else {
            return Err(TransportError::ConnectionClosed);
        };
        tx.send(frame.clone()).map_err(|_| {
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
            None => {
                self.connected.store(false, Ordering::Relaxed);
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.out_tx.lock().take();
        self.incoming.lock().take();
        self.close_signal.notify_waiters();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
            && self.out_tx.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

impl LoopbackServer {
    /// Wait for the next connection from the client transport.
    ///
    /// Returns `None` when the client side has been dropped.
    pub async fn accept(&self) -> Option<PeerConn> {
        self.accept_rx.lock().await.recv().await
    }

    /// Refuse all future connection attempts.
    ///
    /// Already-accepted [`PeerConn`]s keep working until dropped.
    pub fn shutdown(&self) {
        self.state.closed.store(true, Ordering::Relaxed);
    }
}

impl PeerConn {
    /// Read the next frame the client sent.
    ///
    /// Returns `None` when the client closed its side.
    pub async fn recv(&self) -> Option<EventFrame> {
        self.rx.lock().await.recv().await
    }

    /// Deliver a frame to the client. Returns `false` if the client is gone.
    pub fn send(&self, frame: EventFrame) -> bool {
        self.tx.send(frame).is_ok()
    }
}
