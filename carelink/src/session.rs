//! Persistent session with the signaling backend.
//!
//! [`Session`] owns the connection lifecycle: connect with a bounded
//! fallback timeout, request/ack correlation, automatic reconnection with
//! re-join, a single inbound dispatch loop, and forced-logout teardown.
//! Everything the UI layer needs to react to arrives as a [`SessionEvent`]
//! on the channel returned from [`Session::new`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};

use carelink_proto::frame::{ChatEventKind, EventFrame, InboundKind, topic};
use carelink_proto::types::{self, ChatMessage, ChatRequest};

use crate::calls::{CallInvite, CallRegistry, InviteRouting, InviteSource, route_invite};
use crate::chat::ChatClient;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::storage::{self, CredentialStore, Credentials};
use crate::transport::EventTransport;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection, and no attempt in progress.
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// Transport is up but the session is not yet bound to a user.
    Connected,
    /// An identify request is in flight.
    Joining,
    /// The server has bound this connection to the stored credentials.
    Joined,
}

/// Events emitted by the session for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The transport connected or reconnected.
    Connected,
    /// Reconnection attempts are exhausted; the session is offline.
    Disconnected,
    /// The join handshake completed.
    Joined,
    /// An incoming call passed deduplication and should be presented.
    IncomingCall(CallInvite),
    /// A chat message was delivered to one of this user's threads.
    MessageReceived(ChatMessage),
    /// Something changed server-side; the recent-threads list is stale.
    RecentThreadsStale,
    /// A new chat request was created for this user.
    ChatRequestCreated,
    /// A chat request this user sent was accepted.
    ChatRequestAccepted,
    /// Fresh pending-requests snapshot, fetched after join.
    ChatRequests(Vec<ChatRequest>),
    /// The server terminated the session; credentials have been cleared.
    ForcedLogout,
}

/// Shared state behind a [`Session`] handle.
pub(crate) struct SessionInner<T: EventTransport> {
    pub(crate) transport: T,
    pub(crate) store: Arc<dyn CredentialStore>,
    pub(crate) config: SessionConfig,
    pub(crate) calls: CallRegistry,
    state: parking_lot::Mutex<ConnectionState>,
    /// Waiters for in-flight requests, keyed by ack correlation id.
    pending: parking_lot::Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    next_ack_id: AtomicU64,
    /// Guards against concurrent join attempts (manual + reconnect).
    joining: AtomicBool,
    /// Cleared on disconnect and forced logout to stop the reconnect loop.
    reconnect_enabled: AtomicBool,
    event_tx: mpsc::Sender<SessionEvent>,
}

/// Handle to a signaling session. Cheap to clone; all clones share state.
pub struct Session<T: EventTransport> {
    pub(crate) inner: Arc<SessionInner<T>>,
}

impl<T: EventTransport> Clone for Session<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: EventTransport> Session<T> {
    /// Creates a session over the given transport and credential store.
    ///
    /// Returns the session and the receiver for [`SessionEvent`]s the UI
    /// layer should consume. Nothing connects until [`connect`] is called.
    ///
    /// [`connect`]: Session::connect
    pub fn new(
        transport: T,
        store: Arc<dyn CredentialStore>,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
        let calls = CallRegistry::new(config.dedup_window);
        let session = Self {
            inner: Arc::new(SessionInner {
                transport,
                store,
                config,
                calls,
                state: parking_lot::Mutex::new(ConnectionState::Disconnected),
                pending: parking_lot::Mutex::new(HashMap::new()),
                next_ack_id: AtomicU64::new(0),
                joining: AtomicBool::new(false),
                reconnect_enabled: AtomicBool::new(false),
                event_tx,
            }),
        };
        (session, event_rx)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// The credential store this session reads from.
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    /// Connect to the backend and join if credentials are stored.
    ///
    /// Returns within the configured connect timeout either way. On
    /// success the dispatch loop is running and, when credentials are
    /// present, the join handshake has been attempted before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Timeout`] when the attempt exceeds the
    /// fallback window, or the transport's error otherwise. A failed join
    /// is not an error; the session stays `Connected`.
    pub async fn connect(&self) -> Result<(), SessionError> {
        self.inner.reconnect_enabled.store(true, Ordering::Relaxed);
        self.set_state(ConnectionState::Connecting);

        let attempt = tokio::time::timeout(
            self.inner.config.connect_timeout,
            self.inner.transport.connect(),
        )
        .await;
        match attempt {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
            Err(_) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(SessionError::Timeout);
            }
        }

        self.set_state(ConnectionState::Connected);
        self.emit(SessionEvent::Connected);
        self.spawn_reader();
        self.join_if_credentialed().await;
        Ok(())
    }

    /// Close the connection and stop reconnecting.
    pub async fn disconnect(&self) {
        self.inner.reconnect_enabled.store(false, Ordering::Relaxed);
        self.inner.transport.close().await;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Send a request and wait for its acknowledgement payload.
    ///
    /// When the transport is down, one reconnect attempt is made followed
    /// by a short settle delay; if still disconnected the request fails
    /// with [`SessionError::NotConnected`]. The ack timeout removes the
    /// waiter, so an abandoned request never leaks.
    ///
    /// The returned value is the raw ack payload; business-level status
    /// codes inside it are the caller's concern.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`], [`SessionError::Timeout`], or the
    /// transport error from the send.
    pub async fn request_ack(&self, event: &str, payload: Value) -> Result<Value, SessionError> {
        if !self.inner.transport.is_connected() {
            if !self.inner.reconnect_enabled.load(Ordering::Relaxed) {
                return Err(SessionError::NotConnected);
            }
            tracing::warn!(event, "not connected, trying one reconnect before request");
            if self.inner.transport.connect().await.is_ok() {
                self.set_state(ConnectionState::Connected);
                self.spawn_reader();
            }
            tokio::time::sleep(self.inner.config.retry_delay).await;
            if !self.inner.transport.is_connected() {
                return Err(SessionError::NotConnected);
            }
        }

        let id = self.inner.next_ack_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id, tx);

        let frame = EventFrame::request(event, payload, id);
        if let Err(e) = self.inner.transport.send(&frame).await {
            self.inner.pending.lock().remove(&id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.inner.config.request_timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            // The waiter was dropped by teardown.
            Ok(Err(_)) => Err(SessionError::NotConnected),
            Err(_) => {
                self.inner.pending.lock().remove(&id);
                tracing::warn!(event, ack_id = id, "request timed out");
                Err(SessionError::Timeout)
            }
        }
    }

    /// Send a notification without waiting for an acknowledgement.
    ///
    /// Failures are logged and swallowed; callers use this for advisory
    /// traffic that must never block or fail an operation.
    pub async fn fire_and_forget(&self, event: &str, payload: Value) {
        let frame = EventFrame::notify(event, payload);
        if let Err(e) = self.inner.transport.send(&frame).await {
            tracing::warn!(event, err = %e, "best-effort send failed");
        }
    }

    /// Run the join handshake if credentials are stored.
    ///
    /// Silent no-op when the store has no user or session id, or when a
    /// join is already in flight. On success the state becomes `Joined`
    /// and a background task refreshes pending chat requests and announces
    /// presence; those follow-ups are advisory and never roll back a join.
    pub async fn join_if_credentialed(&self) {
        let Some(creds) = Credentials::load(self.inner.store.as_ref()) else {
            tracing::debug!("no stored credentials, skipping join");
            return;
        };
        if self.inner.joining.swap(true, Ordering::SeqCst) {
            tracing::debug!("join already in flight");
            return;
        }
        self.set_state(ConnectionState::Joining);

        let payload = json!({
            "user_id": creds.user_id,
            "user_type": creds.user_type,
            "is_admin": i32::from(creds.is_admin),
            "session_id": creds.session_id,
        });
        let result = self.request_ack(topic::IDENTIFY, payload).await;
        self.inner.joining.store(false, Ordering::SeqCst);

        match result {
            Ok(_ack) => {
                // A forced logout can land right behind the identify ack;
                // only a session still mid-join becomes joined.
                let joined = {
                    let mut state = self.inner.state.lock();
                    if *state == ConnectionState::Joining {
                        *state = ConnectionState::Joined;
                        true
                    } else {
                        false
                    }
                };
                if !joined {
                    tracing::debug!("session torn down before join completed");
                    return;
                }
                tracing::info!(user_id = %creds.user_id, "session joined");
                self.emit(SessionEvent::Joined);

                let session = self.clone();
                tokio::spawn(async move {
                    let chat = ChatClient::new(session.clone());
                    match chat.fetch_pending_requests().await {
                        Ok(requests) => session.emit(SessionEvent::ChatRequests(requests)),
                        Err(e) => tracing::warn!(err = %e, "post-join request refresh failed"),
                    }
                    session
                        .fire_and_forget(
                            topic::PRESENCE_UPDATE,
                            json!({"user_id": creds.user_id, "online": true}),
                        )
                        .await;
                });
            }
            Err(e) => {
                tracing::warn!(err = %e, "session join failed");
                let mut state = self.inner.state.lock();
                if *state == ConnectionState::Joining {
                    *state = ConnectionState::Connected;
                }
            }
        }
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.inner.event_tx.try_send(event);
    }

    fn set_state(&self, state: ConnectionState) {
        *self.inner.state.lock() = state;
    }

    /// Spawn the reader loop for the current connection.
    ///
    /// The loop is the only consumer of inbound frames; it exits when the
    /// connection drops and hands off to the reconnect supervisor.
    fn spawn_reader(&self) {
        let session = self.clone();
        tokio::spawn(async move {
            loop {
                match session.inner.transport.recv().await {
                    Ok(frame) => session.dispatch(frame).await,
                    Err(e) => {
                        tracing::warn!(err = %e, "connection lost");
                        break;
                    }
                }
            }
            session.on_connection_lost().await;
        });
    }

    /// Route one inbound frame.
    async fn dispatch(&self, frame: EventFrame) {
        if frame.is_ack() {
            let Some(id) = frame.ack_id else {
                tracing::debug!("ack frame without correlation id dropped");
                return;
            };
            let waiter = self.inner.pending.lock().remove(&id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(frame.payload);
                }
                None => tracing::debug!(ack_id = id, "late ack dropped"),
            }
            return;
        }

        match InboundKind::classify(&frame.event) {
            InboundKind::CallInvite => {
                match route_invite(&self.inner.calls, &frame.payload, InviteSource::Socket) {
                    InviteRouting::Present(invite) => self.emit(SessionEvent::IncomingCall(invite)),
                    InviteRouting::RefreshThreads => self.emit(SessionEvent::RecentThreadsStale),
                    InviteRouting::Ignore => {}
                }
            }
            InboundKind::Chat(ChatEventKind::RequestCreated) => {
                self.emit(SessionEvent::ChatRequestCreated);
            }
            InboundKind::Chat(ChatEventKind::RequestAccepted) => {
                self.emit(SessionEvent::ChatRequestAccepted);
            }
            InboundKind::Chat(ChatEventKind::MessageReceived) => {
                self.emit(SessionEvent::MessageReceived(types::parse_message_row(
                    &frame.payload,
                )));
            }
            InboundKind::Logout => self.forced_logout().await,
            InboundKind::Unknown => {
                tracing::debug!(event = %frame.event, "unhandled event topic");
            }
        }
    }

    /// Reconnect supervisor, entered when the reader loop exits.
    async fn on_connection_lost(&self) {
        if !self.inner.reconnect_enabled.load(Ordering::Relaxed) {
            return;
        }
        self.set_state(ConnectionState::Disconnected);

        for attempt in 1..=self.inner.config.reconnect_attempts {
            tokio::time::sleep(self.inner.config.reconnect_delay).await;
            if !self.inner.reconnect_enabled.load(Ordering::Relaxed) {
                return;
            }
            match self.inner.transport.connect().await {
                Ok(()) => {
                    tracing::info!(attempt, "reconnected");
                    self.set_state(ConnectionState::Connected);
                    self.emit(SessionEvent::Connected);
                    self.spawn_reader();
                    self.join_if_credentialed().await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(attempt, err = %e, "reconnect attempt failed");
                }
            }
        }

        tracing::warn!("reconnect attempts exhausted, session is offline");
        self.emit(SessionEvent::Disconnected);
    }

    /// Server-initiated teardown.
    ///
    /// Closes the transport, fails every in-flight request, clears all
    /// stored credentials, and emits a single [`SessionEvent::ForcedLogout`].
    /// Reconnection stays suppressed until the next explicit `connect`.
    async fn forced_logout(&self) {
        tracing::info!("server requested logout, tearing down session");
        self.inner.reconnect_enabled.store(false, Ordering::Relaxed);
        self.inner.transport.close().await;
        self.set_state(ConnectionState::Disconnected);

        // Dropping the waiters fails their requests with NotConnected.
        self.inner.pending.lock().clear();

        for key in storage::SESSION_KEYS {
            self.inner.store.remove(key);
        }
        self.emit(SessionEvent::ForcedLogout);
    }

    /// Route a call payload that arrived over a push channel.
    ///
    /// Shares the deduplication table with socket-delivered invites, so a
    /// call that arrives on both paths is presented once.
    pub fn handle_push_payload(&self, payload: &Value) {
        match route_invite(&self.inner.calls, payload, InviteSource::Push) {
            InviteRouting::Present(invite) => self.emit(SessionEvent::IncomingCall(invite)),
            InviteRouting::RefreshThreads => self.emit(SessionEvent::RecentThreadsStale),
            InviteRouting::Ignore => {}
        }
    }
}
