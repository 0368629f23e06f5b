//! # Streaming Session Manager
//!
//! Owns the WebSocket connection to `/ws/chat`: dials it, pumps frames in both
//! directions, notices when it dies, and dials again after a fixed delay.
//!
//! ## Connection State Machine:
//! ```text
//!   Closed ──Dial──▶ Connecting ──Opened──▶ Open
//!     ▲  │               │                    │
//!     │  │             Failed              Dropped
//!     │  │               ▼                    │
//!     │  └RetryScheduled▶Reconnecting         │
//!     │                  │                    │
//!     │                 Dial ──▶ Connecting   │
//!     └───────────────────────────────────────┘
//! ```
//! Transitions are a pure function ([`ConnectionState::next`]) so the table can
//! be tested without a network.
//!
//! ## Ownership:
//! The socket lives only inside the driver task. Other components see the state
//! through a `watch` channel and talk to the socket through [`SessionManager::send`];
//! nothing else can write to it or close it.
//!
//! ## Reconnect Policy:
//! After any close or failed dial the driver sleeps exactly `reconnect_delay`
//! and dials again. No growth, no retry limit: the client has no other way to
//! recover, and one dial per delay window keeps it from busy-retrying.

use crate::config::SessionConfig;
use crate::error::{ClientError, ClientResult};
use crate::protocol::{InboundMessage, OutboundMessage};
use crate::state::ClientState;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type ChatSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of the streaming channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A dial is in progress
    Connecting,
    /// Frames can be sent
    Open,
    /// No channel; either never connected or just dropped
    Closed,
    /// Waiting out the reconnect delay
    Reconnecting,
}

/// Things that happen to the channel, fed to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Dial,
    Opened,
    Failed,
    Dropped,
    RetryScheduled,
}

impl ConnectionState {
    /// The state after `event`, or `None` if the event is not valid here.
    pub fn next(self, event: LinkEvent) -> Option<ConnectionState> {
        use ConnectionState::*;
        match (self, event) {
            (Closed, LinkEvent::Dial) | (Reconnecting, LinkEvent::Dial) => Some(Connecting),
            (Connecting, LinkEvent::Opened) => Some(Open),
            (Connecting, LinkEvent::Failed) => Some(Closed),
            (Open, LinkEvent::Dropped) => Some(Closed),
            (Closed, LinkEvent::RetryScheduled) => Some(Reconnecting),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

/// What the session reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The connection state moved
    StateChanged(ConnectionState),
    /// A parsed frame from the backend
    Inbound(InboundMessage),
    /// The channel closed; `error` is true when it failed rather than closed cleanly
    Closed { reason: String, error: bool },
}

/// How one connection ended.
#[derive(Debug)]
enum Closure {
    Clean(String),
    Failed(String),
    /// The manager was dropped; stop the driver
    Shutdown,
}

/// Driver state handed over when `connect` is first called.
struct DriverParts {
    outbound_rx: mpsc::Receiver<OutboundMessage>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
}

/// Handle to the streaming channel.
///
/// ## Usage:
/// ```rust,ignore
/// let (mut session, events) = SessionManager::new(url, &config.session, state);
/// session.connect();
/// session.send(OutboundMessage::text("Hello"))?;
/// ```
pub struct SessionManager {
    url: String,
    reconnect_delay: Duration,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    pending: Option<DriverParts>,
    driver: Option<JoinHandle<()>>,
    metrics: ClientState,
}

impl SessionManager {
    /// Create a session in the `Closed` state. Nothing is dialed until [`connect`](Self::connect).
    ///
    /// ## Returns:
    /// The manager and the receiver for [`SessionEvent`]s.
    pub fn new(
        url: impl Into<String>,
        config: &SessionConfig,
        metrics: ClientState,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue.max(1));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let manager = Self {
            url: url.into(),
            reconnect_delay: config.reconnect_delay(),
            state_tx: Arc::new(state_tx),
            state_rx,
            outbound_tx,
            pending: Some(DriverParts { outbound_rx, events_tx }),
            driver: None,
            metrics,
        };
        (manager, events_rx)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Start the connection lifecycle.
    ///
    /// The first call spawns the driver, which then owns every later dial.
    /// Calls while a driver is running do nothing, so the channel is never opened twice.
    pub fn connect(&mut self) {
        let Some(parts) = self.pending.take() else {
            debug!(state = self.state().as_str(), "connect() ignored: session already running");
            return;
        };

        let driver = Driver {
            url: self.url.clone(),
            reconnect_delay: self.reconnect_delay,
            state: self.state(),
            state_tx: self.state_tx.clone(),
            outbound_rx: parts.outbound_rx,
            events_tx: parts.events_tx,
            metrics: self.metrics.clone(),
        };
        self.driver = Some(tokio::spawn(driver.run()));
    }

    /// Send one frame.
    ///
    /// ## Errors:
    /// - `NotConnected` unless the state is `Open`; the transport is not touched
    /// - `TransportClosed` if the outbound queue is full or the driver is gone
    ///
    /// The history is not updated here; it changes only when the backend echoes it.
    pub fn send(&self, message: OutboundMessage) -> ClientResult<()> {
        if !self.is_open() {
            return Err(ClientError::NotConnected);
        }
        self.outbound_tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                ClientError::TransportClosed("outbound queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                ClientError::TransportClosed("session driver stopped".to_string())
            }
        })
    }

    /// Stop the driver and drop the socket.
    pub fn shutdown(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
            self.state_tx.send_replace(ConnectionState::Closed);
            info!("Streaming session shut down");
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

/// The task that owns the socket.
struct Driver {
    url: String,
    reconnect_delay: Duration,
    state: ConnectionState,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    outbound_rx: mpsc::Receiver<OutboundMessage>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    metrics: ClientState,
}

impl Driver {
    fn transition(&mut self, event: LinkEvent) {
        match self.state.next(event) {
            Some(next) => {
                debug!(from = self.state.as_str(), to = next.as_str(), ?event, "Connection state change");
                self.state = next;
                self.state_tx.send_replace(next);
                let _ = self.events_tx.send(SessionEvent::StateChanged(next));
            }
            None => warn!(state = self.state.as_str(), ?event, "Invalid connection transition ignored"),
        }
    }

    async fn run(mut self) {
        loop {
            if self.events_tx.is_closed() {
                info!("Session owner gone, stopping driver");
                return;
            }

            let connection_id = Uuid::new_v4();
            self.transition(LinkEvent::Dial);
            self.metrics.record(|m| m.dial_attempts += 1);
            info!(%connection_id, url = %self.url, "Connecting to streaming channel");

            let closure = match connect_async(self.url.as_str()).await {
                Ok((socket, _response)) => {
                    self.metrics.record(|m| m.connections_opened += 1);
                    self.transition(LinkEvent::Opened);
                    info!(%connection_id, "Streaming channel open");
                    let closure = self.pump(socket, connection_id).await;
                    self.transition(LinkEvent::Dropped);
                    closure
                }
                Err(e) => {
                    self.transition(LinkEvent::Failed);
                    Closure::Failed(e.to_string())
                }
            };

            match closure {
                Closure::Shutdown => return,
                Closure::Clean(reason) => {
                    info!(%connection_id, %reason, "Streaming channel closed");
                    let _ = self.events_tx.send(SessionEvent::Closed { reason, error: false });
                }
                Closure::Failed(reason) => {
                    error!(%connection_id, %reason, "Streaming channel error");
                    let _ = self.events_tx.send(SessionEvent::Closed { reason, error: true });
                }
            }

            self.discard_stale_frames();
            self.transition(LinkEvent::RetryScheduled);
            info!(delay_ms = self.reconnect_delay.as_millis() as u64, "Reconnect scheduled");
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    /// Move frames until the connection ends.
    async fn pump(&mut self, socket: ChatSocket, connection_id: Uuid) -> Closure {
        let (mut sink, mut stream) = socket.split();

        loop {
            tokio::select! {
                outbound = self.outbound_rx.recv() => {
                    let Some(message) = outbound else {
                        let _ = sink.close().await;
                        return Closure::Shutdown;
                    };
                    let frame = match message.to_frame() {
                        Ok(frame) => frame,
                        Err(e) => {
                            error!(%connection_id, error = %e, "Could not serialize outbound frame");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(frame)).await {
                        return Closure::Failed(e.to_string());
                    }
                    self.metrics.record(|m| m.frames_sent += 1);
                }
                inbound = stream.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            self.metrics.record(|m| m.frames_received += 1);
                            self.dispatch_frame(&text, connection_id);
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            self.metrics.record(|m| {
                                m.frames_received += 1;
                                m.malformed_frames += 1;
                            });
                            warn!(%connection_id, len = bytes.len(), "Dropping unexpected binary frame");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                                .unwrap_or_else(|| "closed by server".to_string());
                            return Closure::Clean(reason);
                        }
                        // Ping/pong are answered by tungstenite
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Closure::Failed(e.to_string()),
                        None => return Closure::Clean("stream ended".to_string()),
                    }
                }
            }
        }
    }

    /// Parse one text frame. Bad frames are counted and dropped; the connection stays up.
    fn dispatch_frame(&self, text: &str, connection_id: Uuid) {
        match InboundMessage::parse(text) {
            Ok(message) => {
                debug!(%connection_id, kind = message.kind(), "Inbound frame");
                let _ = self.events_tx.send(SessionEvent::Inbound(message));
            }
            Err(e) => {
                self.metrics.record(|m| m.malformed_frames += 1);
                warn!(%connection_id, error = %e, "Dropping malformed frame");
            }
        }
    }

    /// Frames queued for a socket that died are not replayed on the next one.
    fn discard_stale_frames(&mut self) {
        let mut dropped = 0u64;
        while let Ok(message) = self.outbound_rx.try_recv() {
            warn!(?message, "Discarding frame queued for closed channel");
            dropped += 1;
        }
        if dropped > 0 {
            self.metrics.record(|m| m.stale_frames_dropped += dropped);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    pub(crate) fn session_config(delay_ms: u64) -> SessionConfig {
        SessionConfig { reconnect_delay_ms: delay_ms, outbound_queue: 8 }
    }

    /// Local WebSocket server; every accepted connection is handed to `handler`.
    /// Returns the ws:// URL and the number of TCP connections accepted so far.
    pub(crate) async fn spawn_ws_server<F, Fut>(handler: F) -> (String, Arc<AtomicUsize>)
    where
        F: Fn(WebSocketStream<TcpStream>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        let handler = Arc::new(handler);

        tokio::spawn(async move {
            loop {
                let Ok((tcp, _)) = listener.accept().await else { return };
                counter.fetch_add(1, Ordering::SeqCst);
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Ok(ws) = accept_async(tcp).await {
                        handler(ws).await;
                    }
                });
            }
        });

        (format!("ws://{}", addr), accepted)
    }

    /// Wait until the session reports `Open`, up to `timeout`.
    pub(crate) async fn wait_until_open(session: &SessionManager, timeout: Duration) -> bool {
        let mut rx = session.state_rx.clone();
        let opened = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| *s == ConnectionState::Open)).await,
            Ok(Ok(_))
        );
        opened
    }

    async fn next_inbound(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> InboundMessage {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("timed out waiting for session event")
                .expect("session events closed");
            if let SessionEvent::Inbound(message) = event {
                return message;
            }
        }
    }

    #[test]
    fn test_transition_table() {
        use ConnectionState::*;
        assert_eq!(Closed.next(LinkEvent::Dial), Some(Connecting));
        assert_eq!(Connecting.next(LinkEvent::Opened), Some(Open));
        assert_eq!(Connecting.next(LinkEvent::Failed), Some(Closed));
        assert_eq!(Open.next(LinkEvent::Dropped), Some(Closed));
        assert_eq!(Closed.next(LinkEvent::RetryScheduled), Some(Reconnecting));
        assert_eq!(Reconnecting.next(LinkEvent::Dial), Some(Connecting));

        // Reconnect only ever starts from Closed
        assert_eq!(Open.next(LinkEvent::RetryScheduled), None);
        assert_eq!(Open.next(LinkEvent::Dial), None);
        assert_eq!(Connecting.next(LinkEvent::Dial), None);
    }

    #[tokio::test]
    async fn test_send_before_connect_is_not_connected() {
        let (mut session, _events) =
            SessionManager::new("ws://127.0.0.1:9", &session_config(100), ClientState::new());

        assert_eq!(session.state(), ConnectionState::Closed);
        assert_eq!(session.send(OutboundMessage::text("Hello")), Err(ClientError::NotConnected));

        // Nothing reached the outbound queue
        let parts = session.pending.as_mut().unwrap();
        assert!(parts.outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_frames_flow_and_malformed_frames_are_dropped() {
        let (url, _accepted) = spawn_ws_server(|mut ws| async move {
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let request: serde_json::Value = serde_json::from_str(&text).unwrap();
                let content = request["content"].as_str().unwrap_or_default().to_string();
                ws.send(Message::Text("{ definitely not json".to_string())).await.unwrap();
                let reply = serde_json::json!({
                    "type": "chat_response",
                    "ai_response": format!("echo: {}", content),
                    "conversation_history": [
                        {"role": "user", "content": content},
                        {"role": "assistant", "content": "ok"}
                    ]
                });
                ws.send(Message::Text(reply.to_string())).await.unwrap();
            }
        })
        .await;

        let metrics = ClientState::new();
        let (mut session, mut events) = SessionManager::new(url, &session_config(100), metrics.clone());
        session.connect();
        assert!(wait_until_open(&session, Duration::from_secs(2)).await);

        session.send(OutboundMessage::text("Hello")).unwrap();
        match next_inbound(&mut events).await {
            InboundMessage::ChatResponse { ai_response, .. } => assert_eq!(ai_response, "echo: Hello"),
            other => panic!("unexpected message: {:?}", other),
        }

        assert!(session.is_open());
        let snapshot = metrics.get_metrics_snapshot();
        assert_eq!(snapshot.malformed_frames, 1);
        assert_eq!(snapshot.frames_sent, 1);
        assert_eq!(snapshot.connections_opened, 1);
    }

    #[tokio::test]
    async fn test_binary_frame_is_counted_as_malformed() {
        let (url, _accepted) = spawn_ws_server(|mut ws| async move {
            while let Some(Ok(Message::Text(_))) = ws.next().await {
                ws.send(Message::Binary(vec![0x52, 0x49, 0x46, 0x46])).await.unwrap();
                let reply = serde_json::json!({
                    "type": "history_cleared",
                    "message": "Conversation history cleared"
                });
                ws.send(Message::Text(reply.to_string())).await.unwrap();
            }
        })
        .await;

        let metrics = ClientState::new();
        let (mut session, mut events) = SessionManager::new(url, &session_config(100), metrics.clone());
        session.connect();
        assert!(wait_until_open(&session, Duration::from_secs(2)).await);

        session.send(OutboundMessage::ClearHistory).unwrap();
        assert!(matches!(next_inbound(&mut events).await, InboundMessage::HistoryCleared { .. }));

        // The binary frame was dropped without taking the connection down
        assert!(session.is_open());
        let snapshot = metrics.get_metrics_snapshot();
        assert_eq!(snapshot.frames_received, 2);
        assert_eq!(snapshot.malformed_frames, 1);
        assert_eq!(snapshot.connections_opened, 1);
    }

    #[tokio::test]
    async fn test_frames_queued_for_a_dead_channel_are_discarded() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let metrics = ClientState::new();
        let (mut session, mut events) =
            SessionManager::new(format!("ws://127.0.0.1:{}", port), &session_config(5_000), metrics.clone());

        // Frames already waiting when the channel goes away
        session.outbound_tx.try_send(OutboundMessage::text("first")).unwrap();
        session.outbound_tx.try_send(OutboundMessage::text("second")).unwrap();
        session.connect();

        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("timed out waiting for reconnect")
                .expect("session events closed");
            if event == SessionEvent::StateChanged(ConnectionState::Reconnecting) {
                break;
            }
        }

        let snapshot = metrics.get_metrics_snapshot();
        assert_eq!(snapshot.stale_frames_dropped, 2);
        assert_eq!(snapshot.frames_sent, 0);
        assert_eq!(session.send(OutboundMessage::text("third")), Err(ClientError::NotConnected));
    }

    #[tokio::test]
    async fn test_reconnects_once_per_delay_window() {
        // Server accepts then closes right away
        let (url, accepted) = spawn_ws_server(|mut ws| async move {
            let _ = ws.close(None).await;
        })
        .await;

        let metrics = ClientState::new();
        let (mut session, mut events) = SessionManager::new(url, &session_config(200), metrics.clone());
        session.connect();

        tokio::time::sleep(Duration::from_millis(700)).await;

        let dials = accepted.load(Ordering::SeqCst);
        // t≈0, ≈200, ≈400, ≈600: never more than one dial per 200ms window
        assert!(dials >= 2, "expected at least one reconnect, got {} dials", dials);
        assert!(dials <= 4, "reconnect is busy-retrying: {} dials in 700ms", dials);
        assert!(metrics.get_metrics_snapshot().dial_attempts as usize >= dials);

        let mut saw_reconnecting = false;
        let mut saw_closed_event = false;
        while let Ok(event) = events.try_recv() {
            match event {
                SessionEvent::StateChanged(ConnectionState::Reconnecting) => saw_reconnecting = true,
                SessionEvent::Closed { .. } => saw_closed_event = true,
                _ => {}
            }
        }
        assert!(saw_reconnecting);
        assert!(saw_closed_event);

        session.shutdown();
        assert_eq!(session.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_failed_dial_also_retries_after_delay() {
        // Bind then drop a listener so the port refuses connections
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let metrics = ClientState::new();
        let (mut session, _events) =
            SessionManager::new(format!("ws://127.0.0.1:{}", port), &session_config(150), metrics.clone());
        session.connect();

        tokio::time::sleep(Duration::from_millis(400)).await;
        let dials = metrics.get_metrics_snapshot().dial_attempts;
        assert!((2..=3).contains(&dials), "unexpected dial count {}", dials);
        assert_ne!(session.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let (url, accepted) = spawn_ws_server(|mut ws| async move {
            // Hold the connection open
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let (mut session, _events) = SessionManager::new(url, &session_config(100), ClientState::new());
        session.connect();
        session.connect();
        assert!(wait_until_open(&session, Duration::from_secs(2)).await);
        session.connect();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert!(session.is_open());
    }
}
