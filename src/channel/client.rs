//! Realtime admin channel client.
//!
//! A [`Channel`] owns one websocket connection to the admin realtime
//! endpoint, reconnects with exponential backoff after unexpected drops,
//! emits a periodic heartbeat, and dispatches inbound envelopes to the
//! handlers registered on it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::backoff::ReconnectPolicy;
use crate::channel::proto::{ControlMessage, Envelope};
use crate::channel::registry::{EnvelopeHandler, HandlerError, HandlerRegistry, MessageHandler};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_STATUS_REQUEST_DELAY: Duration = Duration::from_millis(200);

/// Header carrying the admin auth token during the websocket handshake.
pub const AUTH_TOKEN_HEADER: &str = "x-admin-token";

/// Connection lifecycle state of a [`Channel`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChannelState {
    /// No transport open and no connection attempt in progress.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Transport open; messages flow.
    Connected,
    /// The last connection attempt failed; a reconnect may be pending.
    Error,
    /// Reconnect attempts are exhausted. Terminal until `connect()` is
    /// invoked again.
    Failed,
}

/// Configuration for a realtime channel.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// The websocket URL (ws:// or wss://).
    pub url: String,
    /// Admin auth token sent as [`AUTH_TOKEN_HEADER`] during the handshake.
    pub auth_token: Option<SecretString>,
    /// Reconnect schedule applied after unexpected closures.
    pub reconnect: ReconnectPolicy,
    /// Interval between outbound heartbeat messages.
    pub heartbeat_interval: Duration,
    /// Drop the connection when a heartbeat goes unacknowledged for a full
    /// interval. The original web console configured a pong wait but never
    /// enforced it; this client enforces it unless switched off.
    pub enforce_heartbeat_ack: bool,
    /// Delay after open before the initial `request_status_update` send.
    pub status_request_delay: Duration,
}

impl ChannelConfig {
    /// Creates a configuration for the given endpoint with default policies.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            enforce_heartbeat_ack: true,
            status_request_delay: DEFAULT_STATUS_REQUEST_DELAY,
        }
    }

    /// Sets the admin auth token.
    pub fn auth_token(mut self, token: SecretString) -> Self {
        self.auth_token = Some(token);
        self
    }

    /// Sets the reconnect schedule.
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Sets the heartbeat interval.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Enables or disables enforced heartbeat acknowledgement.
    pub fn enforce_heartbeat_ack(mut self, enforce: bool) -> Self {
        self.enforce_heartbeat_ack = enforce;
        self
    }

    /// Sets the delay before the initial status request.
    pub fn status_request_delay(mut self, delay: Duration) -> Self {
        self.status_request_delay = delay;
        self
    }
}

/// Errors produced while establishing or driving the channel transport.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Websocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Auth token could not be converted to a valid HTTP header value.
    #[error("invalid auth token header: {0}")]
    InvalidAuthHeader(#[from] InvalidHeaderValue),
}

enum Command {
    Send(String),
    Close,
}

enum SessionEnd {
    /// Caller-initiated close; do not reconnect.
    Shutdown,
    /// Unexpected closure or transport error; reconnect policy applies.
    Lost,
}

struct ChannelShared {
    state_tx: watch::Sender<ChannelState>,
    command_tx: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    running: AtomicBool,
    // Bumped on every connect() so a worker winding down after a
    // disconnect/connect pair cannot clobber its successor's shared state.
    generation: AtomicU64,
    dropped_sends: AtomicU64,
}

impl ChannelShared {
    fn set_state(&self, next: ChannelState) {
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }

    fn note_dropped_send(&self, reason: &'static str) {
        self.dropped_sends.fetch_add(1, Ordering::Relaxed);
        warn!(event = "channel_send_dropped", reason);
    }

    fn finish_worker(&self, generation: u64, final_state: ChannelState) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        if let Ok(mut slot) = self.command_tx.lock() {
            *slot = None;
        }
        self.running.store(false, Ordering::SeqCst);
        self.set_state(final_state);
    }
}

/// Persistent realtime connection to the admin endpoint.
///
/// The channel is an explicit instance owned by the composing application;
/// consumers receive a reference rather than reaching for a process-wide
/// singleton. At most one transport exists per channel at any time.
///
/// # Example
///
/// ```ignore
/// let channel = Channel::new(ChannelConfig::new("wss://hub.example/ws/nfc-relay/realtime"));
/// let _sub = channel.subscribe("dashboard_update", |payload| {
///     println!("dashboard: {payload}");
///     Ok(())
/// });
/// channel.connect();
/// ```
pub struct Channel {
    config: ChannelConfig,
    registry: Arc<HandlerRegistry>,
    shared: Arc<ChannelShared>,
}

impl Channel {
    /// Creates a channel in the `Disconnected` state.
    pub fn new(config: ChannelConfig) -> Self {
        let (state_tx, _) = watch::channel(ChannelState::Disconnected);
        Self {
            config,
            registry: Arc::new(HandlerRegistry::new()),
            shared: Arc::new(ChannelShared {
                state_tx,
                command_tx: Mutex::new(None),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                dropped_sends: AtomicU64::new(0),
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        *self.shared.state_tx.borrow()
    }

    /// Whether the channel is currently connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Watch receiver notified on every state transition.
    ///
    /// The transition to [`ChannelState::Failed`] is published exactly once
    /// per exhaustion.
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.shared.state_tx.subscribe()
    }

    /// Number of outbound messages dropped because the channel was not
    /// connected.
    pub fn dropped_sends(&self) -> u64 {
        self.shared.dropped_sends.load(Ordering::Relaxed)
    }

    /// Opens the connection.
    ///
    /// No-op while a connection is already open or in progress. Must be
    /// called within a Tokio runtime; the transport is driven by a spawned
    /// worker task. After a terminal [`ChannelState::Failed`], calling
    /// `connect()` again starts a fresh attempt cycle.
    pub fn connect(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            debug!(event = "channel_connect_ignored", state = ?self.state());
            return;
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        if let Ok(mut slot) = self.shared.command_tx.lock() {
            *slot = Some(command_tx);
        }

        tokio::spawn(channel_worker(
            self.config.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.shared),
            generation,
            command_rx,
        ));
    }

    /// Closes the connection and cancels any pending reconnect. Idempotent.
    pub fn disconnect(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.shared.command_tx.lock() {
            if let Some(tx) = slot.take() {
                let _ = tx.send(Command::Close);
            }
        }
    }

    /// Sends an envelope if the channel is connected.
    ///
    /// Never errors and never queues: when the channel is not connected the
    /// message is dropped, logged, and counted in [`Self::dropped_sends`].
    pub fn send(&self, message: Envelope) {
        if self.state() != ChannelState::Connected {
            debug!(event = "channel_send_skipped", kind = %message.kind);
            self.shared.note_dropped_send("not connected");
            return;
        }

        let text = match message.to_text() {
            Ok(text) => text,
            Err(err) => {
                warn!(event = "channel_send_unserializable", kind = %message.kind, error = %err);
                self.shared.note_dropped_send("unserializable");
                return;
            }
        };

        let delivered = match self.shared.command_tx.lock() {
            Ok(slot) => slot
                .as_ref()
                .map(|tx| tx.send(Command::Send(text)).is_ok())
                .unwrap_or(false),
            Err(_) => false,
        };
        if !delivered {
            self.shared.note_dropped_send("worker unavailable");
        }
    }

    /// Asks the server to push fresh snapshots of all admin state.
    pub fn request_status_update(&self) {
        self.send(Envelope::new("request_status_update", Value::Null));
    }

    /// Registers a handler for one message kind.
    ///
    /// Returns the registered handle; pass it to [`Self::unsubscribe`] to
    /// remove exactly this registration.
    pub fn subscribe<F>(&self, kind: &str, handler: F) -> MessageHandler
    where
        F: Fn(&Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let handler: MessageHandler = Arc::new(handler);
        self.registry.subscribe(kind, Arc::clone(&handler));
        handler
    }

    /// Removes a previously registered handler. Other handlers for the same
    /// kind are left intact.
    pub fn unsubscribe(&self, kind: &str, handler: &MessageHandler) -> bool {
        self.registry.unsubscribe(kind, handler)
    }

    /// Registers a wildcard handler receiving every non-heartbeat envelope.
    pub fn subscribe_any<F>(&self, handler: F) -> EnvelopeHandler
    where
        F: Fn(&Envelope) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let handler: EnvelopeHandler = Arc::new(handler);
        self.registry.subscribe_any(Arc::clone(&handler));
        handler
    }

    /// Removes a previously registered wildcard handler.
    pub fn unsubscribe_any(&self, handler: &EnvelopeHandler) -> bool {
        self.registry.unsubscribe_any(handler)
    }

    pub(crate) fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("url", &self.config.url)
            .field("state", &self.state())
            .finish()
    }
}

async fn channel_worker(
    config: ChannelConfig,
    registry: Arc<HandlerRegistry>,
    shared: Arc<ChannelShared>,
    generation: u64,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut attempt: u32 = 0;

    loop {
        shared.set_state(ChannelState::Connecting);

        match connect_transport(&config).await {
            Ok(socket) => {
                attempt = 0;
                shared.set_state(ChannelState::Connected);
                info!(event = "channel_connected", url = %config.url);

                match run_connected(socket, &config, &registry, &shared, &mut command_rx).await {
                    SessionEnd::Shutdown => {
                        shared.finish_worker(generation, ChannelState::Disconnected);
                        return;
                    }
                    SessionEnd::Lost => {
                        warn!(event = "channel_connection_lost", url = %config.url);
                        shared.set_state(ChannelState::Disconnected);
                    }
                }
            }
            Err(err) => {
                warn!(event = "channel_connect_failed", url = %config.url, error = %err);
                shared.set_state(ChannelState::Error);
            }
        }

        if !shared.running.load(Ordering::SeqCst) {
            shared.finish_worker(generation, ChannelState::Disconnected);
            return;
        }

        if attempt >= config.reconnect.max_attempts {
            error!(
                event = "channel_reconnect_exhausted",
                attempts = attempt,
                url = %config.url
            );
            shared.finish_worker(generation, ChannelState::Failed);
            return;
        }

        attempt += 1;
        let delay = config.reconnect.delay_for_attempt(attempt);
        debug!(
            event = "channel_reconnect_scheduled",
            attempt,
            max_attempts = config.reconnect.max_attempts,
            delay_ms = delay.as_millis() as u64
        );

        if !wait_for_reconnect(delay, &mut command_rx, &shared).await {
            shared.finish_worker(generation, ChannelState::Disconnected);
            return;
        }
    }
}

async fn connect_transport(config: &ChannelConfig) -> Result<WsStream, ChannelError> {
    let request = build_request(config)?;
    let (socket, _response) = connect_async(request).await?;
    Ok(socket)
}

fn build_request(config: &ChannelConfig) -> Result<Request, ChannelError> {
    let mut request = config.url.as_str().into_client_request()?;
    if let Some(token) = config.auth_token.as_ref() {
        let value: HeaderValue = token.expose_secret().parse()?;
        request.headers_mut().insert(AUTH_TOKEN_HEADER, value);
    }
    Ok(request)
}

async fn run_connected(
    mut socket: WsStream,
    config: &ChannelConfig,
    registry: &HandlerRegistry,
    shared: &ChannelShared,
    command_rx: &mut mpsc::UnboundedReceiver<Command>,
) -> SessionEnd {
    let mut heartbeat = interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    let mut awaiting_ack = false;

    // Primes consumer state once, shortly after open.
    let status_nudge = tokio::time::sleep(config.status_request_delay);
    tokio::pin!(status_nudge);
    let mut status_requested = false;

    loop {
        tokio::select! {
            _ = &mut status_nudge, if !status_requested => {
                status_requested = true;
                if send_control(&mut socket, &ControlMessage::RequestStatusUpdate)
                    .await
                    .is_err()
                {
                    return SessionEnd::Lost;
                }
            }

            _ = heartbeat.tick() => {
                if awaiting_ack && config.enforce_heartbeat_ack {
                    warn!(
                        event = "channel_heartbeat_ack_missed",
                        interval_ms = config.heartbeat_interval.as_millis() as u64
                    );
                    let _ = socket.close(None).await;
                    return SessionEnd::Lost;
                }
                if send_control(&mut socket, &ControlMessage::Heartbeat).await.is_err() {
                    return SessionEnd::Lost;
                }
                awaiting_ack = true;
            }

            command = command_rx.recv() => match command {
                Some(Command::Send(text)) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = socket
                        .close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client disconnect".into(),
                        }))
                        .await;
                    return SessionEnd::Shutdown;
                }
            },

            frame = socket.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    dispatch_text(&text, registry, &mut awaiting_ack);
                }
                Some(Ok(Message::Ping(payload))) => {
                    if socket.send(Message::Pong(payload)).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                Some(Ok(_)) => {
                    // The protocol is text-only; other frames are dropped.
                    warn!(event = "channel_unexpected_frame");
                }
                Some(Err(err)) => {
                    warn!(event = "channel_transport_error", error = %err);
                    return SessionEnd::Lost;
                }
            },
        }
    }
}

async fn send_control(socket: &mut WsStream, message: &ControlMessage) -> Result<(), ChannelError> {
    let text = message.to_text()?;
    socket.send(Message::Text(text)).await?;
    Ok(())
}

fn dispatch_text(text: &str, registry: &HandlerRegistry, awaiting_ack: &mut bool) {
    match Envelope::from_text(text) {
        Ok(envelope) => {
            if envelope.is_heartbeat_ack() {
                *awaiting_ack = false;
                return;
            }
            registry.dispatch(&envelope);
        }
        Err(err) => {
            // Malformed frames are discarded; the connection stays up.
            error!(event = "channel_message_malformed", error = %err);
        }
    }
}

async fn wait_for_reconnect(
    delay: Duration,
    command_rx: &mut mpsc::UnboundedReceiver<Command>,
    shared: &ChannelShared,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            command = command_rx.recv() => match command {
                Some(Command::Send(_)) => {
                    shared.note_dropped_send("reconnect pending");
                }
                Some(Command::Close) | None => return false,
            },
        }
    }
}
