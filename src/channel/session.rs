//! Stateful view over the realtime channel.
//!
//! [`AdminSession`] taps every envelope a [`Channel`] dispatches, keeps the
//! latest dashboard, client, and session snapshots, and surfaces each message
//! as a typed [`AdminEvent`]. The channel stays usable directly; the session
//! is an optional convenience for consumers that want materialized state.

use std::time::SystemTime;

use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::channel::client::Channel;
use crate::channel::proto::{
    kinds, ApduEvent, ClientInfo, ClientsSnapshot, DashboardSnapshot, Envelope, ErrorKind,
    ErrorPayload, SessionInfo, SessionStatus, SessionsSnapshot,
};
use crate::channel::registry::{EnvelopeHandler, HandlerRegistry};

/// Typed event derived from one inbound envelope.
#[derive(Clone, Debug, PartialEq)]
pub enum AdminEvent {
    /// Dashboard statistics snapshot replaced.
    DashboardUpdated,
    /// Connected-clients snapshot replaced.
    ClientsUpdated,
    /// Relay-sessions snapshot replaced.
    SessionsUpdated,
    /// A client connected; the tracked client list was updated.
    ClientConnected(ClientInfo),
    /// A client disconnected; the tracked client list was updated.
    ClientDisconnected(ClientInfo),
    /// A relay session was established.
    SessionCreated(SessionInfo),
    /// A relay session ended.
    SessionTerminated(SessionInfo),
    /// An APDU was relayed; the dashboard counter was bumped.
    ApduRelayed(ApduEvent),
    /// The server reported an error.
    ServerError(ErrorPayload),
    /// Any other message, or a well-known kind whose payload did not parse.
    Message(Envelope),
}

/// Materialized admin state fed by a channel's message stream.
pub struct AdminSession {
    registry: Arc<HandlerRegistry>,
    tap: EnvelopeHandler,
    events: mpsc::UnboundedReceiver<Envelope>,
    dashboard: DashboardSnapshot,
    clients: ClientsSnapshot,
    sessions: SessionsSnapshot,
    last_update: Option<SystemTime>,
}

impl AdminSession {
    /// Attaches a session to a channel.
    ///
    /// Registers a wildcard tap on the channel's registry; the tap is removed
    /// again when the session is dropped. Handlers registered directly on the
    /// channel are unaffected.
    pub fn attach(channel: &Channel) -> Self {
        let (event_tx, events) = mpsc::unbounded_channel();
        let tap: EnvelopeHandler = Arc::new(move |envelope: &Envelope| {
            // Receiver gone means the session was dropped mid-dispatch.
            let _ = event_tx.send(envelope.clone());
            Ok(())
        });

        let registry = Arc::clone(channel.registry());
        registry.subscribe_any(Arc::clone(&tap));

        Self {
            registry,
            tap,
            events,
            dashboard: DashboardSnapshot::default(),
            clients: ClientsSnapshot::default(),
            sessions: SessionsSnapshot::default(),
            last_update: None,
        }
    }

    /// Waits for the next inbound message, folds it into the tracked state,
    /// and returns the typed event.
    pub async fn recv(&mut self) -> Option<AdminEvent> {
        let envelope = self.events.recv().await?;
        Some(self.apply(envelope))
    }

    /// Latest dashboard statistics.
    pub fn dashboard(&self) -> &DashboardSnapshot {
        &self.dashboard
    }

    /// Latest connected-clients snapshot.
    pub fn clients(&self) -> &ClientsSnapshot {
        &self.clients
    }

    /// Latest relay-sessions snapshot.
    pub fn sessions(&self) -> &SessionsSnapshot {
        &self.sessions
    }

    /// When the tracked state last changed.
    pub fn last_update(&self) -> Option<SystemTime> {
        self.last_update
    }

    fn apply(&mut self, envelope: Envelope) -> AdminEvent {
        let event = match envelope.kind.as_str() {
            kinds::DASHBOARD_UPDATE => parse_payload(&envelope).map(|snapshot| {
                self.dashboard = snapshot;
                AdminEvent::DashboardUpdated
            }),
            kinds::CLIENTS_UPDATE => parse_payload(&envelope).map(|snapshot| {
                self.clients = snapshot;
                AdminEvent::ClientsUpdated
            }),
            kinds::SESSIONS_UPDATE => parse_payload(&envelope).map(|snapshot| {
                self.sessions = snapshot;
                AdminEvent::SessionsUpdated
            }),
            kinds::CLIENT_CONNECTED => parse_payload(&envelope).map(|client: ClientInfo| {
                self.upsert_client(client.clone());
                AdminEvent::ClientConnected(client)
            }),
            kinds::CLIENT_DISCONNECTED => parse_payload(&envelope).map(|client: ClientInfo| {
                self.remove_client(&client.client_id);
                AdminEvent::ClientDisconnected(client)
            }),
            kinds::SESSION_CREATED => parse_payload(&envelope).map(|session: SessionInfo| {
                self.upsert_session(session.clone());
                AdminEvent::SessionCreated(session)
            }),
            kinds::SESSION_TERMINATED => parse_payload(&envelope).map(|session: SessionInfo| {
                self.terminate_session(&session.session_id);
                AdminEvent::SessionTerminated(session)
            }),
            kinds::APDU_RELAYED => parse_payload(&envelope).map(|apdu: ApduEvent| {
                self.dashboard.apdu_relayed_last_minute =
                    self.dashboard.apdu_relayed_last_minute.saturating_add(1);
                AdminEvent::ApduRelayed(apdu)
            }),
            kinds::ERROR => parse_payload(&envelope).map(|payload: ErrorPayload| {
                match payload.kind() {
                    ErrorKind::AuthExpired => {
                        error!(event = "session_auth_expired", message = %payload.message);
                    }
                    ErrorKind::PermissionDenied => {
                        warn!(event = "session_permission_denied", message = %payload.message);
                    }
                    ErrorKind::Other(code) => {
                        warn!(event = "session_server_error", code, message = %payload.message);
                    }
                }
                AdminEvent::ServerError(payload)
            }),
            _ => None,
        };

        match event {
            Some(event) => {
                self.last_update = Some(SystemTime::now());
                event
            }
            None => AdminEvent::Message(envelope),
        }
    }

    fn upsert_client(&mut self, client: ClientInfo) {
        match self
            .clients
            .list
            .iter_mut()
            .find(|existing| existing.client_id == client.client_id)
        {
            Some(existing) => *existing = client,
            None => self.clients.list.push(client),
        }
        self.clients.total = self.clients.list.len() as u64;
    }

    fn remove_client(&mut self, client_id: &str) {
        self.clients
            .list
            .retain(|existing| existing.client_id != client_id);
        self.clients.total = self.clients.list.len() as u64;
    }

    fn upsert_session(&mut self, session: SessionInfo) {
        match self
            .sessions
            .list
            .iter_mut()
            .find(|existing| existing.session_id == session.session_id)
        {
            Some(existing) => *existing = session,
            None => self.sessions.list.push(session),
        }
        self.sessions.total = self.sessions.list.len() as u64;
    }

    fn terminate_session(&mut self, session_id: &str) {
        if let Some(session) = self
            .sessions
            .list
            .iter_mut()
            .find(|existing| existing.session_id == session_id)
        {
            session.status = SessionStatus::Terminated;
        }
    }
}

impl Drop for AdminSession {
    fn drop(&mut self) {
        self.registry.unsubscribe_any(&self.tap);
    }
}

impl std::fmt::Debug for AdminSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSession")
            .field("clients", &self.clients.total)
            .field("sessions", &self.sessions.total)
            .field("last_update", &self.last_update)
            .finish()
    }
}

fn parse_payload<T: DeserializeOwned>(envelope: &Envelope) -> Option<T> {
    match serde_json::from_value(envelope.payload.clone()) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(event = "session_payload_invalid", kind = %envelope.kind, error = %err);
            None
        }
    }
}
