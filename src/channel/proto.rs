//! Wire messages for the realtime admin channel.
//!
//! Both directions carry UTF-8 JSON text in a `{"type": ..., "payload": ...}`
//! envelope. Outbound control messages are a closed set; inbound kinds are
//! open-ended, with the well-known ones listed in [`kinds`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved inbound kind acknowledging a heartbeat. Consumed by the channel
/// and never forwarded to handlers.
pub const HEARTBEAT_ACK: &str = "heartbeat_ack";

/// Server error code signalling an expired authentication token.
pub const AUTH_EXPIRED_CODE: i64 = 40101;
/// Server error code signalling a missing permission.
pub const PERMISSION_DENIED_CODE: i64 = 40001;

/// Well-known inbound message kinds emitted by the admin realtime endpoint.
pub mod kinds {
    /// Full dashboard statistics snapshot.
    pub const DASHBOARD_UPDATE: &str = "dashboard_update";
    /// Full connected-clients snapshot.
    pub const CLIENTS_UPDATE: &str = "clients_update";
    /// Full relay-sessions snapshot.
    pub const SESSIONS_UPDATE: &str = "sessions_update";
    /// A single client connected to the hub.
    pub const CLIENT_CONNECTED: &str = "client_connected";
    /// A single client disconnected from the hub.
    pub const CLIENT_DISCONNECTED: &str = "client_disconnected";
    /// A relay session was established.
    pub const SESSION_CREATED: &str = "session_created";
    /// A relay session was terminated.
    pub const SESSION_TERMINATED: &str = "session_terminated";
    /// An APDU was relayed between two clients.
    pub const APDU_RELAYED: &str = "apdu_relayed";
    /// Server-side error report.
    pub const ERROR: &str = "error";
}

/// One inbound or outbound message on the channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind, used to route to registered handlers.
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque message body; `null` when the server sends none.
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Creates an envelope from a kind and payload.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Parses an envelope from wire text.
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serializes the envelope to wire text.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Whether this is the reserved heartbeat acknowledgement.
    pub fn is_heartbeat_ack(&self) -> bool {
        self.kind == HEARTBEAT_ACK
    }
}

/// Outbound control messages owned by the channel itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Periodic liveness signal.
    Heartbeat,
    /// Asks the server to push fresh snapshots of all admin state.
    RequestStatusUpdate,
}

impl ControlMessage {
    /// Serializes the control message to wire text.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Role a client plays in a relay pairing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Presents a card to be relayed.
    Provider,
    /// Consumes a relayed card.
    Receiver,
    /// Connected but not paired into either role.
    #[default]
    None,
}

/// Lifecycle state of a relay session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Both participants joined; APDUs flow.
    Paired,
    /// One participant is waiting for its peer.
    #[default]
    Waiting,
    /// Session ended.
    Terminated,
}

/// Dashboard statistics pushed by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSnapshot {
    pub hub_status: String,
    pub active_connections: u64,
    pub active_sessions: u64,
    pub apdu_relayed_last_minute: u64,
    pub apdu_errors_last_hour: u64,
    pub connection_trend: Vec<u64>,
    pub session_trend: Vec<u64>,
    pub system_load: f64,
    pub memory_usage: f64,
    pub avg_response_time: f64,
}

impl Default for DashboardSnapshot {
    fn default() -> Self {
        Self {
            hub_status: "offline".to_string(),
            active_connections: 0,
            active_sessions: 0,
            apdu_relayed_last_minute: 0,
            apdu_errors_last_hour: 0,
            connection_trend: Vec::new(),
            session_trend: Vec::new(),
            system_load: 0.0,
            memory_usage: 0.0,
            avg_response_time: 0.0,
        }
    }
}

/// One connected client as reported by the hub.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(default)]
    pub client_id: String,
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: ClientRole,
    pub ip_address: Option<String>,
    pub connected_at: Option<String>,
    pub session_id: Option<String>,
}

impl ClientInfo {
    /// Human-facing label: display name when present, client id otherwise.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.client_id)
    }
}

/// Connected-clients snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientsSnapshot {
    pub list: Vec<ClientInfo>,
    pub total: u64,
    pub online_count: u64,
    pub provider_count: u64,
    pub receiver_count: u64,
}

/// One relay session as reported by the hub.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub session_id: String,
    pub provider_client_id: Option<String>,
    pub provider_display_name: Option<String>,
    pub receiver_client_id: Option<String>,
    pub receiver_display_name: Option<String>,
    #[serde(default)]
    pub status: SessionStatus,
    pub created_at: Option<String>,
}

/// Relay-sessions snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsSnapshot {
    pub list: Vec<SessionInfo>,
    pub total: u64,
    pub paired_count: u64,
    pub waiting_count: u64,
}

/// One relayed APDU notification.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApduEvent {
    pub session_id: Option<String>,
    pub direction: Option<String>,
    #[serde(default)]
    pub length: u64,
}

/// Server error report carried in an `error` envelope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPayload {
    pub code: i64,
    pub message: String,
}

impl ErrorPayload {
    /// Maps the numeric code onto the consumer-facing category.
    pub fn kind(&self) -> ErrorKind {
        match self.code {
            AUTH_EXPIRED_CODE => ErrorKind::AuthExpired,
            PERMISSION_DENIED_CODE => ErrorKind::PermissionDenied,
            other => ErrorKind::Other(other),
        }
    }
}

/// Consumer-facing categories for server error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Authentication expired; the consumer should re-authenticate.
    AuthExpired,
    /// The authenticated user lacks the required permission.
    PermissionDenied,
    /// Any other server-reported error code.
    Other(i64),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn heartbeat_serializes_to_bare_type_object() {
        let text = ControlMessage::Heartbeat.to_text().expect("serialize");
        assert_eq!(text, r#"{"type":"heartbeat"}"#);
    }

    #[test]
    fn status_request_serializes_to_bare_type_object() {
        let text = ControlMessage::RequestStatusUpdate
            .to_text()
            .expect("serialize");
        assert_eq!(text, r#"{"type":"request_status_update"}"#);
    }

    #[test]
    fn envelope_without_payload_defaults_to_null() {
        let envelope = Envelope::from_text(r#"{"type":"heartbeat_ack"}"#).expect("parse");
        assert!(envelope.is_heartbeat_ack());
        assert!(envelope.payload.is_null());
    }

    #[test]
    fn envelope_round_trips_with_payload() {
        let envelope = Envelope::new("dashboard_update", json!({"active_connections": 5}));
        let text = envelope.to_text().expect("serialize");
        let decoded = Envelope::from_text(&text).expect("parse");
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn error_codes_map_to_categories() {
        let auth = ErrorPayload {
            code: AUTH_EXPIRED_CODE,
            message: "token expired".to_string(),
        };
        assert_eq!(auth.kind(), ErrorKind::AuthExpired);

        let denied = ErrorPayload {
            code: PERMISSION_DENIED_CODE,
            message: "forbidden".to_string(),
        };
        assert_eq!(denied.kind(), ErrorKind::PermissionDenied);

        let other = ErrorPayload {
            code: 50000,
            message: "boom".to_string(),
        };
        assert_eq!(other.kind(), ErrorKind::Other(50000));
    }

    #[test]
    fn dashboard_snapshot_tolerates_partial_payload() {
        let snapshot: DashboardSnapshot = serde_json::from_value(json!({
            "hub_status": "online",
            "active_connections": 12,
            "active_sessions": 4
        }))
        .expect("parse partial dashboard");

        assert_eq!(snapshot.hub_status, "online");
        assert_eq!(snapshot.active_connections, 12);
        assert_eq!(snapshot.apdu_relayed_last_minute, 0);
        assert!(snapshot.connection_trend.is_empty());
    }

    #[test]
    fn client_info_parses_wire_shape() {
        let client: ClientInfo = serde_json::from_value(json!({
            "client_id": "client-0001-abcdef",
            "display_name": "Pixel 8 Pro",
            "role": "provider",
            "ip_address": "192.168.3.17",
            "session_id": null
        }))
        .expect("parse client");

        assert_eq!(client.role, ClientRole::Provider);
        assert_eq!(client.label(), "Pixel 8 Pro");
        assert!(client.session_id.is_none());
    }

    #[test]
    fn client_label_falls_back_to_client_id() {
        let client = ClientInfo {
            client_id: "client-0002".to_string(),
            ..ClientInfo::default()
        };
        assert_eq!(client.label(), "client-0002");
    }

    #[test]
    fn sessions_snapshot_parses_wire_shape() {
        let snapshot: SessionsSnapshot = serde_json::from_value(json!({
            "list": [{
                "session_id": "session-0001",
                "provider_client_id": "client-provider-001",
                "receiver_client_id": "client-receiver-001",
                "status": "paired"
            }],
            "total": 1,
            "paired_count": 1,
            "waiting_count": 0
        }))
        .expect("parse sessions");

        assert_eq!(snapshot.list.len(), 1);
        assert_eq!(snapshot.list[0].status, SessionStatus::Paired);
    }
}
