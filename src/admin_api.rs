//! HTTP client for the NFC relay admin REST endpoints.
//!
//! Every endpoint responds with a `{"code": ..., "data": ..., "msg": ...}`
//! envelope where `code == 0` means success. Transient transport failures
//! and 5xx responses are retried per [`RetryPolicy`].

use std::time::Duration;

use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::backoff::{retry_async, RetryPolicy};
use crate::channel::proto::{ClientInfo, ClientRole, DashboardSnapshot, SessionInfo};

const ERROR_BODY_SNIPPET_LEN: usize = 220;

/// Path prefix of the admin API, appended to the configured server origin.
pub const ADMIN_API_BASE_PATH: &str = "/admin/nfc-relay/v1";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AdminApiDefaults;

impl AdminApiDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
    pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
}

#[derive(Clone, Debug)]
pub struct AdminApiClientOptions {
    pub connect_timeout: Duration,
    pub attempt_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for AdminApiClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: AdminApiDefaults::CONNECT_TIMEOUT,
            attempt_timeout: AdminApiDefaults::ATTEMPT_TIMEOUT,
            retry_policy: RetryPolicy::interactive(),
        }
    }
}

/// Client for the admin REST surface.
#[derive(Clone)]
pub struct AdminApiClient {
    http: Client,
    origin: String,
    auth_token: Option<SecretString>,
    attempt_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl AdminApiClient {
    /// Builds a client for the given server origin, e.g. `https://hub.example`.
    pub fn new(origin: impl Into<String>) -> Result<Self, AdminApiError> {
        Self::with_options(origin, None, AdminApiClientOptions::default())
    }

    /// Builds a client that sends the admin auth token with every request.
    pub fn with_auth_token(
        origin: impl Into<String>,
        auth_token: SecretString,
    ) -> Result<Self, AdminApiError> {
        Self::with_options(origin, Some(auth_token), AdminApiClientOptions::default())
    }

    pub fn with_options(
        origin: impl Into<String>,
        auth_token: Option<SecretString>,
        options: AdminApiClientOptions,
    ) -> Result<Self, AdminApiError> {
        let http = Client::builder()
            .no_proxy()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(AdminApiError::Transport)?;

        let mut origin = origin.into();
        while origin.ends_with('/') {
            origin.pop();
        }

        Ok(Self {
            http,
            origin,
            auth_token,
            attempt_timeout: options.attempt_timeout,
            retry_policy: options.retry_policy,
        })
    }

    /// Fetches the enhanced dashboard statistics snapshot.
    pub async fn dashboard_stats(&self) -> Result<DashboardSnapshot, AdminApiError> {
        self.get("/dashboard-stats-enhanced", None::<&()>).await
    }

    /// Lists connected clients with pagination and filters.
    pub async fn list_clients(
        &self,
        query: &ListClientsQuery,
    ) -> Result<Paged<ClientInfo>, AdminApiError> {
        self.get("/clients", Some(query)).await
    }

    /// Fetches detail for one connected client.
    pub async fn client_details(&self, client_id: &str) -> Result<ClientInfo, AdminApiError> {
        self.get(&format!("/clients/{client_id}/details"), None::<&()>)
            .await
    }

    /// Forcibly disconnects one client from the hub.
    pub async fn disconnect_client(&self, client_id: &str) -> Result<(), AdminApiError> {
        self.post_action(&format!("/clients/{client_id}/disconnect"), None::<&()>)
            .await
    }

    /// Lists relay sessions with pagination and filters.
    pub async fn list_sessions(
        &self,
        query: &ListSessionsQuery,
    ) -> Result<Paged<SessionInfo>, AdminApiError> {
        self.get("/sessions", Some(query)).await
    }

    /// Fetches detail for one relay session.
    pub async fn session_details(&self, session_id: &str) -> Result<SessionInfo, AdminApiError> {
        self.get(&format!("/sessions/{session_id}/details"), None::<&()>)
            .await
    }

    /// Forcibly terminates one relay session.
    pub async fn terminate_session(
        &self,
        session_id: &str,
        reason: Option<String>,
    ) -> Result<(), AdminApiError> {
        let body = TerminateSessionRequest { reason };
        self.post_action(&format!("/sessions/{session_id}/terminate"), Some(&body))
            .await
    }

    /// Queries the audit log.
    pub async fn audit_logs(
        &self,
        query: &AuditLogQuery,
    ) -> Result<Paged<AuditLogEntry>, AdminApiError> {
        self.get("/audit-logs", Some(query)).await
    }

    async fn get<Q, T>(&self, path: &str, query: Option<&Q>) -> Result<T, AdminApiError>
    where
        Q: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let endpoint = self.endpoint(path);
        let policy = self.retry_policy.clone();

        let body = retry_async(
            &policy,
            |_| {
                let endpoint = endpoint.clone();
                async move {
                    let mut builder = self.http.get(&endpoint).timeout(self.attempt_timeout);
                    if let Some(query) = query {
                        builder = builder.query(query);
                    }
                    self.send_attempt(builder).await
                }
            },
            AdminApiError::is_retryable,
        )
        .await?;

        parse_envelope(&body)
    }

    async fn post_action<B>(&self, path: &str, body: Option<&B>) -> Result<(), AdminApiError>
    where
        B: Serialize + ?Sized,
    {
        let endpoint = self.endpoint(path);
        let policy = self.retry_policy.clone();

        let response = retry_async(
            &policy,
            |_| {
                let endpoint = endpoint.clone();
                async move {
                    let mut builder = self.http.post(&endpoint).timeout(self.attempt_timeout);
                    if let Some(body) = body {
                        builder = builder.json(body);
                    }
                    self.send_attempt(builder).await
                }
            },
            AdminApiError::is_retryable,
        )
        .await?;

        ensure_envelope_ok(&response)
    }

    async fn send_attempt(
        &self,
        mut builder: reqwest::RequestBuilder,
    ) -> Result<String, AdminApiError> {
        if let Some(token) = self.auth_token.as_ref() {
            builder = builder.header("x-admin-token", token.expose_secret());
        }

        let response = builder.send().await.map_err(AdminApiError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(AdminApiError::Transport)?;

        if !status.is_success() {
            return Err(AdminApiError::HttpStatus {
                status,
                body: summarize_error_body(&body),
            });
        }

        Ok(body)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}{}", self.origin, ADMIN_API_BASE_PATH, path)
    }
}

impl std::fmt::Debug for AdminApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminApiClient")
            .field("origin", &self.origin)
            .field("authenticated", &self.auth_token.is_some())
            .finish()
    }
}

/// Pagination query for the clients list.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListClientsQuery {
    pub page: u64,
    pub page_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ClientRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Default for ListClientsQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 10,
            keyword: None,
            role: None,
            status: None,
        }
    }
}

/// Pagination query for the sessions list.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsQuery {
    pub page: u64,
    pub page_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Default for ListSessionsQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 10,
            keyword: None,
            status: None,
        }
    }
}

/// Filter query for the audit log.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
}

/// One page of a listed collection.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    #[serde(default)]
    pub list: Vec<T>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub page: u64,
    #[serde(default)]
    pub page_size: u64,
}

/// One audit log record.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuditLogEntry {
    pub timestamp: String,
    pub event_type: String,
    pub session_id: Option<String>,
    pub client_id_initiator: Option<String>,
    pub client_id_responder: Option<String>,
    pub user_id: Option<String>,
    pub details: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct TerminateSessionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Debug, Error)]
pub enum AdminApiError {
    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    #[error("http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("admin api code {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl AdminApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_timeout() || err.is_connect(),
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Api { .. } | Self::Parse(_) => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    code: i64,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    msg: String,
}

fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<T, AdminApiError> {
    let envelope = decode_envelope(body)?;
    serde_json::from_value(envelope.data).map_err(|err| AdminApiError::Parse(err.to_string()))
}

fn ensure_envelope_ok(body: &str) -> Result<(), AdminApiError> {
    decode_envelope(body).map(|_| ())
}

fn decode_envelope(body: &str) -> Result<ApiEnvelope, AdminApiError> {
    let envelope: ApiEnvelope =
        serde_json::from_str(body).map_err(|err| AdminApiError::Parse(err.to_string()))?;

    if envelope.code != 0 {
        return Err(AdminApiError::Api {
            code: envelope.code,
            msg: if envelope.msg.is_empty() {
                "unknown failure".to_string()
            } else {
                envelope.msg
            },
        });
    }

    Ok(envelope)
}

fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        msg: Option<String>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.msg.or(parsed.message).or(parsed.error) {
            return message;
        }
    }

    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}
