use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use relay_admin_sdk::admin_api::{
    AdminApiClient, AdminApiError, ListClientsQuery, ListSessionsQuery,
};
use relay_admin_sdk::channel::proto::{ClientRole, SessionStatus};
use secrecy::SecretString;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};

const TEST_ADMIN_TOKEN: &str = "test-admin-token";

#[derive(Clone)]
struct ApiState {
    expected_token: String,
    observed_tx: Arc<Mutex<Option<oneshot::Sender<Value>>>>,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dashboard_stats_parses_ok_envelope() {
    let (state, _observed_rx) = api_state();
    let app = Router::new()
        .route(
            "/admin/nfc-relay/v1/dashboard-stats-enhanced",
            get(dashboard_handler),
        )
        .with_state(state);
    let (addr, shutdown_tx, task) = spawn_server(app).await;

    let client = admin_client(addr);
    let stats = client.dashboard_stats().await.expect("dashboard stats");

    assert_eq!(stats.hub_status, "online");
    assert_eq!(stats.active_connections, 12);
    assert_eq!(stats.connection_trend, vec![3, 7, 12]);

    let _ = shutdown_tx.send(());
    task.await.expect("mock server task should join");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_clients_sends_filters_and_parses_page() {
    let (state, observed_rx) = api_state();
    let app = Router::new()
        .route("/admin/nfc-relay/v1/clients", get(list_clients_handler))
        .with_state(state);
    let (addr, shutdown_tx, task) = spawn_server(app).await;

    let client = admin_client(addr);
    let query = ListClientsQuery {
        page: 2,
        page_size: 5,
        keyword: Some("pixel".to_string()),
        role: Some(ClientRole::Provider),
        status: None,
    };
    let page = client.list_clients(&query).await.expect("list clients");

    assert_eq!(page.total, 1);
    assert_eq!(page.list[0].client_id, "client-0001");
    assert_eq!(page.list[0].role, ClientRole::Provider);

    let observed = observed_rx.await.expect("observed query");
    assert_eq!(observed.get("page").and_then(Value::as_str), Some("2"));
    assert_eq!(observed.get("pageSize").and_then(Value::as_str), Some("5"));
    assert_eq!(
        observed.get("keyword").and_then(Value::as_str),
        Some("pixel")
    );
    assert_eq!(
        observed.get("role").and_then(Value::as_str),
        Some("provider")
    );
    assert!(observed.get("status").is_none());

    let _ = shutdown_tx.send(());
    task.await.expect("mock server task should join");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_sessions_parses_statuses() {
    let (state, _observed_rx) = api_state();
    let app = Router::new()
        .route("/admin/nfc-relay/v1/sessions", get(list_sessions_handler))
        .with_state(state);
    let (addr, shutdown_tx, task) = spawn_server(app).await;

    let client = admin_client(addr);
    let page = client
        .list_sessions(&ListSessionsQuery::default())
        .await
        .expect("list sessions");

    assert_eq!(page.list.len(), 2);
    assert_eq!(page.list[0].status, SessionStatus::Paired);
    assert_eq!(page.list[1].status, SessionStatus::Waiting);

    let _ = shutdown_tx.send(());
    task.await.expect("mock server task should join");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn terminate_session_posts_reason_to_the_right_route() {
    let (state, observed_rx) = api_state();
    let app = Router::new()
        .route(
            "/admin/nfc-relay/v1/sessions/:session_id/terminate",
            post(terminate_handler),
        )
        .with_state(state);
    let (addr, shutdown_tx, task) = spawn_server(app).await;

    let client = admin_client(addr);
    client
        .terminate_session("session-0001", Some("policy violation".to_string()))
        .await
        .expect("terminate session");

    let observed = observed_rx.await.expect("observed request");
    assert_eq!(
        observed.get("session_id").and_then(Value::as_str),
        Some("session-0001")
    );
    assert_eq!(
        observed.get("reason").and_then(Value::as_str),
        Some("policy violation")
    );

    let _ = shutdown_tx.send(());
    task.await.expect("mock server task should join");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_zero_envelope_code_surfaces_as_api_error() {
    let (state, _observed_rx) = api_state();
    let app = Router::new()
        .route(
            "/admin/nfc-relay/v1/clients/:client_id/disconnect",
            post(forbidden_handler),
        )
        .with_state(state);
    let (addr, shutdown_tx, task) = spawn_server(app).await;

    let client = admin_client(addr);
    let error = client
        .disconnect_client("client-0001")
        .await
        .expect_err("disconnect should fail");

    match error {
        AdminApiError::Api { code, msg } => {
            assert_eq!(code, 40001);
            assert_eq!(msg, "permission denied");
        }
        other => panic!("unexpected error variant: {other:?}"),
    }

    let _ = shutdown_tx.send(());
    task.await.expect("mock server task should join");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_token_is_rejected_with_http_status() {
    let (state, _observed_rx) = api_state();
    let app = Router::new()
        .route(
            "/admin/nfc-relay/v1/dashboard-stats-enhanced",
            get(dashboard_handler),
        )
        .with_state(state);
    let (addr, shutdown_tx, task) = spawn_server(app).await;

    let client = AdminApiClient::new(format!("http://{addr}")).expect("build client");
    let error = client
        .dashboard_stats()
        .await
        .expect_err("unauthenticated request should fail");

    match error {
        AdminApiError::HttpStatus { status, body } => {
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body, "unauthorized");
        }
        other => panic!("unexpected error variant: {other:?}"),
    }

    let _ = shutdown_tx.send(());
    task.await.expect("mock server task should join");
}

fn api_state() -> (ApiState, oneshot::Receiver<Value>) {
    let (observed_tx, observed_rx) = oneshot::channel();
    (
        ApiState {
            expected_token: TEST_ADMIN_TOKEN.to_string(),
            observed_tx: Arc::new(Mutex::new(Some(observed_tx))),
        },
        observed_rx,
    )
}

fn admin_client(addr: SocketAddr) -> AdminApiClient {
    AdminApiClient::with_auth_token(
        format!("http://{addr}"),
        SecretString::new(TEST_ADMIN_TOKEN.to_string()),
    )
    .expect("build admin api client")
}

fn token_matches(state: &ApiState, headers: &HeaderMap) -> bool {
    headers
        .get("x-admin-token")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == state.expected_token)
}

fn unauthorized() -> (StatusCode, Json<Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"msg": "unauthorized"})),
    )
}

async fn dashboard_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !token_matches(&state, &headers) {
        return unauthorized();
    }

    (
        StatusCode::OK,
        Json(json!({
            "code": 0,
            "data": {
                "hub_status": "online",
                "active_connections": 12,
                "active_sessions": 4,
                "apdu_relayed_last_minute": 87,
                "connection_trend": [3, 7, 12]
            },
            "msg": "ok"
        })),
    )
}

async fn list_clients_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<Value>,
) -> impl IntoResponse {
    if !token_matches(&state, &headers) {
        return unauthorized();
    }

    if let Some(tx) = state.observed_tx.lock().await.take() {
        let _ = tx.send(params);
    }

    (
        StatusCode::OK,
        Json(json!({
            "code": 0,
            "data": {
                "list": [{
                    "client_id": "client-0001",
                    "display_name": "Pixel 8 Pro",
                    "role": "provider",
                    "ip_address": "192.168.3.17"
                }],
                "total": 1,
                "page": 2,
                "pageSize": 5
            },
            "msg": "ok"
        })),
    )
}

async fn list_sessions_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !token_matches(&state, &headers) {
        return unauthorized();
    }

    (
        StatusCode::OK,
        Json(json!({
            "code": 0,
            "data": {
                "list": [
                    {"session_id": "session-0001", "status": "paired"},
                    {"session_id": "session-0002", "status": "waiting"}
                ],
                "total": 2,
                "page": 1,
                "pageSize": 10
            },
            "msg": "ok"
        })),
    )
}

async fn terminate_handler(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if !token_matches(&state, &headers) {
        return unauthorized();
    }

    if let Some(tx) = state.observed_tx.lock().await.take() {
        let _ = tx.send(json!({
            "session_id": session_id,
            "reason": body.get("reason").cloned().unwrap_or(Value::Null)
        }));
    }

    (
        StatusCode::OK,
        Json(json!({"code": 0, "data": null, "msg": "terminated"})),
    )
}

async fn forbidden_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !token_matches(&state, &headers) {
        return unauthorized();
    }

    (
        StatusCode::OK,
        Json(json!({"code": 40001, "data": null, "msg": "permission denied"})),
    )
}

async fn spawn_server(
    app: Router,
) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server listener");
    let addr = listener
        .local_addr()
        .expect("read mock server listener address");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("mock server should run");
    });
    (addr, shutdown_tx, task)
}
