//! Rust SDK for the NFC relay admin platform.
//!
//! The crate is organized by transport surface:
//! - `channel`: realtime websocket channel with reconnect, heartbeat, and
//!   typed message dispatch.
//! - `admin_api`: HTTP client for the admin REST endpoints.
//! - `backoff`: reconnect and retry policies shared across the SDK.

/// Admin REST API client and request/response types.
pub mod admin_api;
/// Reconnect and retry policies.
pub mod backoff;
/// Realtime channel client, wire protocol, handler registry, and session
/// state helpers.
pub mod channel;
