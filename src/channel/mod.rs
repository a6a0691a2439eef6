//! Realtime channel modules.
//!
//! - `client`: websocket transport, reconnect handling, and heartbeat.
//! - `proto`: wire messages exchanged with the admin realtime endpoint.
//! - `registry`: per-kind handler registration and dispatch.
//! - `session`: higher-level typed event stream with dashboard, client, and
//!   session snapshots.

/// Websocket connection, reconnect policy, and outbound sends.
pub mod client;
/// Wire envelope, control messages, and typed payloads.
pub mod proto;
/// Handler registration and ordered dispatch.
pub mod registry;
/// Session wrapper that tracks admin state and emits typed events.
pub mod session;
