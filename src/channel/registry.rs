//! Handler registration and dispatch for inbound channel messages.
//!
//! The registry maps message kinds to ordered handler lists. Dispatch
//! snapshots the relevant lists before invoking anything, so handlers may
//! subscribe or unsubscribe reentrantly without deadlocking.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::error;

use crate::channel::proto::Envelope;

/// Error returned by a handler; logged and otherwise ignored by dispatch.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Handler for a single message kind; receives the message payload.
pub type MessageHandler = Arc<dyn Fn(&Value) -> Result<(), HandlerError> + Send + Sync>;

/// Wildcard handler; receives every non-heartbeat envelope.
pub type EnvelopeHandler = Arc<dyn Fn(&Envelope) -> Result<(), HandlerError> + Send + Sync>;

/// Ordered per-kind handler lists plus a wildcard list.
#[derive(Default)]
pub struct HandlerRegistry {
    by_kind: RwLock<HashMap<String, Vec<MessageHandler>>>,
    wildcard: RwLock<Vec<EnvelopeHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to the list for `kind`.
    pub fn subscribe(&self, kind: &str, handler: MessageHandler) {
        if let Ok(mut map) = self.by_kind.write() {
            map.entry(kind.to_string()).or_default().push(handler);
        }
    }

    /// Removes the exact `handler` from the list for `kind`.
    ///
    /// Only the first occurrence of that handler is removed; other handlers
    /// registered for the kind are left intact. Returns whether a handler
    /// was removed.
    pub fn unsubscribe(&self, kind: &str, handler: &MessageHandler) -> bool {
        let Ok(mut map) = self.by_kind.write() else {
            return false;
        };
        let Some(handlers) = map.get_mut(kind) else {
            return false;
        };
        let Some(index) = handlers
            .iter()
            .position(|registered| same_callback(Arc::as_ptr(registered), Arc::as_ptr(handler)))
        else {
            return false;
        };
        handlers.remove(index);
        if handlers.is_empty() {
            map.remove(kind);
        }
        true
    }

    /// Appends a wildcard handler invoked for every non-heartbeat envelope.
    pub fn subscribe_any(&self, handler: EnvelopeHandler) {
        if let Ok(mut handlers) = self.wildcard.write() {
            handlers.push(handler);
        }
    }

    /// Removes the exact wildcard `handler`. Returns whether it was removed.
    pub fn unsubscribe_any(&self, handler: &EnvelopeHandler) -> bool {
        let Ok(mut handlers) = self.wildcard.write() else {
            return false;
        };
        let Some(index) = handlers
            .iter()
            .position(|registered| same_callback(Arc::as_ptr(registered), Arc::as_ptr(handler)))
        else {
            return false;
        };
        handlers.remove(index);
        true
    }

    /// Invokes every handler registered for the envelope's kind, in
    /// registration order, then every wildcard handler.
    ///
    /// A failing handler is logged and does not prevent later handlers from
    /// running.
    pub fn dispatch(&self, envelope: &Envelope) {
        let keyed: Vec<MessageHandler> = self
            .by_kind
            .read()
            .ok()
            .and_then(|map| map.get(envelope.kind.as_str()).cloned())
            .unwrap_or_default();
        for handler in keyed {
            if let Err(err) = handler(&envelope.payload) {
                error!(event = "channel_handler_failed", kind = %envelope.kind, error = %err);
            }
        }

        let wildcard: Vec<EnvelopeHandler> = self
            .wildcard
            .read()
            .map(|handlers| handlers.clone())
            .unwrap_or_default();
        for handler in wildcard {
            if let Err(err) = handler(envelope) {
                error!(event = "channel_handler_failed", kind = %envelope.kind, error = %err);
            }
        }
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: &str) -> usize {
        self.by_kind
            .read()
            .ok()
            .and_then(|map| map.get(kind).map(Vec::len))
            .unwrap_or(0)
    }
}

// Compares the data pointers of two handler allocations. `Arc::ptr_eq` on
// trait objects also compares vtable pointers, which is not guaranteed stable
// across codegen units.
fn same_callback<T: ?Sized, U: ?Sized>(a: *const T, b: *const U) -> bool {
    a as *const () == b as *const ()
}
