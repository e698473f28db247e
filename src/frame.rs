//! Frame — the universal message type of the game protocol.
//!
//! ARCHITECTURE
//! ============
//! Every websocket message, inbound or outbound, is a Frame: a namespaced
//! event name (`"room:join"`, `"round:start"`, ...) plus a flat JSON payload.
//! The WS handler routes on the event name and never interprets `data`;
//! handlers and services build payloads key by key.
//!
//! DESIGN
//! ======
//! - Flat data: payload is always `Map<String, Value>`, never nested frames.
//! - Server pushes are fire-and-forget events; there is no request/response
//!   correlation on this protocol.
//! - Errors travel as ordinary frames (`room:error` / `game:error`) whose
//!   payload carries a short user-facing `message`.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// =============================================================================
// TYPES
// =============================================================================

/// Frame data key for user-facing error messages.
pub const FRAME_MESSAGE: &str = "message";

/// Flat key-value payload. Alias to reduce noise in signatures.
pub type Data = HashMap<String, serde_json::Value>;

/// The universal message type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Namespaced event name, e.g. `"round:stop"`.
    pub event: String,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    #[serde(default)]
    pub ts: i64,
    /// Flat key-value payload specific to the event.
    #[serde(default)]
    pub data: Data,
}

// =============================================================================
// CLIENT-VISIBLE ERRORS
// =============================================================================

/// Maps a service error onto the wire, or to silence.
///
/// Validation failures are surfaced to the originating connection as
/// `room:error` or `game:error`; authorization and stale-event failures are
/// dropped without a reply.
pub trait ClientError: std::fmt::Display {
    /// Event name carrying this error, or `None` when it is silently ignored.
    fn error_event(&self) -> Option<&'static str>;
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Frame {
    /// Create a frame with a payload. Entry point for every event.
    pub fn new(event: impl Into<String>, data: Data) -> Self {
        Self { event: event.into(), ts: now_ms(), data }
    }

    /// Create a frame with an empty payload.
    pub fn empty(event: impl Into<String>) -> Self {
        Self::new(event, Data::new())
    }

    /// Create an error frame from a typed service error, or `None` for
    /// errors that are silently ignored.
    pub fn from_error(err: &(impl ClientError + ?Sized)) -> Option<Self> {
        let event = err.error_event()?;
        let mut data = Data::new();
        data.insert(FRAME_MESSAGE.into(), serde_json::Value::String(err.to_string()));
        Some(Self::new(event, data))
    }

    /// Flatten a serializable view into the frame payload. Non-object views
    /// contribute nothing.
    pub fn from_view(event: impl Into<String>, view: &impl Serialize) -> Self {
        let data = match serde_json::to_value(view) {
            Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
            _ => Data::new(),
        };
        Self::new(event, data)
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Frame {
    /// Insert an arbitrary key-value pair into the frame payload.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// ROUTING
// =============================================================================

impl Frame {
    /// Extract the event prefix (everything before the first ':').
    #[must_use]
    pub fn prefix(&self) -> &str {
        let Some((prefix, _)) = self.event.split_once(':') else {
            return &self.event;
        };
        prefix
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
