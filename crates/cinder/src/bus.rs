//! Message Bus Interface
//!
//! The bus transport itself lives outside this crate; the engine only talks
//! to it through [`BusConnector`]. Messages follow the hub convention: an
//! event carries an `event` name, a command carries `command` + `to`, and
//! both carry a free-form `params` payload.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// Event type carrying one debug trace record
pub const DEBUG_MESSAGE_EVENT: &str = "scripts.debug.message";
/// Event type marking the end of a debug run
pub const DEBUG_END_EVENT: &str = "scripts.debug.end";

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

/// A message pushed onto the hub bus, inbound or outbound.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusMessage {
    /// Event name, for broadcast messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    /// Command name, for requests addressed to one module
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Target module of a command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Free-form payload
    #[serde(default)]
    pub params: Value,
}

impl BusMessage {
    /// Create a broadcast event message
    pub fn event(name: impl Into<String>, params: Value) -> Self {
        Self {
            event: Some(name.into()),
            params,
            ..Default::default()
        }
    }

    /// Create a command request addressed to one module
    pub fn command(name: impl Into<String>, to: impl Into<String>, params: Value) -> Self {
        Self {
            command: Some(name.into()),
            to: Some(to.into()),
            params,
            ..Default::default()
        }
    }

    /// Event name, when this message is an event
    pub fn event_name(&self) -> Option<&str> {
        self.event.as_deref()
    }
}

/// Structured response to a command request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    /// True when the handler reported a failure
    #[serde(default)]
    pub error: bool,
    /// Human-readable outcome description
    #[serde(default)]
    pub message: String,
    /// Response payload
    #[serde(default)]
    pub data: Value,
}

impl MessageResponse {
    /// Successful response wrapping a payload
    pub fn ok(data: Value) -> Self {
        Self {
            error: false,
            message: String::new(),
            data,
        }
    }

    /// Dictionary form handed back to scripts
    pub fn to_value(&self) -> Value {
        json!({
            "error": self.error,
            "message": self.message,
            "data": self.data,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connector
// ─────────────────────────────────────────────────────────────────────────────

/// Errors surfaced by the bus transport
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("target module \"{0}\" is not loaded")]
    TargetNotLoaded(String),

    #[error("no response from \"{0}\"")]
    NoResponse(String),

    #[error("bus unreachable: {0}")]
    Unreachable(String),
}

/// Connection to the hub message bus.
///
/// `push` is synchronous from the caller's point of view: for commands it
/// returns the target's response (or `None` when the target answers with
/// nothing), for events it returns `None`.
pub trait BusConnector: Send + Sync {
    fn push(&self, message: BusMessage) -> Result<Option<MessageResponse>, BusError>;
}

/// Stand-in connector for standalone runs without a hub attached: events are
/// logged and discarded, commands fail as unroutable.
pub struct NullBus;

impl BusConnector for NullBus {
    fn push(&self, message: BusMessage) -> Result<Option<MessageResponse>, BusError> {
        if let Some(event) = message.event_name() {
            debug!(event, "discarding bus event, no hub attached");
            return Ok(None);
        }
        Err(BusError::TargetNotLoaded(
            message.to.unwrap_or_default(),
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test Support
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Captures every pushed message; commands get an empty ok response.
    #[derive(Default)]
    pub struct RecordingBus {
        pub pushed: Mutex<Vec<BusMessage>>,
        fail: bool,
    }

    impl RecordingBus {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// A bus whose every push fails, for delivery-failure paths.
        pub fn unreachable() -> Arc<Self> {
            Arc::new(Self {
                fail: true,
                ..Default::default()
            })
        }

        /// Pushed events with the given name, in push order.
        pub fn events(&self, name: &str) -> Vec<BusMessage> {
            self.pushed
                .lock()
                .iter()
                .filter(|m| m.event_name() == Some(name))
                .cloned()
                .collect()
        }

        /// Params of pushed commands with the given name, in push order.
        pub fn command_params(&self, name: &str) -> Vec<Value> {
            self.pushed
                .lock()
                .iter()
                .filter(|m| m.command.as_deref() == Some(name))
                .map(|m| m.params.clone())
                .collect()
        }
    }

    impl BusConnector for RecordingBus {
        fn push(&self, message: BusMessage) -> Result<Option<MessageResponse>, BusError> {
            if self.fail {
                return Err(BusError::Unreachable("test bus is down".to_string()));
            }
            let response = message.command.is_some().then(|| MessageResponse::ok(Value::Null));
            self.pushed.lock().push(message);
            Ok(response)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_constructor() {
        let message = BusMessage::event("motion.on", json!({ "device": "hall" }));
        assert_eq!(message.event_name(), Some("motion.on"));
        assert!(message.command.is_none());
        assert_eq!(message.params["device"], "hall");
    }

    #[test]
    fn test_command_constructor() {
        let message = BusMessage::command("get_state", "lights", Value::Null);
        assert_eq!(message.command.as_deref(), Some("get_state"));
        assert_eq!(message.to.as_deref(), Some("lights"));
        assert!(message.event.is_none());
    }

    #[test]
    fn test_message_serialization_skips_empty_fields() {
        let message = BusMessage::event("tick", Value::Null);
        let encoded = serde_json::to_string(&message).unwrap();
        assert!(!encoded.contains("command"));
        assert!(!encoded.contains("\"to\""));
    }

    #[test]
    fn test_response_to_value() {
        let response = MessageResponse::ok(json!({ "state": "on" }));
        let value = response.to_value();
        assert_eq!(value["error"], false);
        assert_eq!(value["data"]["state"], "on");
    }

    #[test]
    fn test_null_bus() {
        let bus = NullBus;
        assert!(matches!(bus.push(BusMessage::event("tick", Value::Null)), Ok(None)));
        assert!(matches!(
            bus.push(BusMessage::command("get_state", "lights", Value::Null)),
            Err(BusError::TargetNotLoaded(_))
        ));
    }
}
