//! Script Log Sinks
//!
//! A running script reports through one of two sinks, selected by the unit's
//! mode: normal-mode records go to the standard log keyed by script name,
//! debug-mode records are converted into outbound bus events so a connected
//! client can stream the run. The bus command proxy for the script-facing
//! `command()` helper lives here too.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, warn};

use cinder_script::{CommandHost, ScriptFault, ScriptLog, TraceLevel};

use crate::bus::{BusConnector, BusError, BusMessage, DEBUG_MESSAGE_EVENT};

// ─────────────────────────────────────────────────────────────────────────────
// Command Proxy
// ─────────────────────────────────────────────────────────────────────────────

/// Routes `command()` calls from scripts through the message bus, translating
/// transport failures into messages a script author can act on.
pub struct CommandProxy {
    bus: Arc<dyn BusConnector>,
}

impl CommandProxy {
    pub fn new(bus: Arc<dyn BusConnector>) -> Self {
        Self { bus }
    }
}

impl CommandHost for CommandProxy {
    fn command(
        &self,
        name: &str,
        to: Option<&str>,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, String> {
        let target = to.unwrap_or_default();
        let request = BusMessage::command(name, target, params);
        match self.bus.push(request) {
            Ok(Some(response)) => Ok(response.to_value()),
            Ok(None) => Ok(serde_json::Value::Null),
            Err(BusError::TargetNotLoaded(module)) => {
                Err(format!("Module \"{module}\" is not loaded"))
            }
            Err(BusError::NoResponse(module)) => {
                Err(format!("No response from \"{module}\" module"))
            }
            Err(BusError::Unreachable(reason)) => {
                Err(format!("Message bus is unreachable: {reason}"))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Standard Log
// ─────────────────────────────────────────────────────────────────────────────

/// Normal-mode sink: records go to the standard log, keyed by script name.
pub struct StandardLog {
    script: String,
}

impl StandardLog {
    pub fn new(script: String) -> Self {
        Self { script }
    }

    /// Report an execution fault with its stack to the standard log.
    pub fn exception(&self, message: &str, fault: &ScriptFault) {
        error!(script = %self.script, "{message}: {fault}");
    }
}

impl ScriptLog for StandardLog {
    fn record(&self, level: TraceLevel, message: &str) {
        match level {
            TraceLevel::Debug => debug!(script = %self.script, "{message}"),
            TraceLevel::Info => info!(script = %self.script, "{message}"),
            TraceLevel::Warning => warn!(script = %self.script, "{message}"),
            _ => error!(script = %self.script, "{message}"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Debug Trace Sink
// ─────────────────────────────────────────────────────────────────────────────

/// Debug-mode sink: every record becomes a `scripts.debug.message` bus event
/// instead of a log line. Delivery failures are swallowed so tracing can
/// never take down the run it instruments.
pub struct DebugTraceSink {
    bus: Arc<dyn BusConnector>,
}

impl DebugTraceSink {
    pub fn new(bus: Arc<dyn BusConnector>) -> Self {
        Self { bus }
    }

    fn emit(&self, level: TraceLevel, message: &str) {
        let request = BusMessage::event(
            DEBUG_MESSAGE_EVENT,
            json!({
                "message": message,
                "level": level.as_str(),
                "timestamp": Utc::now().timestamp(),
            }),
        );
        if let Err(e) = self.bus.push(request) {
            debug!(error = %e, "debug trace delivery failed");
        }
    }

    /// Emit the context message, the fault message, then every non-blank
    /// stack line, all as EXCEPTION records and in that order.
    pub fn exception(&self, message: &str, fault: &ScriptFault) {
        self.emit(TraceLevel::Exception, message);
        self.emit(TraceLevel::Exception, &fault.message);
        for line in fault.stack_lines() {
            self.emit(TraceLevel::Exception, line);
        }
    }
}

impl ScriptLog for DebugTraceSink {
    fn record(&self, level: TraceLevel, message: &str) {
        self.emit(level, message);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testing::RecordingBus;

    #[test]
    fn test_records_become_debug_message_events() {
        let bus = RecordingBus::new();
        let sink = DebugTraceSink::new(bus.clone());

        sink.record(TraceLevel::Info, "hello");

        let events = bus.events(DEBUG_MESSAGE_EVENT);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].params["message"], "hello");
        assert_eq!(events[0].params["level"], "INFO");
        assert!(events[0].params["timestamp"].is_i64());
    }

    #[test]
    fn test_exception_splits_stack_lines_in_order() {
        let bus = RecordingBus::new();
        let sink = DebugTraceSink::new(bus.clone());
        let fault = ScriptFault::new(
            "boom",
            Some("    at blow (greet.js:2:31)\n\n    at <eval> (greet.js:3:13)\n".to_string()),
        );

        sink.exception("fatal error in script \"greet.js\"", &fault);

        let messages: Vec<String> = bus
            .events(DEBUG_MESSAGE_EVENT)
            .iter()
            .map(|e| e.params["message"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            messages,
            vec![
                "fatal error in script \"greet.js\"",
                "boom",
                "    at blow (greet.js:2:31)",
                "    at <eval> (greet.js:3:13)",
            ]
        );
        for event in bus.events(DEBUG_MESSAGE_EVENT) {
            assert_eq!(event.params["level"], "EXCEPTION");
        }
    }

    #[test]
    fn test_delivery_failure_is_swallowed() {
        let bus = RecordingBus::unreachable();
        let sink = DebugTraceSink::new(bus);

        // Must not panic or propagate
        sink.record(TraceLevel::Error, "nobody is listening");
        sink.exception("still fine", &ScriptFault::new("boom", None));
    }

    #[test]
    fn test_command_proxy_translates_transport_faults() {
        struct RejectingBus(BusError);

        impl BusConnector for RejectingBus {
            fn push(&self, _message: BusMessage) -> Result<Option<crate::bus::MessageResponse>, BusError> {
                Err(self.0.clone())
            }
        }

        let proxy = CommandProxy::new(Arc::new(RejectingBus(BusError::TargetNotLoaded(
            "lights".to_string(),
        ))));
        let err = proxy.command("get_state", Some("lights"), serde_json::Value::Null).unwrap_err();
        assert_eq!(err, "Module \"lights\" is not loaded");

        let proxy = CommandProxy::new(Arc::new(RejectingBus(BusError::NoResponse(
            "lights".to_string(),
        ))));
        let err = proxy.command("get_state", Some("lights"), serde_json::Value::Null).unwrap_err();
        assert_eq!(err, "No response from \"lights\" module");
    }

    #[test]
    fn test_command_proxy_returns_response_value() {
        let bus = RecordingBus::new();
        let proxy = CommandProxy::new(bus.clone());

        let value = proxy
            .command("get_state", Some("lights"), serde_json::json!({ "room": "kitchen" }))
            .unwrap();
        assert_eq!(value["error"], false);

        let params = bus.command_params("get_state");
        assert_eq!(params.len(), 1);
        assert_eq!(params[0]["room"], "kitchen");
    }
}
