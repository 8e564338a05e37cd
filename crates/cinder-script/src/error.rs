//! Fault and trace types shared between the runtime and its hosts.

use std::fmt;

// ─────────────────────────────────────────────────────────────────────────────
// Script Fault
// ─────────────────────────────────────────────────────────────────────────────

/// A captured script failure: the thrown message plus the engine stack trace
/// when one is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFault {
    /// Message of the thrown value
    pub message: String,
    /// Engine stack trace, one frame per line
    pub stack: Option<String>,
}

impl ScriptFault {
    /// Create a new fault
    pub fn new(message: impl Into<String>, stack: Option<String>) -> Self {
        Self {
            message: message.into(),
            stack,
        }
    }

    /// Non-blank stack lines, in engine order
    pub fn stack_lines(&self) -> impl Iterator<Item = &str> {
        self.stack
            .as_deref()
            .unwrap_or("")
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.trim().is_empty())
    }
}

impl fmt::Display for ScriptFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for line in self.stack_lines() {
            write!(f, "\n{}", line)?;
        }
        Ok(())
    }
}

impl std::error::Error for ScriptFault {}

// ─────────────────────────────────────────────────────────────────────────────
// Trace Level
// ─────────────────────────────────────────────────────────────────────────────

/// Severity attached to records emitted by a running script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    /// Fault reports, including the individual stack trace lines
    Exception,
}

impl TraceLevel {
    /// Upper-case wire form used in trace events
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceLevel::Debug => "DEBUG",
            TraceLevel::Info => "INFO",
            TraceLevel::Warning => "WARNING",
            TraceLevel::Error => "ERROR",
            TraceLevel::Critical => "CRITICAL",
            TraceLevel::Exception => "EXCEPTION",
        }
    }

    /// Parse the wire form; unknown levels fall back to `Info`
    pub fn parse(level: &str) -> Self {
        match level {
            "DEBUG" => TraceLevel::Debug,
            "WARNING" => TraceLevel::Warning,
            "ERROR" => TraceLevel::Error,
            "CRITICAL" => TraceLevel::Critical,
            "EXCEPTION" => TraceLevel::Exception,
            _ => TraceLevel::Info,
        }
    }
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host Capabilities
// ─────────────────────────────────────────────────────────────────────────────

/// Host capability backing the script-facing `command()` helper.
///
/// An `Err` message surfaces inside the script as a thrown exception, so
/// implementations should return messages a script author can act on rather
/// than transport-level errors.
pub trait CommandHost: Send + Sync {
    /// Forward a command request to another module and return its response
    fn command(
        &self,
        name: &str,
        to: Option<&str>,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, String>;
}

/// Sink for leveled records emitted by a running script via `logger`/`console`.
pub trait ScriptLog: Send + Sync {
    fn record(&self, level: TraceLevel, message: &str);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
