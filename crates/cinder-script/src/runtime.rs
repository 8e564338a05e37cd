//! Script execution.
//!
//! Each call evaluates a whole script source in a fresh runtime and context,
//! so one execution can never leak state into the next. Faults raised by the
//! script are captured with message and stack instead of propagating.

use std::sync::Arc;

use rquickjs::{Context, Ctx, Runtime, Value as JsValue};
use serde::Serialize;

use crate::error::{CommandHost, ScriptFault, ScriptLog};
use crate::globals::register_script_globals;

/// The triggering event, bound into the script as the global `event` object.
#[derive(Debug, Clone, Serialize)]
pub struct EventBinding {
    pub name: String,
    pub params: serde_json::Value,
}

/// Execute a script source against the given context.
///
/// Infrastructure failures (runtime creation, globals installation) are
/// reported as faults too: from the caller's point of view the execution
/// failed either way, and the distinction is carried in the message.
pub fn execute_script(
    name: &str,
    source: &str,
    event: Option<&EventBinding>,
    host: Arc<dyn CommandHost>,
    log: Arc<dyn ScriptLog>,
) -> Result<(), ScriptFault> {
    let runtime = Runtime::new()
        .map_err(|e| ScriptFault::new(format!("{name}: failed to create script runtime: {e}"), None))?;
    let context = Context::full(&runtime)
        .map_err(|e| ScriptFault::new(format!("{name}: failed to create script context: {e}"), None))?;

    context.with(|ctx| {
        register_script_globals(&ctx, host, log)
            .map_err(|e| ScriptFault::new(format!("{name}: failed to install globals: {e}"), None))?;

        if let Some(event) = event {
            let binding = serde_json::to_string(event).map_err(|e| {
                ScriptFault::new(format!("{name}: failed to encode event: {e}"), None)
            })?;
            ctx.eval::<JsValue, _>(format!("globalThis.event = {binding};"))
                .map_err(|e| fault_from_error(&ctx, name, e))?;
        }

        let mut options = rquickjs::context::EvalOptions::default();
        options.global = true;
        options.strict = false;
        options.backtrace_barrier = true;

        tracing::debug!(script = name, "evaluating script");
        match ctx.eval_with_options::<JsValue, _>(source, options) {
            Ok(_) => Ok(()),
            Err(e) => Err(fault_from_error(&ctx, name, e)),
        }
    })
}

/// Turn an eval error into a fault, pulling message and stack out of the
/// pending exception when there is one.
fn fault_from_error(ctx: &Ctx<'_>, name: &str, error: rquickjs::Error) -> ScriptFault {
    if !matches!(error, rquickjs::Error::Exception) {
        return ScriptFault::new(format!("{name}: {error}"), None);
    }

    let caught = ctx.catch();
    if let Some(exception) = caught.as_exception() {
        let message = exception
            .message()
            .unwrap_or_else(|| "uncaught exception".to_string());
        return ScriptFault::new(message, exception.stack());
    }

    // Scripts may throw non-Error values (`throw "text"`)
    let message = caught
        .as_string()
        .and_then(|s| s.to_string().ok())
        .unwrap_or_else(|| "uncaught non-error value".to_string());
    ScriptFault::new(message, None)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
