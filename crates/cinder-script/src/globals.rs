//! Script-facing globals.
//!
//! Installs the host capabilities into a fresh context. The Rust side only
//! registers two raw hooks (`__host_command`, `__host_trace`) that move plain
//! strings across the boundary; the public surface scripts actually use
//! (`command()`, `logger`, `console`) is defined by a small JS prelude on top
//! of them.

use std::sync::Arc;

use rquickjs::function::Opt;
use rquickjs::{Ctx, Function, Result as JsResult};
use serde_json::{json, Value};

use crate::error::{CommandHost, ScriptLog, TraceLevel};

/// Prelude defining the public script API over the raw host hooks.
const PRELUDE: &str = r#"
globalThis.command = function (name, to, params) {
    const raw = __host_command(
        name,
        to === undefined || to === null ? undefined : String(to),
        params === undefined || params === null ? undefined : JSON.stringify(params),
    );
    const resp = JSON.parse(raw);
    if (resp.error) {
        throw new Error(resp.message);
    }
    return resp.data === undefined ? null : resp.data;
};

const __cinder_leveled = (level) => (message) => __host_trace(level, String(message));
globalThis.logger = {
    debug: __cinder_leveled("DEBUG"),
    info: __cinder_leveled("INFO"),
    warn: __cinder_leveled("WARNING"),
    warning: __cinder_leveled("WARNING"),
    error: __cinder_leveled("ERROR"),
    fatal: __cinder_leveled("CRITICAL"),
    critical: __cinder_leveled("CRITICAL"),
};

const __cinder_join = (args) => args.map(String).join(" ");
globalThis.console = {
    log: (...args) => __host_trace("INFO", __cinder_join(args)),
    debug: (...args) => __host_trace("DEBUG", __cinder_join(args)),
    info: (...args) => __host_trace("INFO", __cinder_join(args)),
    warn: (...args) => __host_trace("WARNING", __cinder_join(args)),
    error: (...args) => __host_trace("ERROR", __cinder_join(args)),
};
"#;

/// Register the host hooks and evaluate the prelude in the given context.
pub fn register_script_globals(
    ctx: &Ctx<'_>,
    host: Arc<dyn CommandHost>,
    log: Arc<dyn ScriptLog>,
) -> JsResult<()> {
    let globals = ctx.globals();

    globals.set(
        "__host_command",
        Function::new(
            ctx.clone(),
            move |name: String, to: Opt<String>, params: Opt<String>| -> String {
                let params = params
                    .0
                    .as_deref()
                    .map(serde_json::from_str::<Value>)
                    .transpose()
                    .unwrap_or(None)
                    .unwrap_or(Value::Null);
                match host.command(&name, to.0.as_deref(), params) {
                    Ok(data) => json!({ "error": false, "data": data }).to_string(),
                    Err(message) => json!({ "error": true, "message": message }).to_string(),
                }
            },
        )?,
    )?;

    globals.set(
        "__host_trace",
        Function::new(ctx.clone(), move |level: String, message: String| {
            log.record(TraceLevel::parse(&level), &message);
        })?,
    )?;

    ctx.eval::<rquickjs::Value, _>(PRELUDE)?;

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Object, Runtime};
    use std::sync::Mutex;

    struct NoHost;

    impl CommandHost for NoHost {
        fn command(&self, _name: &str, to: Option<&str>, _params: Value) -> Result<Value, String> {
            Err(format!("Module \"{}\" is not loaded", to.unwrap_or_default()))
        }
    }

    #[derive(Default)]
    struct CaptureLog {
        records: Mutex<Vec<(TraceLevel, String)>>,
    }

    impl ScriptLog for CaptureLog {
        fn record(&self, level: TraceLevel, message: &str) {
            self.records.lock().unwrap().push((level, message.to_string()));
        }
    }

    #[test]
    fn test_register_globals() {
        let runtime = Runtime::new().unwrap();
        let ctx = Context::full(&runtime).unwrap();

        ctx.with(|ctx| {
            register_script_globals(&ctx, Arc::new(NoHost), Arc::new(CaptureLog::default()))
                .unwrap();

            // The public surface is in place
            let globals = ctx.globals();
            let _command: Function = globals.get("command").unwrap();
            let logger: Object = globals.get("logger").unwrap();
            let _info: Function = logger.get("info").unwrap();
        });
    }

    #[test]
    fn test_logger_reaches_sink() {
        let runtime = Runtime::new().unwrap();
        let ctx = Context::full(&runtime).unwrap();
        let log = Arc::new(CaptureLog::default());

        ctx.with(|ctx| {
            register_script_globals(&ctx, Arc::new(NoHost), log.clone()).unwrap();
            let _: rquickjs::Value = ctx
                .eval(r#"logger.warn("watch out"); console.log("a", 1);"#)
                .unwrap();
        });

        let records = log.records.lock().unwrap();
        assert_eq!(records[0], (TraceLevel::Warning, "watch out".to_string()));
        assert_eq!(records[1], (TraceLevel::Info, "a 1".to_string()));
    }
}
