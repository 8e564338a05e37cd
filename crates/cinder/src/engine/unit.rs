//! Execution Unit
//!
//! One isolated worker per script. Each unit owns a dedicated thread and a
//! private FIFO event queue; QuickJS contexts are created and dropped inside
//! the thread, so nothing script-related ever crosses a thread boundary.
//! Normal-mode units loop until stopped; debug units execute exactly once,
//! stream their output through the debug trace sink and emit a completion
//! event.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, error};

use cinder_script::{execute_script, CommandHost, EventBinding, ScriptFault, ScriptLog};

use crate::bus::{BusConnector, BusMessage, DEBUG_END_EVENT};
use crate::engine::trace::{CommandProxy, DebugTraceSink, StandardLog};
use crate::types::ExecutionStatus;

/// How a unit executes its script: forever on queued events, or exactly once.
#[derive(Debug, Clone)]
pub enum UnitMode {
    /// Loop on the event queue until stopped
    Normal,
    /// Single synchronous run, optionally bound to one trigger event, with
    /// trace output streamed to the bus
    Debug { trigger: Option<BusMessage> },
}

/// State shared between the engine-facing handle and the worker thread.
struct UnitShared {
    name: String,
    path: PathBuf,
    queue: Mutex<VecDeque<BusMessage>>,
    stop: AtomicBool,
    disabled: AtomicBool,
    /// Set when the worker exits because its backing file vanished
    dead: AtomicBool,
    error: AtomicBool,
    last_execution: Mutex<Option<i64>>,
}

/// Worker managing one script's lifecycle and event queue.
pub struct ExecutionUnit {
    shared: Arc<UnitShared>,
    bus: Arc<dyn BusConnector>,
    mode: UnitMode,
    poll_interval: Duration,
    thread: Option<thread::JoinHandle<()>>,
}

impl ExecutionUnit {
    pub fn new(
        name: String,
        path: PathBuf,
        bus: Arc<dyn BusConnector>,
        disabled: bool,
        mode: UnitMode,
        poll_interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(UnitShared {
                name,
                path,
                queue: Mutex::new(VecDeque::new()),
                stop: AtomicBool::new(false),
                disabled: AtomicBool::new(disabled),
                dead: AtomicBool::new(false),
                error: AtomicBool::new(false),
                last_execution: Mutex::new(None),
            }),
            bus,
            mode,
            poll_interval,
            thread: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Spawn the worker thread. No-op when already started.
    pub fn start(&mut self) -> crate::types::Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let bus = Arc::clone(&self.bus);
        let mode = self.mode.clone();
        let poll_interval = self.poll_interval;
        let handle = thread::Builder::new()
            .name(self.shared.name.clone())
            .spawn(move || match mode {
                UnitMode::Normal => run_normal(shared, bus, poll_interval),
                UnitMode::Debug { trigger } => run_debug(shared, bus, trigger),
            })?;
        self.thread = Some(handle);
        Ok(())
    }

    /// Signal graceful termination. Idempotent; the worker observes the flag
    /// at the top of each loop iteration.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }

    /// Wait for the worker thread to finish its current iteration and exit.
    pub fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!(script = %self.shared.name, "script worker panicked");
            }
        }
    }

    /// Enqueue an event for later consumption. Never blocks the caller.
    pub fn push_event(&self, message: BusMessage) {
        self.shared.queue.lock().push_back(message);
    }

    /// Number of events waiting in the queue.
    pub fn pending_events(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Toggle whether dequeued events trigger execution. A disabled unit
    /// still drains its queue, discarding events.
    pub fn set_disabled(&self, disabled: bool) {
        self.shared.disabled.store(disabled, Ordering::SeqCst);
    }

    pub fn is_disabled(&self) -> bool {
        self.shared.disabled.load(Ordering::SeqCst)
    }

    /// True when the worker exited because its backing file vanished.
    pub fn is_dead(&self) -> bool {
        self.shared.dead.load(Ordering::SeqCst)
    }

    pub fn execution_status(&self) -> ExecutionStatus {
        ExecutionStatus {
            last_execution: *self.shared.last_execution.lock(),
            error: self.shared.error.load(Ordering::SeqCst),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker Loops
// ─────────────────────────────────────────────────────────────────────────────

fn run_normal(shared: Arc<UnitShared>, bus: Arc<dyn BusConnector>, poll_interval: Duration) {
    debug!(script = %shared.name, "worker started");
    let host: Arc<dyn CommandHost> = Arc::new(CommandProxy::new(Arc::clone(&bus)));
    let log = Arc::new(StandardLog::new(shared.name.clone()));
    let log_dyn: Arc<dyn ScriptLog> = log.clone();

    loop {
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }

        if shared.queue.lock().is_empty() {
            // Bounded pause keeps stop() latency within one interval
            thread::sleep(poll_interval);
            continue;
        }

        // The backing file vanishing is fatal for this unit; the reconciler
        // reaps it on its next pass.
        if !shared.path.exists() {
            error!(
                script = %shared.name,
                path = %shared.path.display(),
                "script file disappeared, stopping worker"
            );
            shared.dead.store(true, Ordering::SeqCst);
            break;
        }

        let Some(message) = shared.queue.lock().pop_front() else {
            continue;
        };

        if shared.disabled.load(Ordering::SeqCst) {
            debug!(script = %shared.name, "script disabled, dropping event");
            continue;
        }

        let source = match std::fs::read_to_string(&shared.path) {
            Ok(source) => source,
            Err(e) => {
                // Lost a race with deletion between the exists check and here
                error!(script = %shared.name, error = %e, "failed to read script, stopping worker");
                shared.dead.store(true, Ordering::SeqCst);
                break;
            }
        };

        let event = EventBinding {
            name: message.event.clone().unwrap_or_default(),
            params: message.params.clone(),
        };
        debug!(script = %shared.name, event = %event.name, "executing script");
        match execute_script(
            &shared.name,
            &source,
            Some(&event),
            Arc::clone(&host),
            Arc::clone(&log_dyn),
        ) {
            Ok(()) => {
                *shared.last_execution.lock() = Some(Utc::now().timestamp());
                shared.error.store(false, Ordering::SeqCst);
            }
            Err(fault) => {
                shared.error.store(true, Ordering::SeqCst);
                log.exception(&format!("fatal error in script \"{}\"", shared.name), &fault);
            }
        }
    }

    debug!(script = %shared.name, "worker stopped");
}

fn run_debug(shared: Arc<UnitShared>, bus: Arc<dyn BusConnector>, trigger: Option<BusMessage>) {
    debug!(script = %shared.name, "debug run started");
    let sink = Arc::new(DebugTraceSink::new(Arc::clone(&bus)));
    let host: Arc<dyn CommandHost> = Arc::new(CommandProxy::new(Arc::clone(&bus)));
    let log: Arc<dyn ScriptLog> = sink.clone();

    let event = trigger.map(|message| EventBinding {
        name: message.event.clone().unwrap_or_default(),
        params: message.params,
    });

    match std::fs::read_to_string(&shared.path) {
        Ok(source) => {
            if let Err(fault) = execute_script(&shared.name, &source, event.as_ref(), host, log) {
                sink.exception(&format!("fatal error in script \"{}\"", shared.name), &fault);
            }
        }
        Err(e) => {
            sink.exception(
                &format!("fatal error in script \"{}\"", shared.name),
                &ScriptFault::new(e.to_string(), None),
            );
        }
    }

    // Completion signal, emitted regardless of the run outcome
    if let Err(e) = bus.push(BusMessage::event(DEBUG_END_EVENT, serde_json::Value::Null)) {
        debug!(script = %shared.name, error = %e, "failed to emit debug end event");
    }
    debug!(script = %shared.name, "debug run finished");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testing::RecordingBus;
    use crate::bus::DEBUG_MESSAGE_EVENT;
    use serde_json::{json, Value};
    use std::time::Instant;

    const TEST_POLL: Duration = Duration::from_millis(10);

    fn write_script(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn record_script() -> &'static str {
        r#"command("record", "recorder", { value: event.name });"#
    }

    #[test]
    fn test_events_execute_in_fifo_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(&dir, "order.js", record_script());
        let bus = RecordingBus::new();
        let mut unit = ExecutionUnit::new(
            "order.js".to_string(),
            path,
            bus.clone(),
            false,
            UnitMode::Normal,
            TEST_POLL,
        );
        unit.start().unwrap();

        for name in ["e1", "e2", "e3"] {
            unit.push_event(BusMessage::event(name, Value::Null));
        }

        wait_for(|| bus.command_params("record").len() == 3);
        let recorded: Vec<Value> = bus
            .command_params("record")
            .iter()
            .map(|p| p["value"].clone())
            .collect();
        assert_eq!(recorded, vec![json!("e1"), json!("e2"), json!("e3")]);

        unit.stop();
        unit.join();
    }

    #[test]
    fn test_disabled_unit_drains_without_executing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(&dir, "quiet.js", record_script());
        let bus = RecordingBus::new();
        let mut unit = ExecutionUnit::new(
            "quiet.js".to_string(),
            path,
            bus.clone(),
            false,
            UnitMode::Normal,
            TEST_POLL,
        );

        // Queue up work before the worker runs, then disable
        for name in ["e1", "e2", "e3"] {
            unit.push_event(BusMessage::event(name, Value::Null));
        }
        unit.set_disabled(true);
        unit.start().unwrap();

        wait_for(|| unit.pending_events() == 0);
        assert!(bus.command_params("record").is_empty());
        assert_eq!(unit.execution_status().last_execution, None);
        assert!(!unit.execution_status().error);

        unit.stop();
        unit.join();
    }

    #[test]
    fn test_fault_sets_error_flag_and_loop_continues() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(&dir, "flaky.js", r#"if (event.name === "bad") { throw new Error("boom"); } command("record", "recorder", { value: event.name });"#);
        let bus = RecordingBus::new();
        let mut unit = ExecutionUnit::new(
            "flaky.js".to_string(),
            path,
            bus.clone(),
            false,
            UnitMode::Normal,
            TEST_POLL,
        );
        unit.start().unwrap();

        unit.push_event(BusMessage::event("bad", Value::Null));
        wait_for(|| unit.execution_status().error);

        // The loop keeps consuming after a fault
        unit.push_event(BusMessage::event("good", Value::Null));
        wait_for(|| !unit.execution_status().error);
        assert!(unit.execution_status().last_execution.is_some());
        assert_eq!(bus.command_params("record").len(), 1);

        unit.stop();
        unit.join();
    }

    #[test]
    fn test_missing_file_kills_unit() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(&dir, "gone.js", record_script());
        let bus = RecordingBus::new();
        let mut unit = ExecutionUnit::new(
            "gone.js".to_string(),
            path.clone(),
            bus,
            false,
            UnitMode::Normal,
            TEST_POLL,
        );
        unit.start().unwrap();

        std::fs::remove_file(&path).unwrap();
        unit.push_event(BusMessage::event("e1", Value::Null));

        wait_for(|| unit.is_dead());
        unit.join();
    }

    #[test]
    fn test_stop_latency_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(&dir, "idle.js", record_script());
        let bus = RecordingBus::new();
        let mut unit = ExecutionUnit::new(
            "idle.js".to_string(),
            path,
            bus,
            false,
            UnitMode::Normal,
            Duration::from_millis(50),
        );
        unit.start().unwrap();
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        unit.stop();
        unit.join();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(&dir, "once.js", record_script());
        let bus = RecordingBus::new();
        let mut unit = ExecutionUnit::new(
            "once.js".to_string(),
            path,
            bus,
            false,
            UnitMode::Normal,
            TEST_POLL,
        );
        unit.start().unwrap();
        unit.start().unwrap();
        unit.stop();
        unit.stop();
        unit.join();
    }

    #[test]
    fn test_debug_run_emits_traces_then_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(&dir, "debugged.js", r#"logger.info("step 1"); throw new Error("boom");"#);
        let bus = RecordingBus::new();
        let mut unit = ExecutionUnit::new(
            "debugged.js".to_string(),
            path,
            bus.clone(),
            false,
            UnitMode::Debug { trigger: None },
            TEST_POLL,
        );
        unit.start().unwrap();
        unit.join();

        let traces = bus.events(DEBUG_MESSAGE_EVENT);
        assert!(traces.iter().any(|e| e.params["message"] == "step 1"));
        assert!(traces.iter().any(|e| e.params["level"] == "EXCEPTION"));
        assert_eq!(bus.events(DEBUG_END_EVENT).len(), 1);
    }

    #[test]
    fn test_debug_run_with_trigger_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(&dir, "triggered.js", r#"logger.info("got " + event.name);"#);
        let bus = RecordingBus::new();
        let mut unit = ExecutionUnit::new(
            "triggered.js".to_string(),
            path,
            bus.clone(),
            false,
            UnitMode::Debug {
                trigger: Some(BusMessage::event("motion.on", Value::Null)),
            },
            TEST_POLL,
        );
        unit.start().unwrap();
        unit.join();

        let traces = bus.events(DEBUG_MESSAGE_EVENT);
        assert!(traces.iter().any(|e| e.params["message"] == "got motion.on"));
        assert_eq!(bus.events(DEBUG_END_EVENT).len(), 1);
    }
}
