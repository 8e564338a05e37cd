//! Script Engine
//!
//! The engine keeps one [`ExecutionUnit`] per script file found in the
//! store, reconciling the live set against disk periodically and on demand,
//! broadcasting inbound bus events to every unit's queue, and exposing the
//! operations the CRUD/API layer builds on.
//!
//! The unit table is the only shared mutable state and sits behind a single
//! mutex; workers never take that gate, so a slow script can stall only its
//! own unit.

mod reconciler;
pub mod trace;
pub mod unit;
mod watcher;

pub use reconciler::SCRIPT_EXTENSION;
pub use unit::{ExecutionUnit, UnitMode};
pub use watcher::ScriptWatcher;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{BusConnector, BusMessage};
use crate::config::{self, ConfigStore, ScriptEntry};
use crate::types::{Error, ExecutionStatus, Result, ScriptInfo};

/// Default pause between queue polls when a worker is idle
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Default period between background reconciliation passes
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

// ─────────────────────────────────────────────────────────────────────────────
// Engine Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Engine construction parameters
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the user scripts
    pub scripts_dir: PathBuf,
    /// Pause between queue polls when a worker is idle
    pub poll_interval: Duration,
    /// Period between background reconciliation passes
    pub reconcile_interval: Duration,
}

impl EngineConfig {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Script Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Background reconciliation timer handle
struct Timer {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct ScriptEngine {
    config: EngineConfig,
    bus: Arc<dyn BusConnector>,
    store: Arc<dyn ConfigStore>,
    /// The single gate guarding the unit table and the persisted script map
    units: Mutex<HashMap<String, ExecutionUnit>>,
    /// One-shot debug units, joined at shutdown
    debug_runs: Mutex<Vec<ExecutionUnit>>,
    timer: Mutex<Option<Timer>>,
}

impl ScriptEngine {
    pub fn new(
        config: EngineConfig,
        bus: Arc<dyn BusConnector>,
        store: Arc<dyn ConfigStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            bus,
            store,
            units: Mutex::new(HashMap::new()),
            debug_runs: Mutex::new(Vec::new()),
            timer: Mutex::new(None),
        })
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.config.scripts_dir
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Run the startup sequence: ensure the store directory exists, reconcile
    /// once synchronously, then start the periodic reconciliation timer.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        std::fs::create_dir_all(&self.config.scripts_dir)?;
        self.reconcile_now();

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let engine = Arc::clone(self);
        let interval = self.config.reconcile_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The startup pass already ran; skip the immediate first tick
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let engine = Arc::clone(&engine);
                        // Prune may join worker threads, so off the async runtime
                        if tokio::task::spawn_blocking(move || engine.reconcile_now())
                            .await
                            .is_err()
                        {
                            warn!("reconciliation task panicked");
                        }
                    }
                }
            }
            debug!("reconciliation timer stopped");
        });
        *self.timer.lock() = Some(Timer { shutdown_tx, task });

        info!(dir = %self.config.scripts_dir.display(), "script engine started");
        Ok(())
    }

    /// Graceful teardown: stop the timer first, then signal every worker and
    /// wait for each to finish its current iteration. Never kills a worker
    /// mid-execution.
    pub async fn shutdown(&self) {
        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            let _ = timer.shutdown_tx.send(true);
            if let Err(e) = timer.task.await {
                warn!(error = %e, "reconciliation timer did not stop cleanly");
            }
        }

        let mut units = std::mem::take(&mut *self.units.lock());
        let mut debug_runs = std::mem::take(&mut *self.debug_runs.lock());
        let joined = tokio::task::spawn_blocking(move || {
            // Signal everything first so the workers wind down in parallel
            for unit in units.values() {
                unit.stop();
            }
            for unit in units.values_mut() {
                unit.join();
            }
            for unit in debug_runs.iter_mut() {
                unit.stop();
                unit.join();
            }
        })
        .await;
        if joined.is_err() {
            warn!("worker join task panicked");
        }
        info!("script engine stopped");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Dispatch and Reconciliation
    // ─────────────────────────────────────────────────────────────────────

    /// Broadcast an inbound bus event to every tracked unit's queue. No
    /// filtering by event type; each script decides relevance itself.
    pub fn push_event(&self, message: BusMessage) {
        let units = self.units.lock();
        debug!(
            event = message.event_name().unwrap_or_default(),
            units = units.len(),
            "dispatching event"
        );
        for unit in units.values() {
            unit.push_event(message.clone());
        }
    }

    /// Force an out-of-cycle discovery/prune pass. Serialized by the unit
    /// table gate, so concurrent calls queue up rather than interleave.
    pub fn reconcile_now(&self) {
        let mut units = self.units.lock();
        self.reconcile_locked(&mut units);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries and Per-Script Operations
    // ─────────────────────────────────────────────────────────────────────

    pub fn list_scripts(&self) -> Vec<ScriptInfo> {
        let units = self.units.lock();
        units
            .values()
            .map(|unit| {
                let status = unit.execution_status();
                ScriptInfo {
                    name: unit.name().to_string(),
                    last_execution: status.last_execution,
                    disabled: unit.is_disabled(),
                }
            })
            .collect()
    }

    pub fn execution_status(&self, name: &str) -> Result<ExecutionStatus> {
        let units = self.units.lock();
        let unit = units
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        Ok(unit.execution_status())
    }

    /// Enable or disable a script, persisting the flag.
    pub fn set_disabled(&self, name: &str, disabled: bool) -> Result<()> {
        let units = self.units.lock();
        let unit = units
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        let mut scripts = config::load_script_map(self.store.as_ref());
        scripts.insert(name.to_string(), ScriptEntry { disabled });
        config::store_script_map(self.store.as_ref(), &scripts)?;
        unit.set_disabled(disabled);
        Ok(())
    }

    /// Launch a one-shot debug run of a tracked script. Trace output arrives
    /// asynchronously as `scripts.debug.message` events, terminated by a
    /// single `scripts.debug.end` regardless of the outcome.
    pub fn run_debug(&self, name: &str, trigger: Option<BusMessage>) -> Result<()> {
        let path = {
            let units = self.units.lock();
            let unit = units
                .get(name)
                .ok_or_else(|| Error::NotFound(name.to_string()))?;
            unit.path().to_path_buf()
        };
        if !path.exists() {
            return Err(Error::NotFound(format!("script file for \"{name}\"")));
        }

        let mut unit = ExecutionUnit::new(
            name.to_string(),
            path,
            Arc::clone(&self.bus),
            false,
            UnitMode::Debug { trigger },
            self.config.poll_interval,
        );
        unit.start()?;
        self.debug_runs.lock().push(unit);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // File Operations
    // ─────────────────────────────────────────────────────────────────────

    /// Write (or overwrite) a script source and pick up the change.
    pub fn save_script(&self, name: &str, source: &str) -> Result<()> {
        validate_script_name(name)?;
        let mut units = self.units.lock();
        std::fs::write(self.config.scripts_dir.join(name), source)?;
        self.reconcile_locked(&mut units);
        Ok(())
    }

    /// Read a tracked script's full source.
    pub fn read_script(&self, name: &str) -> Result<String> {
        let units = self.units.lock();
        let unit = units
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        Ok(std::fs::read_to_string(unit.path())?)
    }

    /// Remove a script file and reap its unit.
    pub fn delete_script(&self, name: &str) -> Result<()> {
        let mut units = self.units.lock();
        let path = match units.get(name) {
            Some(unit) => unit.path().to_path_buf(),
            None => self.config.scripts_dir.join(name),
        };
        if !path.exists() {
            return Err(Error::NotFound(name.to_string()));
        }
        std::fs::remove_file(&path)?;
        self.reconcile_locked(&mut units);
        Ok(())
    }

    /// Rename a script, carrying its persisted disabled flag to the new name.
    pub fn rename_script(&self, old: &str, new: &str) -> Result<()> {
        validate_script_name(new)?;
        if old == new {
            return Err(Error::InvalidParameter(
                "script names must differ".to_string(),
            ));
        }

        let mut units = self.units.lock();
        if units.contains_key(new) {
            return Err(Error::AlreadyExists(new.to_string()));
        }
        let old_path = match units.get(old) {
            Some(unit) => unit.path().to_path_buf(),
            None => return Err(Error::NotFound(old.to_string())),
        };
        let new_path = old_path.with_file_name(new);
        std::fs::rename(&old_path, &new_path)?;

        // Move the persisted entry before reconciling so the discovery pass
        // restores the flag under the new name
        let mut scripts = config::load_script_map(self.store.as_ref());
        if let Some(entry) = scripts.remove(old) {
            scripts.insert(new.to_string(), entry);
            config::store_script_map(self.store.as_ref(), &scripts)?;
        }

        self.reconcile_locked(&mut units);
        Ok(())
    }

    /// Move an uploaded file into the script store and start tracking it.
    /// Returns the tracked script name.
    pub fn install_script(&self, source: &Path) -> Result<String> {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidParameter("upload path has no file name".to_string()))?
            .to_string();
        validate_script_name(&name)?;
        if !source.exists() {
            return Err(Error::NotFound(source.display().to_string()));
        }

        let mut units = self.units.lock();
        move_file(source, &self.config.scripts_dir.join(&name))?;
        self.reconcile_locked(&mut units);
        Ok(name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn validate_script_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidParameter("script name is empty".to_string()));
    }
    if name.contains('/') || name.contains(std::path::MAIN_SEPARATOR) {
        return Err(Error::InvalidParameter(
            "script name must not contain path separators".to_string(),
        ));
    }
    if Path::new(name).extension().and_then(|e| e.to_str()) != Some(SCRIPT_EXTENSION) {
        return Err(Error::InvalidParameter(format!(
            "only .{SCRIPT_EXTENSION} scripts are supported"
        )));
    }
    Ok(())
}

/// Rename, falling back to copy + remove for cross-device moves.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
