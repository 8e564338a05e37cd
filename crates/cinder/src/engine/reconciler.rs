//! Reconciliation
//!
//! Keeps the live unit set in sync with the script files on disk: prune
//! first (files gone, workers dead), then discover. Both passes run under
//! the unit-table gate, which also serializes access to the persisted
//! script map so the two can never drift apart.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{self, ScriptEntry};
use crate::engine::unit::{ExecutionUnit, UnitMode};
use crate::engine::ScriptEngine;

/// File extension a script file must carry to be tracked
pub const SCRIPT_EXTENSION: &str = "js";

impl ScriptEngine {
    /// One full reconciliation pass. The caller holds the unit-table gate.
    pub(super) fn reconcile_locked(&self, units: &mut HashMap<String, ExecutionUnit>) {
        self.prune(units);
        self.discover(units);
    }

    /// Drop every tracked script whose backing file no longer exists, or
    /// whose worker died because the file vanished mid-run. Stops the worker,
    /// removes the table entry and the persisted configuration entry.
    fn prune(&self, units: &mut HashMap<String, ExecutionUnit>) {
        let stale: Vec<String> = units
            .iter()
            .filter(|(_, unit)| unit.is_dead() || !unit.path().exists())
            .map(|(name, _)| name.clone())
            .collect();
        if stale.is_empty() {
            return;
        }

        let mut scripts = config::load_script_map(self.store.as_ref());
        for name in stale {
            info!(script = %name, "dropping removed script");
            if let Some(mut unit) = units.remove(&name) {
                unit.stop();
                unit.join();
            }
            if scripts.remove(&name).is_some() {
                if let Err(e) = config::store_script_map(self.store.as_ref(), &scripts) {
                    warn!(script = %name, error = %e, "failed to prune persisted entry");
                }
            }
        }
    }

    /// Walk the script store and start a worker for every script file not
    /// yet tracked, restoring its persisted disabled flag (default enabled,
    /// persisting a fresh entry).
    fn discover(&self, units: &mut HashMap<String, ExecutionUnit>) {
        let mut scripts = config::load_script_map(self.store.as_ref());
        let mut found = Vec::new();
        collect_scripts(&self.config.scripts_dir, &mut found);

        for path in found {
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
                continue;
            };
            // First discovered wins; later duplicates are ignored
            if units.contains_key(&name) {
                continue;
            }

            info!(script = %name, "discovered new script");
            let disabled = match scripts.get(&name) {
                Some(entry) => entry.disabled,
                None => {
                    scripts.insert(name.clone(), ScriptEntry::default());
                    if let Err(e) = config::store_script_map(self.store.as_ref(), &scripts) {
                        warn!(script = %name, error = %e, "failed to persist new entry");
                    }
                    false
                }
            };

            let mut unit = ExecutionUnit::new(
                name.clone(),
                path,
                Arc::clone(&self.bus),
                disabled,
                UnitMode::Normal,
                self.config.poll_interval,
            );
            if let Err(e) = unit.start() {
                warn!(script = %name, error = %e, "failed to start script worker");
            }
            units.insert(name, unit);
        }
    }
}

/// Recursively collect script files in filesystem enumeration order. Files
/// without the script extension are skipped.
fn collect_scripts(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "cannot enumerate script directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_scripts(&path, out);
        } else if path.extension().and_then(|e| e.to_str()) == Some(SCRIPT_EXTENSION) {
            out.push(path);
        } else {
            debug!(file = %path.display(), "skipping non-script file");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
