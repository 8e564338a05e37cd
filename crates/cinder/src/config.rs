//! Persisted Engine Configuration
//!
//! The only state that must survive a restart is the per-script disabled
//! map, stored under the `scripts` field. The store itself is generic
//! field-level access so the host framework can substitute its own backend.

use std::collections::BTreeMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field holding the per-script configuration map
pub const SCRIPTS_FIELD: &str = "scripts";

/// Persisted per-script settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptEntry {
    #[serde(default)]
    pub disabled: bool,
}

/// Script name to persisted settings
pub type ScriptMap = BTreeMap<String, ScriptEntry>;

/// Errors raised by a configuration store
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed configuration: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Field-level access to persisted configuration.
pub trait ConfigStore: Send + Sync {
    fn get_field(&self, name: &str) -> Result<Option<Value>, ConfigError>;
    fn set_field(&self, name: &str, value: Value) -> Result<(), ConfigError>;
}

/// Load the persisted script map, treating a missing or unreadable field as
/// empty so a corrupt entry never blocks reconciliation.
pub fn load_script_map(store: &dyn ConfigStore) -> ScriptMap {
    store
        .get_field(SCRIPTS_FIELD)
        .ok()
        .flatten()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}

/// Persist the script map.
pub fn store_script_map(store: &dyn ConfigStore, map: &ScriptMap) -> Result<(), ConfigError> {
    store.set_field(SCRIPTS_FIELD, serde_json::to_value(map)?)
}

// ─────────────────────────────────────────────────────────────────────────────
// File Store
// ─────────────────────────────────────────────────────────────────────────────

/// JSON file backed store. The whole document is cached in memory and
/// rewritten on every `set_field`.
pub struct FileConfigStore {
    path: PathBuf,
    cache: Mutex<serde_json::Map<String, Value>>,
}

impl FileConfigStore {
    /// Open a store, loading the existing document when the file is present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let cache = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            serde_json::Map::new()
        };
        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }
}

impl ConfigStore for FileConfigStore {
    fn get_field(&self, name: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.cache.lock().get(name).cloned())
    }

    fn set_field(&self, name: &str, value: Value) -> Result<(), ConfigError> {
        let mut cache = self.cache.lock();
        cache.insert(name.to_string(), value);
        let body = serde_json::to_string_pretty(&*cache)?;
        std::fs::write(&self.path, body)?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
