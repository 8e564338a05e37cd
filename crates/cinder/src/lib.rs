//! Cinder - Event-Driven Script Engine
//!
//! Cinder runs user-supplied JavaScript files against events arriving on a
//! hub message bus. Each script gets its own isolated worker and event
//! queue; a reconciler keeps the worker set in sync with the files on disk
//! and preserves per-script settings across restarts.
//!
//! The bus transport and the host framework are external collaborators,
//! reached through the traits in [`bus`] and [`config`].

// Bus interface types
pub mod bus;

// Persisted configuration
pub mod config;

// Script execution engine
pub mod engine;

// Crate-wide error and status types
pub mod types;

pub use engine::{EngineConfig, ScriptEngine, ScriptWatcher};
pub use types::{Error, ExecutionStatus, Result, ScriptInfo};
