//! Embedded QuickJS runtime for cinder user scripts.
//!
//! A script is a plain JavaScript file evaluated top to bottom in a fresh
//! context, with the triggering event and the host capabilities (`command`,
//! `logger`, `console`) bound as globals. The host side of those
//! capabilities is abstracted behind the [`CommandHost`] and [`ScriptLog`]
//! traits so the runtime stays independent of the engine that drives it.

mod error;
mod globals;
mod runtime;

pub use error::{CommandHost, ScriptFault, ScriptLog, TraceLevel};
pub use globals::register_script_globals;
pub use runtime::{execute_script, EventBinding};
