use serde::Serialize;

use crate::config::ConfigError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Summary row returned by `ScriptEngine::list_scripts`
#[derive(Debug, Clone, Serialize)]
pub struct ScriptInfo {
    /// Script file name, unique among live units
    pub name: String,
    /// Unix timestamp of the last completed execution
    pub last_execution: Option<i64>,
    /// Whether dequeued events are currently discarded instead of executed
    pub disabled: bool,
}

/// Last-execution metadata for a single unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutionStatus {
    /// Unix timestamp of the last completed execution, if any
    pub last_execution: Option<i64>,
    /// True if the last execution ended in a fault
    pub error: bool,
}
