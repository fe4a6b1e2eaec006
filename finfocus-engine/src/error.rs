//! # Engine Errors
//!
//! Batch-level failures of the orchestrator. Per-row failures never appear
//! here; they travel inside each row's structured
//! [`finfocus_plugin_sdk::models::CostError`] and never fail the batch.
//!
//! [`EngineError::BudgetExit`] is the typed budget-exit sentinel of the
//! exit-code policy: the embedding process maps it onto its OS exit status
//! via [`process_exit_code`]. Exit code 1 stays reserved for ordinary
//! evaluation errors; a configured budget exit code never overrides it.

use crate::cache::CacheError;
use finfocus_plugin_sdk::PluginError;
use thiserror::Error;

/// Batch-level engine failures.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid or unresolvable configuration
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Budget arithmetic or evaluation failure
    #[error("evaluation error: {message}")]
    Evaluation { message: String },

    /// Persistent store failure
    #[error("store error: {0}")]
    Store(#[from] std::io::Error),

    /// Cache store failure that escaped the WARN-and-continue path
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Payload failed to serialize or deserialize
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Plugin host failure that prevented any row from being produced
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// A budget crossed its threshold under an exit-on-threshold policy.
    /// Carries the configured process exit code.
    #[error("budget threshold exceeded (exit code {code})")]
    BudgetExit { code: u8 },
}

impl EngineError {
    /// The OS exit code this error maps to.
    pub fn exit_code(&self) -> u8 {
        match self {
            EngineError::BudgetExit { code } => *code,
            _ => 1,
        }
    }
}

/// Map an engine result onto a process exit status.
pub fn process_exit_code<T>(result: &std::result::Result<T, EngineError>) -> u8 {
    match result {
        Ok(_) => 0,
        Err(err) => err.exit_code(),
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
