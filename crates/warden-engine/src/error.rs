//! Error types for the governance engine.
//!
//! The taxonomy is deliberately small. A missing policy is not an error
//! (the engine substitutes defaults); a hard-cap denial is not an error
//! (it is a normal [`warden_types::BudgetDecision`]). What remains:
//! store failures, timeouts, invalid inputs, and bad configuration.
//!
//! Propagation policy: on the admission path these errors are absorbed
//! locally and the check fails open; in the adaptation path they are
//! logged and the affected organization is skipped. Nothing here should
//! ever terminate a caller's request lifecycle.

use warden_store::StoreError;

use crate::config::ConfigError;

/// Errors that can occur inside the governance engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A persistence operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A caller passed an invalid argument (negative cost, empty
    /// provider). Rejected at the call boundary, never coerced.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A store operation exceeded its bounded timeout.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
    },

    /// The engine configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
