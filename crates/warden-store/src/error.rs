//! Error types for the persistence layer.
//!
//! All errors are propagated via [`StoreError`] which wraps the
//! underlying [`sqlx`] errors with additional context about which
//! operation failed. Callers on the admission path absorb these errors
//! (fail open); the adaptation loop logs and skips.

/// Errors that can occur in the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The store is unreachable or deliberately failing.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
