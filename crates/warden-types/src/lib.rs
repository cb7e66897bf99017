//! Shared type definitions for the Warden LLM usage governance engine.
//!
//! Every component of the governance engine -- the usage ledger, the
//! telemetry tracker, the budget admission controller, the health
//! aggregator, and the policy adaptation loop -- exchanges data through
//! the types defined here. Keeping them in one dependency-light crate
//! prevents field-name drift between the store schema and the in-memory
//! model: rows are always decoded into these validated structs, never
//! passed around as loosely-typed maps.
//!
//! # Modules
//!
//! - [`ids`] -- type-safe UUID newtype identifiers
//! - [`usage`] -- the immutable [`UsageRecord`] ledger entry
//! - [`policy`] -- per-organization [`Policy`] (caps, allowed providers)
//! - [`telemetry`] -- per-(provider, model) EWMA [`TelemetryState`]
//! - [`health`] -- aggregated metrics, baselines, and health classification
//! - [`budget`] -- admission decisions and budget dashboard state
//! - [`adaptation`] -- the nightly [`AdaptationResult`] audit artifact
//!
//! All monetary values use [`rust_decimal::Decimal`] for financial
//! precision -- no floating-point arithmetic on money. Statistical values
//! (EWMAs, error rates, deviations) are `f64`.

pub mod adaptation;
pub mod budget;
pub mod health;
pub mod ids;
pub mod policy;
pub mod telemetry;
pub mod usage;

// Re-export primary types at crate root.
pub use adaptation::{
    AdaptationResult, AlphaAdjustment, ProviderDisablement, ProviderEnablement,
};
pub use budget::{BudgetBand, BudgetDecision, BudgetState};
pub use health::{AggregatedMetrics, BaselineMetrics, HealthLevel, HealthStatus, PairKey};
pub use ids::{AdaptationRunId, OrgId, UsageRecordId};
pub use policy::{Policy, SmoothingBounds};
pub use telemetry::TelemetryState;
pub use usage::{TaskCategory, UsageRecord, UsageRecordError, UsageRecordParams};
