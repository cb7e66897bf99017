//! The Warden governance engine: budget admission, health aggregation,
//! and nightly policy adaptation for LLM usage.
//!
//! The engine sits between an application and its LLM providers. Before
//! each call the application asks [`Governor::can_afford`]; after each
//! call it reports the outcome with [`Governor::record_outcome`]. A
//! scheduler runs [`Governor::run_adaptation`] nightly to tune EWMA
//! smoothing factors and move unhealthy providers in and out of each
//! organization's allowed set with hysteresis.
//!
//! # Failure philosophy
//!
//! The two halves of the engine fail in opposite directions, on
//! purpose. The admission path fails **open**: an unreachable store
//! admits the request with the cheapest model forced, because blocking
//! every organization on a database hiccup is worse than a few
//! unmetered calls. The adaptation path fails **closed**: a policy that
//! cannot be read is not adapted, and no store failure ever loosens a
//! policy.
//!
//! # Modules
//!
//! - [`budget`] -- the pre-flight admission controller
//! - [`health`] -- ledger aggregation, baselines, classification
//! - [`adaptation`] -- the nightly policy adaptation loop
//! - [`governor`] -- the facade tying the above together
//! - [`config`] -- YAML configuration loading and validation
//! - [`error`] -- the engine error taxonomy

pub mod adaptation;
pub mod budget;
pub mod config;
pub mod error;
pub mod governor;
pub mod health;

pub use adaptation::AdaptationLoop;
pub use budget::BudgetGate;
pub use config::{
    AdaptationConfig, BudgetConfig, ConfigError, GovernorConfig, LoggingConfig, StoreConfig,
    TelemetryConfig,
};
pub use error::EngineError;
pub use governor::Governor;
pub use health::{
    HealthAggregator, DEFAULT_BASELINE_DAYS, DEFAULT_DEVIATION_THRESHOLD, MIN_BASELINE_SAMPLES,
};
