//! Aggregated metrics, historical baselines, and health classification.
//!
//! The health aggregator compares live EWMA telemetry against a trailing
//! historical baseline computed from the usage ledger, and classifies
//! each (provider, model) pair as healthy, warning, or critical for
//! operator triage.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::telemetry::TelemetryState;

// ---------------------------------------------------------------------------
// Pair key
// ---------------------------------------------------------------------------

/// A (provider, model) pair -- the key for all telemetry and aggregation.
///
/// `Ord` so maps keyed by pairs iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairKey {
    /// LLM provider name.
    pub provider: String,
    /// Model identifier within the provider.
    pub model: String,
}

impl PairKey {
    /// Build a pair key from provider and model names.
    pub fn new(provider: &str, model: &str) -> Self {
        Self {
            provider: provider.to_owned(),
            model: model.to_owned(),
        }
    }
}

impl core::fmt::Display for PairKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

// ---------------------------------------------------------------------------
// Aggregated metrics
// ---------------------------------------------------------------------------

/// Point-in-time aggregate of ledger records for one (provider, model)
/// pair over a date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    /// Total number of call attempts.
    pub requests: u64,
    /// Number of failed call attempts.
    pub failures: u64,
    /// Mean latency across all attempts (ms).
    pub avg_latency_ms: f64,
    /// Failure fraction: `failures / requests`.
    pub error_rate: f64,
    /// Success fraction: `1 - error_rate`.
    pub success_rate: f64,
    /// Mean estimated cost per request.
    pub avg_cost: Decimal,
    /// Total estimated cost across all requests.
    pub total_cost: Decimal,
}

// ---------------------------------------------------------------------------
// Baseline
// ---------------------------------------------------------------------------

/// Historical reference metrics over a trailing window, recomputed on
/// demand from the ledger. Absent when too few samples exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineMetrics {
    /// Mean latency over the window (ms).
    pub avg_latency_ms: f64,
    /// Mean error rate over the window.
    pub error_rate: f64,
    /// Number of samples underlying the baseline.
    pub samples: u64,
    /// Trailing window length in days.
    pub window_days: u32,
}

// ---------------------------------------------------------------------------
// Health classification
// ---------------------------------------------------------------------------

/// Health classification for a (provider, model) pair.
///
/// Variant order is the triage order: deriving `Ord` sorts critical
/// first, then warning, then healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    /// Immediate attention required.
    Critical,
    /// Something is off but not critical.
    Warning,
    /// Operating within normal bounds.
    Healthy,
}

/// Health status for one (provider, model) pair with live telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// The pair this status describes.
    pub pair: PairKey,
    /// Classified health level.
    pub level: HealthLevel,
    /// Snapshot of the live telemetry that drove the classification.
    pub live: TelemetryState,
    /// Historical baseline, when enough history exists.
    pub baseline: Option<BaselineMetrics>,
    /// Human-readable reasons and recommendations.
    pub reasons: Vec<String>,
    /// When the classification was computed.
    pub classified_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_levels_sort_critical_first() {
        let mut levels = [HealthLevel::Healthy, HealthLevel::Critical, HealthLevel::Warning];
        levels.sort();
        assert_eq!(
            levels,
            [HealthLevel::Critical, HealthLevel::Warning, HealthLevel::Healthy]
        );
    }

    #[test]
    fn pair_key_display() {
        let key = PairKey::new("acme", "acme-large");
        assert_eq!(key.to_string(), "acme/acme-large");
    }

    #[test]
    fn pair_keys_order_deterministically() {
        let a = PairKey::new("acme", "large");
        let b = PairKey::new("acme", "small");
        let c = PairKey::new("zenith", "base");
        assert!(a < b);
        assert!(b < c);
    }
}
