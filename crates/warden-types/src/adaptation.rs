//! The audit artifact produced by each run of the policy adaptation loop.
//!
//! One [`AdaptationResult`] is written per adaptation run per
//! organization. It is immutable once written and consumed by operators
//! and alerting, never by the admission path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AdaptationRunId, OrgId};

/// Recommendation text used when a run changed nothing.
pub const NO_ADAPTATIONS_NEEDED: &str = "No policy adaptations needed";

/// One smoothing factor change applied by the adaptation loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlphaAdjustment {
    /// LLM provider name.
    pub provider: String,
    /// Model identifier within the provider.
    pub model: String,
    /// Alpha before the adjustment.
    pub old_alpha: f64,
    /// Alpha after the adjustment.
    pub new_alpha: f64,
    /// Why the adjustment was made.
    pub reason: String,
}

/// One provider removed from an organization's allowed set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDisablement {
    /// The disabled provider.
    pub provider: String,
    /// The live error rate that triggered the disablement.
    pub error_rate: f64,
    /// Window sample count behind the measurement.
    pub samples: u64,
    /// Why the provider was disabled.
    pub reason: String,
}

/// One provider restored to an organization's allowed set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEnablement {
    /// The re-enabled provider.
    pub provider: String,
    /// The mean live error rate at re-enablement.
    pub error_rate: f64,
    /// Aggregate window sample count across the provider's models.
    pub samples: u64,
    /// Why the provider was re-enabled.
    pub reason: String,
}

/// The complete, immutable record of one adaptation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationResult {
    /// Unique identifier for this run.
    pub run_id: AdaptationRunId,
    /// The organization the run adapted.
    pub org_id: OrgId,
    /// Smoothing factor adjustments applied.
    pub alpha_adjustments: Vec<AlphaAdjustment>,
    /// Providers disabled during the run.
    pub disablements: Vec<ProviderDisablement>,
    /// Providers re-enabled during the run.
    pub enablements: Vec<ProviderEnablement>,
    /// Human-readable recommendations for operators.
    pub recommendations: Vec<String>,
    /// When the run completed.
    pub completed_at: DateTime<Utc>,
}

impl AdaptationResult {
    /// Create an empty result for a run that is about to start.
    pub fn begin(org_id: OrgId) -> Self {
        Self {
            run_id: AdaptationRunId::new(),
            org_id,
            alpha_adjustments: Vec::new(),
            disablements: Vec::new(),
            enablements: Vec::new(),
            recommendations: Vec::new(),
            completed_at: Utc::now(),
        }
    }

    /// Whether the run changed nothing.
    pub fn is_noop(&self) -> bool {
        self.alpha_adjustments.is_empty()
            && self.disablements.is_empty()
            && self.enablements.is_empty()
    }

    /// Finalize the result: stamp the completion time and, for a no-op
    /// run, attach the standard "nothing to do" recommendation.
    pub fn finalize(mut self) -> Self {
        if self.is_noop() && self.recommendations.is_empty() {
            self.recommendations.push(NO_ADAPTATIONS_NEEDED.to_owned());
        }
        self.completed_at = Utc::now();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_run_finalizes_as_noop() {
        let result = AdaptationResult::begin(OrgId::new()).finalize();
        assert!(result.is_noop());
        assert_eq!(
            result.recommendations,
            vec![NO_ADAPTATIONS_NEEDED.to_owned()]
        );
    }

    #[test]
    fn run_with_disablement_is_not_noop() {
        let mut result = AdaptationResult::begin(OrgId::new());
        result.disablements.push(ProviderDisablement {
            provider: "acme".to_owned(),
            error_rate: 0.55,
            samples: 12,
            reason: "error rate above disable threshold".to_owned(),
        });
        let result = result.finalize();
        assert!(!result.is_noop());
        assert!(result.recommendations.is_empty());
    }

    #[test]
    fn result_serde_roundtrip() {
        let result = AdaptationResult::begin(OrgId::new()).finalize();
        let json = serde_json::to_string(&result).unwrap_or_default();
        let restored: Result<AdaptationResult, _> = serde_json::from_str(&json);
        assert!(restored.is_ok());
    }
}
