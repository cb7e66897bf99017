//! Per-organization governance policy: cost caps and allowed providers.
//!
//! The [`Policy`] is the only state read synchronously on the request
//! path. Everything statistical (EWMAs, baselines) lives elsewhere; the
//! admission controller loads the policy, reads a spend sum, and decides.
//!
//! A policy is created with system defaults when an organization is
//! created, and mutated only by the policy adaptation loop (provider
//! disable/re-enable) or explicit administrative action.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::OrgId;

/// Default per-request cost cap: $0.50.
const DEFAULT_MAX_REQUEST_COST: Decimal = Decimal::from_parts(50, 0, 0, false, 2);

/// Default daily cost cap: $10.00.
const DEFAULT_MAX_DAILY_COST: Decimal = Decimal::from_parts(1000, 0, 0, false, 2);

/// Default EWMA smoothing factor floor.
const DEFAULT_MIN_ALPHA: f64 = 0.1;

/// Default EWMA smoothing factor ceiling.
const DEFAULT_MAX_ALPHA: f64 = 0.5;

/// Default alpha adjustment step applied by the adaptation loop.
const DEFAULT_ALPHA_STEP: f64 = 0.05;

// ---------------------------------------------------------------------------
// Smoothing bounds
// ---------------------------------------------------------------------------

/// Bounds and step size for EWMA smoothing factor tuning.
///
/// The adaptation loop moves each (provider, model) pair's alpha by
/// `step` per nightly run, clamped into `[min_alpha, max_alpha]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothingBounds {
    /// Smallest permitted smoothing factor (most smoothed).
    pub min_alpha: f64,
    /// Largest permitted smoothing factor (most reactive).
    pub max_alpha: f64,
    /// Adjustment step applied per adaptation run.
    pub step: f64,
}

impl SmoothingBounds {
    /// Clamp a candidate alpha into `[min_alpha, max_alpha]`.
    pub fn clamp(&self, alpha: f64) -> f64 {
        alpha.clamp(self.min_alpha, self.max_alpha)
    }
}

impl Default for SmoothingBounds {
    fn default() -> Self {
        Self {
            min_alpha: DEFAULT_MIN_ALPHA,
            max_alpha: DEFAULT_MAX_ALPHA,
            step: DEFAULT_ALPHA_STEP,
        }
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// The governing policy for a single organization.
///
/// Providers live in exactly one of two sets: `allowed_providers` or
/// `disabled_providers`. The adaptation loop moves unhealthy providers
/// from allowed to disabled and recovered providers back, with
/// hysteresis between the two thresholds to prevent flapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// The organization this policy governs.
    pub org_id: OrgId,
    /// Maximum estimated cost permitted for a single request.
    pub max_request_cost: Decimal,
    /// Maximum total spend permitted per UTC day.
    pub max_daily_cost: Decimal,
    /// Providers requests may currently be routed to.
    pub allowed_providers: BTreeSet<String>,
    /// Providers the adaptation loop has disabled.
    pub disabled_providers: BTreeSet<String>,
    /// Smoothing factor bounds for telemetry on this organization's calls.
    pub smoothing: SmoothingBounds,
    /// When the policy was last written.
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    /// Create a policy with system defaults for a new organization.
    ///
    /// The allowed set starts empty, meaning "no provider restriction":
    /// admission checks only consult the disabled set until the first
    /// provider is explicitly registered.
    pub fn with_defaults(org_id: OrgId) -> Self {
        Self {
            org_id,
            max_request_cost: DEFAULT_MAX_REQUEST_COST,
            max_daily_cost: DEFAULT_MAX_DAILY_COST,
            allowed_providers: BTreeSet::new(),
            disabled_providers: BTreeSet::new(),
            smoothing: SmoothingBounds::default(),
            updated_at: Utc::now(),
        }
    }

    /// Whether requests may be routed to the given provider.
    ///
    /// A provider is allowed when it is not in the disabled set and the
    /// allowed set is either empty (unrestricted) or contains it.
    pub fn is_provider_allowed(&self, provider: &str) -> bool {
        if self.disabled_providers.contains(provider) {
            return false;
        }
        self.allowed_providers.is_empty() || self.allowed_providers.contains(provider)
    }

    /// Move a provider from the allowed set to the disabled set.
    ///
    /// Returns `true` if the policy changed, `false` if the provider was
    /// already disabled. Re-running with unchanged inputs is a no-op,
    /// which keeps the adaptation loop idempotent.
    pub fn disable_provider(&mut self, provider: &str) -> bool {
        if self.disabled_providers.contains(provider) {
            return false;
        }
        self.allowed_providers.remove(provider);
        self.disabled_providers.insert(provider.to_owned());
        self.updated_at = Utc::now();
        true
    }

    /// Move a provider from the disabled set back to the allowed set.
    ///
    /// Returns `true` if the policy changed, `false` if the provider was
    /// not disabled.
    pub fn enable_provider(&mut self, provider: &str) -> bool {
        if !self.disabled_providers.remove(provider) {
            return false;
        }
        self.allowed_providers.insert(provider.to_owned());
        self.updated_at = Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let policy = Policy::with_defaults(OrgId::new());
        assert_eq!(policy.max_request_cost, Decimal::new(50, 2));
        assert_eq!(policy.max_daily_cost, Decimal::new(1000, 2));
        assert!(policy.allowed_providers.is_empty());
        assert!(policy.disabled_providers.is_empty());
        assert!(policy.smoothing.min_alpha < policy.smoothing.max_alpha);
    }

    #[test]
    fn empty_allowed_set_is_unrestricted() {
        let policy = Policy::with_defaults(OrgId::new());
        assert!(policy.is_provider_allowed("anything"));
    }

    #[test]
    fn disable_moves_provider_between_sets() {
        let mut policy = Policy::with_defaults(OrgId::new());
        policy.allowed_providers.insert("acme".to_owned());

        assert!(policy.disable_provider("acme"));
        assert!(!policy.allowed_providers.contains("acme"));
        assert!(policy.disabled_providers.contains("acme"));
        assert!(!policy.is_provider_allowed("acme"));
    }

    #[test]
    fn disable_is_idempotent() {
        let mut policy = Policy::with_defaults(OrgId::new());
        policy.allowed_providers.insert("acme".to_owned());

        assert!(policy.disable_provider("acme"));
        assert!(!policy.disable_provider("acme"));
    }

    #[test]
    fn enable_restores_provider() {
        let mut policy = Policy::with_defaults(OrgId::new());
        policy.allowed_providers.insert("acme".to_owned());
        policy.disable_provider("acme");

        assert!(policy.enable_provider("acme"));
        assert!(policy.is_provider_allowed("acme"));
        // Second enable is a no-op.
        assert!(!policy.enable_provider("acme"));
    }

    #[test]
    fn enable_of_never_disabled_provider_is_noop() {
        let mut policy = Policy::with_defaults(OrgId::new());
        assert!(!policy.enable_provider("ghost"));
        assert!(!policy.allowed_providers.contains("ghost"));
    }

    #[test]
    fn smoothing_clamp_respects_bounds() {
        let bounds = SmoothingBounds::default();
        assert!((bounds.clamp(0.9) - bounds.max_alpha).abs() < f64::EPSILON);
        assert!((bounds.clamp(0.01) - bounds.min_alpha).abs() < f64::EPSILON);
        assert!((bounds.clamp(0.3) - 0.3).abs() < f64::EPSILON);
    }
}
