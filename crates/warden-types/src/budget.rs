//! Budget admission decisions and dashboard state.
//!
//! The admission controller returns a [`BudgetDecision`] for every
//! pre-flight check. A denial is a normal decision, not an error; the
//! only errors the controller surfaces are invalid inputs. Internal
//! failures fail open as an allow-with-degradation decision.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::OrgId;

/// Usage percentage at which degradation begins (the "high" band).
pub const HIGH_USAGE_PERCENT: Decimal = Decimal::from_parts(80, 0, 0, false, 0);

/// Usage percentage at which the "critical" band begins.
pub const CRITICAL_USAGE_PERCENT: Decimal = Decimal::from_parts(95, 0, 0, false, 0);

/// Usage percentage at which the budget is exhausted.
pub const EXCEEDED_USAGE_PERCENT: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

// ---------------------------------------------------------------------------
// Budget band
// ---------------------------------------------------------------------------

/// Coarse budget utilization band for dashboards and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetBand {
    /// Below 80% of the daily cap.
    Normal,
    /// At or above 80% of the daily cap.
    High,
    /// At or above 95% of the daily cap.
    Critical,
    /// Above 100% of the daily cap.
    Exceeded,
}

impl BudgetBand {
    /// Derive the band from a usage percentage.
    ///
    /// Exactly 100% is still [`BudgetBand::Critical`]; the budget is only
    /// exceeded strictly above the cap.
    pub fn from_usage_percent(usage_percent: Decimal) -> Self {
        if usage_percent > EXCEEDED_USAGE_PERCENT {
            Self::Exceeded
        } else if usage_percent >= CRITICAL_USAGE_PERCENT {
            Self::Critical
        } else if usage_percent >= HIGH_USAGE_PERCENT {
            Self::High
        } else {
            Self::Normal
        }
    }
}

// ---------------------------------------------------------------------------
// Admission decision
// ---------------------------------------------------------------------------

/// The outcome of a pre-flight budget admission check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// When `true`, the caller should downgrade to the cheapest eligible
    /// model (graceful degradation) rather than the requested one.
    pub force_cheapest: bool,
    /// Human-readable reason for a denial or degradation.
    pub reason: Option<String>,
    /// Spend recorded so far today.
    pub daily_spend: Decimal,
    /// Budget remaining for today (never negative).
    pub remaining_budget: Decimal,
    /// The daily cap the decision was made against.
    pub max_daily_cost: Decimal,
    /// `daily_spend / max_daily_cost * 100`.
    pub usage_percent: Decimal,
}

impl BudgetDecision {
    /// An unconditional allow at normal utilization.
    pub const fn allow(
        daily_spend: Decimal,
        remaining_budget: Decimal,
        max_daily_cost: Decimal,
        usage_percent: Decimal,
    ) -> Self {
        Self {
            allowed: true,
            force_cheapest: false,
            reason: None,
            daily_spend,
            remaining_budget,
            max_daily_cost,
            usage_percent,
        }
    }

    /// An allow that signals graceful degradation to the cheapest model.
    pub const fn allow_degraded(
        reason: String,
        daily_spend: Decimal,
        remaining_budget: Decimal,
        max_daily_cost: Decimal,
        usage_percent: Decimal,
    ) -> Self {
        Self {
            allowed: true,
            force_cheapest: true,
            reason: Some(reason),
            daily_spend,
            remaining_budget,
            max_daily_cost,
            usage_percent,
        }
    }

    /// A hard denial. Not an error -- a legitimate admission outcome.
    pub const fn deny(
        reason: String,
        daily_spend: Decimal,
        remaining_budget: Decimal,
        max_daily_cost: Decimal,
        usage_percent: Decimal,
    ) -> Self {
        Self {
            allowed: false,
            force_cheapest: false,
            reason: Some(reason),
            daily_spend,
            remaining_budget,
            max_daily_cost,
            usage_percent,
        }
    }

    /// The fail-open decision used when the policy or ledger store is
    /// unreachable: admit the request but force the cheapest model,
    /// trading strict cost enforcement for availability.
    pub const fn fail_open(reason: String) -> Self {
        Self {
            allowed: true,
            force_cheapest: true,
            reason: Some(reason),
            daily_spend: Decimal::ZERO,
            remaining_budget: Decimal::ZERO,
            max_daily_cost: Decimal::ZERO,
            usage_percent: Decimal::ZERO,
        }
    }

    /// The utilization band this decision falls in.
    pub fn band(&self) -> BudgetBand {
        BudgetBand::from_usage_percent(self.usage_percent)
    }
}

// ---------------------------------------------------------------------------
// Dashboard state
// ---------------------------------------------------------------------------

/// Point-in-time budget state for an organization, served to dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    /// The organization this state describes.
    pub org_id: OrgId,
    /// Spend recorded so far today.
    pub daily_cost: Decimal,
    /// The daily cap currently in force.
    pub max_daily_cost: Decimal,
    /// Budget remaining for today (never negative).
    pub remaining_budget: Decimal,
    /// `daily_cost / max_daily_cost * 100`.
    pub usage_percent: Decimal,
    /// Coarse utilization band.
    pub band: BudgetBand,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_boundaries_are_exact() {
        assert_eq!(
            BudgetBand::from_usage_percent(Decimal::new(799, 1)), // 79.9
            BudgetBand::Normal
        );
        assert_eq!(
            BudgetBand::from_usage_percent(Decimal::new(800, 1)), // 80.0
            BudgetBand::High
        );
        assert_eq!(
            BudgetBand::from_usage_percent(Decimal::new(950, 1)), // 95.0
            BudgetBand::Critical
        );
        assert_eq!(
            BudgetBand::from_usage_percent(Decimal::new(1000, 1)), // 100.0
            BudgetBand::Critical
        );
        assert_eq!(
            BudgetBand::from_usage_percent(Decimal::new(1001, 1)), // 100.1
            BudgetBand::Exceeded
        );
    }

    #[test]
    fn fail_open_admits_with_degradation() {
        let decision = BudgetDecision::fail_open("store unreachable".to_owned());
        assert!(decision.allowed);
        assert!(decision.force_cheapest);
        assert!(decision.reason.is_some());
    }

    #[test]
    fn deny_is_not_degraded() {
        let decision = BudgetDecision::deny(
            "daily budget exhausted".to_owned(),
            Decimal::new(1100, 2),
            Decimal::ZERO,
            Decimal::new(1000, 2),
            Decimal::new(110, 0),
        );
        assert!(!decision.allowed);
        assert!(!decision.force_cheapest);
        assert_eq!(decision.band(), BudgetBand::Exceeded);
    }
}
