//! Pre-flight budget admission control.
//!
//! [`BudgetGate::can_afford`] is consulted before every outbound LLM
//! request. It loads the organization's policy, reads today's spend from
//! the ledger, and returns a [`BudgetDecision`] -- allow, allow with
//! graceful degradation (force the cheapest model), or deny.
//!
//! Failure semantics: any internal failure (store unreachable, timeout)
//! fails **open** -- the request is admitted with `force_cheapest`
//! rather than blocking the organization, trading strict cost
//! enforcement for availability.
//!
//! Known, accepted race: spend is *not* reserved atomically. The check
//! reads a point-in-time sum, and the actual cost lands in the ledger
//! only after the external call completes. Concurrent bursts can
//! therefore overshoot the daily cap transiently. This is a deliberate
//! design decision favoring low-latency admission over strict atomic
//! reservation -- do not "fix" it by adding a reservation scheme here.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;

use warden_store::{PolicyStore, UsageLedger};
use warden_types::budget::{CRITICAL_USAGE_PERCENT, EXCEEDED_USAGE_PERCENT, HIGH_USAGE_PERCENT};
use warden_types::{BudgetBand, BudgetDecision, BudgetState, OrgId, Policy};

use crate::config::BudgetConfig;
use crate::error::EngineError;

/// One hundred, for percentage conversion.
const ONE_HUNDRED: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

/// The budget admission controller.
///
/// Cheap to clone pieces are shared via [`Arc`] so the gate, the health
/// aggregator, and the adaptation loop can sit over the same stores.
pub struct BudgetGate<L, P> {
    ledger: Arc<L>,
    policies: Arc<P>,
    defaults: BudgetConfig,
    op_timeout: Duration,
}

impl<L: UsageLedger, P: PolicyStore> BudgetGate<L, P> {
    /// Create a gate over the given stores.
    pub const fn new(
        ledger: Arc<L>,
        policies: Arc<P>,
        defaults: BudgetConfig,
        op_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            policies,
            defaults,
            op_timeout,
        }
    }

    /// Decide whether a request with the given estimated cost may
    /// proceed for the organization.
    ///
    /// Rules are evaluated in order; the first decisive rule wins:
    ///
    /// 1. Per-request cap: `estimated_cost > max_request_cost` denies
    ///    outright, before any ledger read.
    /// 2. Daily cap: a request that would push spend past the daily cap
    ///    is denied only when usage was already at or past 100%;
    ///    otherwise it is admitted with `force_cheapest` (graceful
    ///    degradation).
    /// 3. Utilization bands: at or above 95% ("critical") and 80%
    ///    ("high") the request is admitted with `force_cheapest`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInput`] for a negative estimated
    /// cost. Store failures never surface here -- they fail open.
    pub async fn can_afford(
        &self,
        org_id: OrgId,
        estimated_cost: Decimal,
    ) -> Result<BudgetDecision, EngineError> {
        if estimated_cost < Decimal::ZERO {
            return Err(EngineError::InvalidInput(format!(
                "estimated cost must not be negative, got {estimated_cost}"
            )));
        }

        let policy = match self.load_policy_or_defaults(org_id).await {
            Ok(policy) => policy,
            Err(err) => {
                tracing::warn!(org_id = %org_id, error = %err, "Policy load failed; admitting with degradation");
                return Ok(BudgetDecision::fail_open(
                    "policy store unreachable; admitted with cheapest model".to_owned(),
                ));
            }
        };

        // Rule 1: per-request cap. Terminal, before any ledger read.
        if estimated_cost > policy.max_request_cost {
            let cap = policy.max_request_cost;
            return Ok(BudgetDecision::deny(
                format!("per-request cap exceeded: estimated cost {estimated_cost} is above the {cap} limit"),
                Decimal::ZERO,
                policy.max_daily_cost,
                policy.max_daily_cost,
                Decimal::ZERO,
            ));
        }

        let daily_spend = match self.sum_today(org_id).await {
            Ok(total) => total,
            Err(err) => {
                tracing::warn!(org_id = %org_id, error = %err, "Spend lookup failed; admitting with degradation");
                return Ok(BudgetDecision::fail_open(
                    "usage ledger unreachable; admitted with cheapest model".to_owned(),
                ));
            }
        };

        let usage_percent = usage_percent(daily_spend, policy.max_daily_cost);
        let remaining = policy
            .max_daily_cost
            .checked_sub(daily_spend)
            .unwrap_or(Decimal::ZERO)
            .max(Decimal::ZERO);
        let projected = daily_spend.checked_add(estimated_cost).unwrap_or(daily_spend);

        // Rule 2: daily cap.
        if projected > policy.max_daily_cost {
            if usage_percent >= EXCEEDED_USAGE_PERCENT {
                return Ok(BudgetDecision::deny(
                    format!("daily budget exhausted: {daily_spend} spent of {}", policy.max_daily_cost),
                    daily_spend,
                    remaining,
                    policy.max_daily_cost,
                    usage_percent,
                ));
            }
            return Ok(BudgetDecision::allow_degraded(
                "near budget limit: request would exceed the daily cap".to_owned(),
                daily_spend,
                remaining,
                policy.max_daily_cost,
                usage_percent,
            ));
        }

        // Rule 3: utilization bands.
        if usage_percent >= CRITICAL_USAGE_PERCENT {
            tracing::warn!(
                org_id = %org_id,
                usage_percent = %usage_percent,
                "Organization in critical budget band"
            );
            return Ok(BudgetDecision::allow_degraded(
                format!("budget usage critical at {usage_percent}%"),
                daily_spend,
                remaining,
                policy.max_daily_cost,
                usage_percent,
            ));
        }
        if usage_percent >= HIGH_USAGE_PERCENT {
            return Ok(BudgetDecision::allow_degraded(
                format!("budget usage high at {usage_percent}%"),
                daily_spend,
                remaining,
                policy.max_daily_cost,
                usage_percent,
            ));
        }

        Ok(BudgetDecision::allow(
            daily_spend,
            remaining,
            policy.max_daily_cost,
            usage_percent,
        ))
    }

    /// Point-in-time budget state for dashboards.
    ///
    /// Fails open to a zeroed "normal" state with a warning log when a
    /// store is unreachable: a dashboard read must never error a page.
    pub async fn budget_state(&self, org_id: OrgId) -> BudgetState {
        let policy = match self.load_policy_or_defaults(org_id).await {
            Ok(policy) => policy,
            Err(err) => {
                tracing::warn!(org_id = %org_id, error = %err, "Policy load failed for budget state");
                return zeroed_state(org_id);
            }
        };
        let daily_cost = match self.sum_today(org_id).await {
            Ok(total) => total,
            Err(err) => {
                tracing::warn!(org_id = %org_id, error = %err, "Spend lookup failed for budget state");
                return zeroed_state(org_id);
            }
        };

        let usage = usage_percent(daily_cost, policy.max_daily_cost);
        BudgetState {
            org_id,
            daily_cost,
            max_daily_cost: policy.max_daily_cost,
            remaining_budget: policy
                .max_daily_cost
                .checked_sub(daily_cost)
                .unwrap_or(Decimal::ZERO)
                .max(Decimal::ZERO),
            usage_percent: usage,
            band: BudgetBand::from_usage_percent(usage),
        }
    }

    /// Load the organization's policy, substituting system defaults when
    /// none exists. A missing policy is normal, not a failure.
    async fn load_policy_or_defaults(&self, org_id: OrgId) -> Result<Policy, EngineError> {
        let loaded = tokio::time::timeout(self.op_timeout, self.policies.load(org_id))
            .await
            .map_err(|_| EngineError::Timeout {
                operation: "policy load",
            })??;

        Ok(loaded.unwrap_or_else(|| {
            let mut policy = Policy::with_defaults(org_id);
            policy.max_request_cost = self.defaults.default_max_request_cost;
            policy.max_daily_cost = self.defaults.default_max_daily_cost;
            policy
        }))
    }

    /// Today's spend for the organization, timeout-bounded.
    async fn sum_today(&self, org_id: OrgId) -> Result<Decimal, EngineError> {
        let today = Utc::now().date_naive();
        let total = tokio::time::timeout(self.op_timeout, self.ledger.sum_cost(org_id, today))
            .await
            .map_err(|_| EngineError::Timeout {
                operation: "daily spend sum",
            })??;
        Ok(total)
    }
}

/// `spend / cap * 100`, exact in [`Decimal`].
///
/// A non-positive cap reads as fully exhausted so a zero-cap policy
/// denies rather than divides by zero.
fn usage_percent(daily_spend: Decimal, max_daily_cost: Decimal) -> Decimal {
    if max_daily_cost <= Decimal::ZERO {
        return EXCEEDED_USAGE_PERCENT
            .checked_add(ONE_HUNDRED)
            .unwrap_or(EXCEEDED_USAGE_PERCENT);
    }
    daily_spend
        .checked_div(max_daily_cost)
        .and_then(|ratio| ratio.checked_mul(ONE_HUNDRED))
        .unwrap_or(Decimal::ZERO)
}

/// The fallback dashboard state when stores are unreachable.
const fn zeroed_state(org_id: OrgId) -> BudgetState {
    BudgetState {
        org_id,
        daily_cost: Decimal::ZERO,
        max_daily_cost: Decimal::ZERO,
        remaining_budget: Decimal::ZERO,
        usage_percent: Decimal::ZERO,
        band: BudgetBand::Normal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_percent_is_exact() {
        // $8.50 of $10.00 = 85%
        let pct = usage_percent(Decimal::new(850, 2), Decimal::new(1000, 2));
        assert_eq!(pct, Decimal::new(85, 0));
    }

    #[test]
    fn zero_cap_reads_as_exhausted() {
        let pct = usage_percent(Decimal::new(1, 2), Decimal::ZERO);
        assert!(pct > EXCEEDED_USAGE_PERCENT);
    }
}
