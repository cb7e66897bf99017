//! The [`Governor`] facade: one object owning the budget gate, the
//! telemetry tracker, the health aggregator, and the adaptation loop.
//!
//! Callers integrate the engine through three touchpoints: consult
//! [`Governor::can_afford`] before each LLM call, report the completed
//! call through [`Governor::record_outcome`], and schedule
//! [`Governor::run_adaptation`] (or [`Governor::run_all`]) nightly.
//! Everything else is read-only dashboard surface.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use warden_store::{AdaptationAudit, PolicyStore, UsageLedger};
use warden_telemetry::TelemetryTracker;
use warden_types::{
    AdaptationResult, AggregatedMetrics, BudgetDecision, BudgetState, HealthStatus, OrgId, PairKey,
    TelemetryState, UsageRecord,
};

use crate::adaptation::AdaptationLoop;
use crate::budget::BudgetGate;
use crate::config::{ConfigError, GovernorConfig};
use crate::error::EngineError;
use crate::health::HealthAggregator;

/// The usage governance engine.
pub struct Governor<L, P, A> {
    ledger: Arc<L>,
    tracker: Arc<TelemetryTracker>,
    gate: BudgetGate<L, P>,
    aggregator: Arc<HealthAggregator<L>>,
    adaptation: AdaptationLoop<L, P, A>,
    op_timeout: Duration,
}

impl<L, P, A> Governor<L, P, A>
where
    L: UsageLedger,
    P: PolicyStore,
    A: AdaptationAudit,
{
    /// Assemble the engine from configuration and its three stores.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the configuration violates
    /// an engine invariant (hysteresis ordering, alpha bounds).
    pub fn new(
        config: &GovernorConfig,
        ledger: Arc<L>,
        policies: Arc<P>,
        audit: Arc<A>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let op_timeout = config.store.op_timeout();
        let bounds = config.telemetry.bounds();
        let tracker = Arc::new(TelemetryTracker::with_settings(
            config.telemetry.default_alpha,
            bounds,
        ));
        let aggregator = Arc::new(HealthAggregator::new(
            Arc::clone(&ledger),
            Arc::clone(&tracker),
            op_timeout,
        ));
        let gate = BudgetGate::new(
            Arc::clone(&ledger),
            Arc::clone(&policies),
            config.budget.clone(),
            op_timeout,
        );
        let adaptation = AdaptationLoop::new(
            policies,
            audit,
            Arc::clone(&tracker),
            Arc::clone(&aggregator),
            config.adaptation.clone(),
            bounds,
            op_timeout,
        )?;

        Ok(Self {
            ledger,
            tracker,
            gate,
            aggregator,
            adaptation,
            op_timeout,
        })
    }

    /// Pre-flight budget check for a request with the given estimated
    /// cost.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInput`] for a negative cost. Store
    /// failures fail open as allow-with-degradation decisions.
    pub async fn can_afford(
        &self,
        org_id: OrgId,
        estimated_cost: Decimal,
    ) -> Result<BudgetDecision, EngineError> {
        self.gate.can_afford(org_id, estimated_cost).await
    }

    /// Report a completed (or failed) LLM call.
    ///
    /// Telemetry updates first and always succeeds; the ledger append is
    /// best-effort on this path -- a failure is logged and dropped so
    /// the caller's request handling is never disturbed by the ledger.
    pub async fn record_outcome(&self, record: UsageRecord) {
        self.tracker.record_sample(
            &record.provider,
            &record.model,
            record.latency_ms,
            record.success,
        );

        match tokio::time::timeout(self.op_timeout, self.ledger.append(&record)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(
                    org_id = %record.org_id,
                    provider = %record.provider,
                    error = %err,
                    "Usage ledger append failed; record dropped"
                );
            }
            Err(_) => {
                tracing::error!(
                    org_id = %record.org_id,
                    provider = %record.provider,
                    "Usage ledger append timed out; record dropped"
                );
            }
        }
    }

    /// Point-in-time budget state for dashboards. Never errors.
    pub async fn budget_state(&self, org_id: OrgId) -> BudgetState {
        self.gate.budget_state(org_id).await
    }

    /// Health classification for every pair with live telemetry,
    /// sorted critical-first.
    pub async fn health_status(&self, deviation_threshold: f64) -> Vec<HealthStatus> {
        self.aggregator.classify_health(deviation_threshold).await
    }

    /// Per-(provider, model) usage aggregates for one organization over
    /// a date range.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] or [`EngineError::Timeout`] when
    /// the ledger read fails.
    pub async fn usage_summary(
        &self,
        org_id: OrgId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BTreeMap<PairKey, AggregatedMetrics>, EngineError> {
        self.aggregator.aggregate(Some(org_id), from, to).await
    }

    /// Run one adaptation pass for a single organization.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] or [`EngineError::Timeout`] when
    /// the organization's policy cannot be loaded.
    pub async fn run_adaptation(&self, org_id: OrgId) -> Result<AdaptationResult, EngineError> {
        self.adaptation.run(org_id).await
    }

    /// Run adaptation for many organizations with cooperative
    /// cancellation between them.
    pub async fn run_all(&self, org_ids: &[OrgId], cancel: &AtomicBool) -> Vec<AdaptationResult> {
        self.adaptation.run_all(org_ids, cancel).await
    }

    /// Live telemetry snapshot for one pair, if it has been observed.
    pub fn telemetry(&self, provider: &str, model: &str) -> Option<TelemetryState> {
        self.tracker.state(provider, model)
    }

    /// The shared telemetry tracker.
    pub const fn tracker(&self) -> &Arc<TelemetryTracker> {
        &self.tracker
    }
}
