//! The nightly policy adaptation loop.
//!
//! Each run consumes the telemetry accumulated since the previous run
//! (the "window"), tunes EWMA smoothing factors, disables providers
//! whose live error rate crossed the disable threshold, and re-enables
//! disabled providers that have recovered below the (lower) recovery
//! threshold. The gap between the two thresholds is deliberate
//! hysteresis: a provider disabled at 0.5 does not flap back at 0.45.
//!
//! Failure semantics are the inverse of the admission path: adaptation
//! fails **closed**. A policy that cannot be loaded leaves the existing
//! policy in force and the run errors; a policy or audit write that
//! fails is logged and the run still returns its result. Nothing here
//! ever loosens a policy because a store was unreachable.
//!
//! Windows are consumed exactly once: every run ends by resetting the
//! window counter for each snapshotted pair, so an immediate re-run with
//! no new samples observes empty windows and changes nothing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use warden_store::{AdaptationAudit, PolicyStore, UsageLedger};
use warden_telemetry::TelemetryTracker;
use warden_types::{
    AdaptationResult, AlphaAdjustment, HealthLevel, OrgId, PairKey, Policy, ProviderDisablement,
    ProviderEnablement, SmoothingBounds, TelemetryState,
};

use crate::config::{AdaptationConfig, ConfigError};
use crate::error::EngineError;
use crate::health::{HealthAggregator, DEFAULT_DEVIATION_THRESHOLD};

type Snapshot = BTreeMap<PairKey, TelemetryState>;

/// Runs policy adaptation for one or many organizations.
pub struct AdaptationLoop<L, P, A> {
    policies: Arc<P>,
    audit: Arc<A>,
    tracker: Arc<TelemetryTracker>,
    aggregator: Arc<HealthAggregator<L>>,
    config: AdaptationConfig,
    bounds: SmoothingBounds,
    op_timeout: Duration,
}

impl<L, P, A> AdaptationLoop<L, P, A>
where
    L: UsageLedger,
    P: PolicyStore,
    A: AdaptationAudit,
{
    /// Create an adaptation loop.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the hysteresis invariant
    /// (`recovery_threshold < error_threshold`) or the alpha bounds
    /// (`min_alpha <= max_alpha`) are violated.
    pub fn new(
        policies: Arc<P>,
        audit: Arc<A>,
        tracker: Arc<TelemetryTracker>,
        aggregator: Arc<HealthAggregator<L>>,
        config: AdaptationConfig,
        bounds: SmoothingBounds,
        op_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if config.recovery_threshold >= config.error_threshold {
            return Err(ConfigError::Invalid(format!(
                "recovery threshold {} must be below the error threshold {}",
                config.recovery_threshold, config.error_threshold
            )));
        }
        if bounds.min_alpha > bounds.max_alpha {
            return Err(ConfigError::Invalid(format!(
                "min alpha {} must not exceed max alpha {}",
                bounds.min_alpha, bounds.max_alpha
            )));
        }
        Ok(Self {
            policies,
            audit,
            tracker,
            aggregator,
            config,
            bounds,
            op_timeout,
        })
    }

    /// Run one adaptation pass for a single organization.
    ///
    /// Consumes the current telemetry window: after the run returns, the
    /// window counters are zeroed and an immediate re-run is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] or [`EngineError::Timeout`] when
    /// the organization's policy cannot be loaded. Write failures do not
    /// error the run.
    pub async fn run(&self, org_id: OrgId) -> Result<AdaptationResult, EngineError> {
        let snapshot = self.tracker.all_states();
        let result = self.run_with_snapshot(org_id, &snapshot).await?;
        self.reset_windows(&snapshot);
        Ok(result)
    }

    /// Run adaptation for many organizations against one shared
    /// telemetry snapshot.
    ///
    /// Organizations are processed sequentially. A per-org failure is
    /// logged and skipped; `cancel` is checked between organizations for
    /// cooperative shutdown. Windows are consumed once, at the end, so
    /// every organization sees the same window data. A run cancelled
    /// before any organization was processed leaves the windows intact
    /// for the next run.
    pub async fn run_all(&self, org_ids: &[OrgId], cancel: &AtomicBool) -> Vec<AdaptationResult> {
        let snapshot = self.tracker.all_states();
        let mut results = Vec::with_capacity(org_ids.len());
        let mut consumed = false;

        for org_id in org_ids {
            if cancel.load(Ordering::Relaxed) {
                tracing::info!(completed = results.len(), "Adaptation run cancelled");
                break;
            }
            consumed = true;
            match self.run_with_snapshot(*org_id, &snapshot).await {
                Ok(result) => results.push(result),
                Err(err) => {
                    tracing::error!(org_id = %org_id, error = %err, "Adaptation failed for organization; skipping");
                }
            }
        }

        if consumed {
            self.reset_windows(&snapshot);
        }
        results
    }

    async fn run_with_snapshot(
        &self,
        org_id: OrgId,
        snapshot: &Snapshot,
    ) -> Result<AdaptationResult, EngineError> {
        let mut result = AdaptationResult::begin(org_id);

        // Fail closed: without the policy there is nothing safe to adapt.
        let mut policy = tokio::time::timeout(self.op_timeout, self.policies.load(org_id))
            .await
            .map_err(|_| EngineError::Timeout {
                operation: "policy load",
            })??
            .unwrap_or_else(|| Policy::with_defaults(org_id));

        self.tune_alphas(snapshot, &mut result);
        self.disable_unhealthy(snapshot, &mut policy, &mut result);
        self.enable_recovered(snapshot, &mut policy, &mut result);
        let disabled_now = result.disablements.clone();
        self.recommend(&disabled_now, &mut result).await;

        let policy_changed = !result.disablements.is_empty() || !result.enablements.is_empty();
        if policy_changed {
            let save = tokio::time::timeout(self.op_timeout, self.policies.save(&policy)).await;
            match save {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(org_id = %org_id, error = %err, "Policy save failed; adapted policy not persisted");
                }
                Err(_) => {
                    tracing::error!(org_id = %org_id, "Policy save timed out; adapted policy not persisted");
                }
            }
        }

        let result = result.finalize();
        match tokio::time::timeout(self.op_timeout, self.audit.record(&result)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(org_id = %org_id, error = %err, "Adaptation audit write failed");
            }
            Err(_) => {
                tracing::error!(org_id = %org_id, "Adaptation audit write timed out");
            }
        }

        tracing::info!(
            org_id = %org_id,
            alpha_adjustments = result.alpha_adjustments.len(),
            disablements = result.disablements.len(),
            enablements = result.enablements.len(),
            "Adaptation run complete"
        );
        Ok(result)
    }

    /// Step each pair's smoothing factor toward its error variance target.
    ///
    /// Live EWMA error rate is the variance proxy: above target means
    /// the pair is noisy and alpha steps up (more reactive); below half
    /// the target means it is stable and alpha steps down (smoother).
    fn tune_alphas(&self, snapshot: &Snapshot, result: &mut AdaptationResult) {
        for (pair, state) in snapshot {
            if state.window_requests < self.config.min_samples_for_tuning {
                continue;
            }
            let proxy = state.ewma_error_rate;
            let target = self.config.target_variance;
            let (candidate, reason) = if proxy > target {
                (
                    state.alpha + self.bounds.step,
                    "error variance above target; tracking more reactively",
                )
            } else if proxy < target / 2.0 {
                (
                    state.alpha - self.bounds.step,
                    "error variance well below target; smoothing harder",
                )
            } else {
                continue;
            };

            let clamped = self.bounds.clamp(candidate);
            // Compare against the tracker's current alpha, not the
            // snapshot's: a shared snapshot replayed across many
            // organizations must apply each step exactly once.
            let Some(current) = self
                .tracker
                .state(&pair.provider, &pair.model)
                .map(|s| s.alpha)
            else {
                continue; // pair vanished between snapshot and apply
            };
            if (clamped - current).abs() < f64::EPSILON {
                continue; // already applied, or pinned at a bound
            }
            let Some(new_alpha) = self.tracker.set_alpha(&pair.provider, &pair.model, clamped)
            else {
                continue;
            };
            result.alpha_adjustments.push(AlphaAdjustment {
                provider: pair.provider.clone(),
                model: pair.model.clone(),
                old_alpha: current,
                new_alpha,
                reason: reason.to_owned(),
            });
        }
    }

    /// Disable providers whose live error rate crossed the threshold
    /// with enough window samples behind the measurement.
    fn disable_unhealthy(
        &self,
        snapshot: &Snapshot,
        policy: &mut Policy,
        result: &mut AdaptationResult,
    ) {
        for (pair, state) in snapshot {
            if state.window_requests < self.config.min_requests_before_disable {
                continue;
            }
            if state.ewma_error_rate < self.config.error_threshold {
                continue;
            }
            if !policy.is_provider_allowed(&pair.provider) {
                continue;
            }
            if policy.disable_provider(&pair.provider) {
                tracing::warn!(
                    org_id = %policy.org_id,
                    provider = %pair.provider,
                    error_rate = state.ewma_error_rate,
                    samples = state.window_requests,
                    "Disabling provider"
                );
                result.disablements.push(ProviderDisablement {
                    provider: pair.provider.clone(),
                    error_rate: state.ewma_error_rate,
                    samples: state.window_requests,
                    reason: format!(
                        "error rate {:.2} at or above the disable threshold {}",
                        state.ewma_error_rate, self.config.error_threshold
                    ),
                });
            }
        }
    }

    /// Re-enable disabled providers whose sample-weighted mean error
    /// rate across all their models has fallen to the recovery
    /// threshold or below.
    fn enable_recovered(
        &self,
        snapshot: &Snapshot,
        policy: &mut Policy,
        result: &mut AdaptationResult,
    ) {
        let disabled: Vec<String> = policy.disabled_providers.iter().cloned().collect();
        for provider in disabled {
            let mut samples: u64 = 0;
            let mut weighted_error = 0.0_f64;
            for (pair, state) in snapshot {
                if pair.provider == provider {
                    samples = samples.saturating_add(state.window_requests);
                    #[allow(clippy::cast_precision_loss)]
                    {
                        weighted_error += state.ewma_error_rate * state.window_requests as f64;
                    }
                }
            }
            if samples < self.config.min_requests_before_enable {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let mean_error = weighted_error / samples as f64;
            if mean_error > self.config.recovery_threshold {
                continue;
            }
            if policy.enable_provider(&provider) {
                tracing::info!(
                    org_id = %policy.org_id,
                    provider = %provider,
                    error_rate = mean_error,
                    samples,
                    "Re-enabling recovered provider"
                );
                result.enablements.push(ProviderEnablement {
                    provider,
                    error_rate: mean_error,
                    samples,
                    reason: format!(
                        "mean error rate {mean_error:.2} at or below the recovery threshold {}",
                        self.config.recovery_threshold
                    ),
                });
            }
        }
    }

    /// Attach operator recommendations for pairs the health aggregator
    /// flags, excluding providers this run already disabled.
    ///
    /// Only pairs with window activity produce recommendations, so a
    /// re-run over empty windows stays a clean no-op.
    async fn recommend(&self, disablements: &[ProviderDisablement], result: &mut AdaptationResult) {
        let statuses = self
            .aggregator
            .classify_health(DEFAULT_DEVIATION_THRESHOLD)
            .await;
        for status in statuses {
            if status.level == HealthLevel::Healthy || status.live.window_requests == 0 {
                continue;
            }
            if disablements
                .iter()
                .any(|d| d.provider == status.pair.provider)
            {
                continue;
            }
            if let Some(reason) = status.reasons.first() {
                result
                    .recommendations
                    .push(format!("investigate {}: {reason}", status.pair));
            }
        }
    }

    /// Zero the window counter for every snapshotted pair.
    fn reset_windows(&self, snapshot: &Snapshot) {
        for pair in snapshot.keys() {
            self.tracker.begin_window(&pair.provider, &pair.model);
        }
    }
}
