//! Health aggregation: ledger aggregates, trailing baselines, and
//! classification of live telemetry against history.
//!
//! Aggregates are recomputed from the ledger on demand; nothing here is
//! cached or persisted. Classification compares the tracker's live EWMA
//! state against a trailing baseline and flags upward deviations only --
//! a pair running faster or cleaner than its baseline is not a fault.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use warden_store::UsageLedger;
use warden_telemetry::TelemetryTracker;
use warden_types::{
    AggregatedMetrics, BaselineMetrics, HealthLevel, HealthStatus, OrgId, PairKey, TelemetryState,
    UsageRecord,
};

use crate::error::EngineError;

/// Minimum ledger samples before a baseline is considered meaningful.
pub const MIN_BASELINE_SAMPLES: u64 = 5;

/// Default trailing window for baseline computation, in days.
pub const DEFAULT_BASELINE_DAYS: u32 = 7;

/// Default relative deviation from baseline that triggers a warning.
pub const DEFAULT_DEVIATION_THRESHOLD: f64 = 0.2;

/// Live error rate above which a pair is critical regardless of baseline.
const CRITICAL_ERROR_RATE: f64 = 0.5;

/// Live error rate above which a pair is at least a warning.
const WARNING_ERROR_RATE: f64 = 0.3;

/// Computes usage aggregates and classifies (provider, model) health.
pub struct HealthAggregator<L> {
    ledger: Arc<L>,
    tracker: Arc<TelemetryTracker>,
    op_timeout: Duration,
}

impl<L: UsageLedger> HealthAggregator<L> {
    /// Create an aggregator over the given ledger and live tracker.
    pub const fn new(ledger: Arc<L>, tracker: Arc<TelemetryTracker>, op_timeout: Duration) -> Self {
        Self {
            ledger,
            tracker,
            op_timeout,
        }
    }

    /// Aggregate ledger records per (provider, model) over a date range.
    ///
    /// `org_id` scopes the aggregation to one organization; `None`
    /// aggregates across all of them.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] or [`EngineError::Timeout`] when
    /// the ledger read fails.
    pub async fn aggregate(
        &self,
        org_id: Option<OrgId>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BTreeMap<PairKey, AggregatedMetrics>, EngineError> {
        let records = self.fetch(org_id, from, to).await?;
        Ok(aggregate_records(&records))
    }

    /// Trailing-window baseline for one (provider, model) pair.
    ///
    /// Returns `Ok(None)` when fewer than [`MIN_BASELINE_SAMPLES`]
    /// ledger records exist in the window -- too little history to
    /// compare against.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] or [`EngineError::Timeout`] when
    /// the ledger read fails.
    pub async fn baseline(
        &self,
        provider: &str,
        model: &str,
        window_days: u32,
    ) -> Result<Option<BaselineMetrics>, EngineError> {
        let to = Utc::now();
        let window = chrono::Duration::try_days(i64::from(window_days))
            .unwrap_or_else(chrono::Duration::zero);
        let from = to.checked_sub_signed(window).unwrap_or(to);

        let records = self.fetch(None, from, to).await?;
        let key = PairKey::new(provider, model);
        let aggregates = aggregate_records(&records);
        let Some(metrics) = aggregates.get(&key) else {
            return Ok(None);
        };
        if metrics.requests < MIN_BASELINE_SAMPLES {
            return Ok(None);
        }

        Ok(Some(BaselineMetrics {
            avg_latency_ms: metrics.avg_latency_ms,
            error_rate: metrics.error_rate,
            samples: metrics.requests,
            window_days,
        }))
    }

    /// Classify every pair with live telemetry against its baseline.
    ///
    /// A baseline that cannot be read (store failure) is treated as
    /// absent with a warning log: classification degrades to
    /// live-only thresholds rather than erroring the status page.
    /// Results sort critical-first, ties broken by pair key.
    pub async fn classify_health(&self, deviation_threshold: f64) -> Vec<HealthStatus> {
        let snapshot = self.tracker.all_states();
        let mut statuses = Vec::with_capacity(snapshot.len());

        for (pair, live) in snapshot {
            let baseline = match self
                .baseline(&pair.provider, &pair.model, DEFAULT_BASELINE_DAYS)
                .await
            {
                Ok(baseline) => baseline,
                Err(err) => {
                    tracing::warn!(pair = %pair, error = %err, "Baseline read failed; classifying on live telemetry only");
                    None
                }
            };
            statuses.push(classify_pair(pair, live, baseline, deviation_threshold));
        }

        statuses.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.pair.cmp(&b.pair)));
        statuses
    }

    async fn fetch(
        &self,
        org_id: Option<OrgId>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, EngineError> {
        let records = match org_id {
            Some(org) => {
                tokio::time::timeout(self.op_timeout, self.ledger.query(org, from, to))
                    .await
                    .map_err(|_| EngineError::Timeout {
                        operation: "usage query",
                    })??
            }
            None => tokio::time::timeout(self.op_timeout, self.ledger.query_all(from, to))
                .await
                .map_err(|_| EngineError::Timeout {
                    operation: "usage query",
                })??,
        };
        Ok(records)
    }
}

/// Fold ledger records into per-pair aggregates.
fn aggregate_records(records: &[UsageRecord]) -> BTreeMap<PairKey, AggregatedMetrics> {
    struct Accumulator {
        requests: u64,
        failures: u64,
        latency_sum_ms: f64,
        total_cost: Decimal,
    }

    let mut buckets: BTreeMap<PairKey, Accumulator> = BTreeMap::new();
    for record in records {
        let key = PairKey::new(&record.provider, &record.model);
        let entry = buckets.entry(key).or_insert(Accumulator {
            requests: 0,
            failures: 0,
            latency_sum_ms: 0.0,
            total_cost: Decimal::ZERO,
        });
        entry.requests = entry.requests.saturating_add(1);
        if !record.success {
            entry.failures = entry.failures.saturating_add(1);
        }
        #[allow(clippy::cast_precision_loss)]
        {
            entry.latency_sum_ms += record.latency_ms as f64;
        }
        entry.total_cost = entry
            .total_cost
            .checked_add(record.estimated_cost)
            .unwrap_or(entry.total_cost);
    }

    buckets
        .into_iter()
        .map(|(key, acc)| {
            #[allow(clippy::cast_precision_loss)]
            let requests_f = acc.requests as f64;
            #[allow(clippy::cast_precision_loss)]
            let failures_f = acc.failures as f64;
            let (avg_latency_ms, error_rate) = if acc.requests == 0 {
                (0.0, 0.0)
            } else {
                (acc.latency_sum_ms / requests_f, failures_f / requests_f)
            };
            let avg_cost = acc
                .total_cost
                .checked_div(Decimal::from(acc.requests))
                .unwrap_or(Decimal::ZERO);
            let metrics = AggregatedMetrics {
                requests: acc.requests,
                failures: acc.failures,
                avg_latency_ms,
                error_rate,
                success_rate: 1.0 - error_rate,
                avg_cost,
                total_cost: acc.total_cost,
            };
            (key, metrics)
        })
        .collect()
}

/// Classify one pair from its live telemetry and optional baseline.
///
/// Deviations are relative and upward-only: `(live - baseline) /
/// baseline`, floored at zero. A zero baseline yields zero deviation;
/// the absolute live-error-rate thresholds cover that case.
fn classify_pair(
    pair: PairKey,
    live: TelemetryState,
    baseline: Option<BaselineMetrics>,
    deviation_threshold: f64,
) -> HealthStatus {
    let mut reasons = Vec::new();

    let (latency_deviation, error_deviation) = baseline.as_ref().map_or((0.0, 0.0), |base| {
        (
            upward_deviation(live.ewma_latency_ms, base.avg_latency_ms),
            upward_deviation(live.ewma_error_rate, base.error_rate),
        )
    });

    let level = if live.ewma_error_rate > CRITICAL_ERROR_RATE {
        reasons.push(format!(
            "error rate {:.2} exceeds the critical threshold {CRITICAL_ERROR_RATE}",
            live.ewma_error_rate
        ));
        HealthLevel::Critical
    } else if latency_deviation > 2.0 * deviation_threshold {
        reasons.push(format!(
            "latency {:.0}ms deviates {:.0}% above baseline",
            live.ewma_latency_ms,
            latency_deviation * 100.0
        ));
        HealthLevel::Critical
    } else if live.ewma_error_rate > WARNING_ERROR_RATE {
        reasons.push(format!(
            "error rate {:.2} exceeds the warning threshold {WARNING_ERROR_RATE}",
            live.ewma_error_rate
        ));
        HealthLevel::Warning
    } else if error_deviation > deviation_threshold {
        reasons.push(format!(
            "error rate deviates {:.0}% above baseline",
            error_deviation * 100.0
        ));
        HealthLevel::Warning
    } else if latency_deviation > deviation_threshold {
        reasons.push(format!(
            "latency deviates {:.0}% above baseline",
            latency_deviation * 100.0
        ));
        HealthLevel::Warning
    } else {
        HealthLevel::Healthy
    };

    if baseline.is_none() {
        reasons.push("insufficient history for baseline comparison".to_owned());
    }

    HealthStatus {
        pair,
        level,
        live,
        baseline,
        reasons,
        classified_at: Utc::now(),
    }
}

/// Relative upward deviation of `live` above `baseline`, floored at 0.
fn upward_deviation(live: f64, baseline: f64) -> f64 {
    if baseline <= f64::EPSILON {
        return 0.0;
    }
    ((live - baseline) / baseline).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::telemetry::DEFAULT_ALPHA;

    fn live(error_rate: f64, latency_ms: f64) -> TelemetryState {
        TelemetryState {
            ewma_latency_ms: latency_ms,
            ewma_error_rate: error_rate,
            alpha: DEFAULT_ALPHA,
            window_requests: 20,
            total_requests: 20,
            last_sample_at: Utc::now(),
        }
    }

    fn base(error_rate: f64, latency_ms: f64) -> BaselineMetrics {
        BaselineMetrics {
            avg_latency_ms: latency_ms,
            error_rate,
            samples: 50,
            window_days: DEFAULT_BASELINE_DAYS,
        }
    }

    #[test]
    fn high_error_rate_is_critical() {
        let status = classify_pair(
            PairKey::new("acme", "acme-large"),
            live(0.6, 100.0),
            Some(base(0.05, 100.0)),
            0.2,
        );
        assert_eq!(status.level, HealthLevel::Critical);
    }

    #[test]
    fn severe_latency_regression_is_critical() {
        // 150ms against a 100ms baseline = 50% deviation > 2 * 0.2.
        let status = classify_pair(
            PairKey::new("acme", "acme-large"),
            live(0.0, 150.0),
            Some(base(0.0, 100.0)),
            0.2,
        );
        assert_eq!(status.level, HealthLevel::Critical);
    }

    #[test]
    fn moderate_latency_regression_is_warning() {
        // 130ms against 100ms = 30% deviation, between threshold and 2x.
        let status = classify_pair(
            PairKey::new("acme", "acme-large"),
            live(0.0, 130.0),
            Some(base(0.0, 100.0)),
            0.2,
        );
        assert_eq!(status.level, HealthLevel::Warning);
    }

    #[test]
    fn improvement_over_baseline_is_healthy() {
        // Faster and cleaner than baseline must not flag.
        let status = classify_pair(
            PairKey::new("acme", "acme-large"),
            live(0.01, 50.0),
            Some(base(0.2, 200.0)),
            0.2,
        );
        assert_eq!(status.level, HealthLevel::Healthy);
        assert!(status.reasons.is_empty());
    }

    #[test]
    fn missing_baseline_is_healthy_with_recommendation() {
        let status = classify_pair(PairKey::new("acme", "acme-large"), live(0.1, 100.0), None, 0.2);
        assert_eq!(status.level, HealthLevel::Healthy);
        assert!(status
            .reasons
            .iter()
            .any(|r| r.contains("insufficient history")));
    }

    #[test]
    fn missing_baseline_never_masks_live_errors() {
        let status = classify_pair(PairKey::new("acme", "acme-large"), live(0.7, 100.0), None, 0.2);
        assert_eq!(status.level, HealthLevel::Critical);
    }
}
