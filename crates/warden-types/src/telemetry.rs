//! Live EWMA telemetry state for one (provider, model) pair.
//!
//! The EWMA recurrence is a running blend of each new sample with the
//! prior estimate:
//!
//! ```text
//! ewma' = alpha * sample + (1 - alpha) * ewma
//! ```
//!
//! Higher alpha tracks new data more reactively; lower alpha smooths
//! harder. The state is process-lifetime only -- it is created on the
//! first observed call for a pair and reset by process restart, never
//! persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// System default smoothing factor for newly observed pairs.
pub const DEFAULT_ALPHA: f64 = 0.3;

/// Live smoothed telemetry for a single (provider, model) pair.
///
/// `window_requests` counts samples since the last adaptation run
/// consumed the window; `total_requests` counts samples for the process
/// lifetime and exists for operator visibility only. All adaptation
/// thresholds read the window counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryState {
    /// Exponentially weighted moving average of call latency (ms).
    pub ewma_latency_ms: f64,
    /// Exponentially weighted moving average of the failure indicator
    /// (1.0 for a failed call, 0.0 for a success).
    pub ewma_error_rate: f64,
    /// Current smoothing factor. Changed only by the adaptation loop.
    pub alpha: f64,
    /// Samples recorded in the current adaptation window.
    pub window_requests: u64,
    /// Samples recorded over the process lifetime.
    pub total_requests: u64,
    /// When the most recent sample was recorded.
    pub last_sample_at: DateTime<Utc>,
}

impl TelemetryState {
    /// Seed state from the very first observed sample.
    ///
    /// The first observation sets both EWMAs directly -- no smoothing is
    /// applied against a nonexistent prior.
    pub fn seed(latency_ms: u64, success: bool, alpha: f64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let latency = latency_ms as f64;
        Self {
            ewma_latency_ms: latency,
            ewma_error_rate: if success { 0.0 } else { 1.0 },
            alpha,
            window_requests: 1,
            total_requests: 1,
            last_sample_at: Utc::now(),
        }
    }

    /// Fold one completed call into the EWMAs at the current alpha.
    pub fn observe(&mut self, latency_ms: u64, success: bool) {
        #[allow(clippy::cast_precision_loss)]
        let latency = latency_ms as f64;
        let failure = if success { 0.0 } else { 1.0 };

        self.ewma_latency_ms = self
            .alpha
            .mul_add(latency, (1.0 - self.alpha) * self.ewma_latency_ms);
        self.ewma_error_rate = self
            .alpha
            .mul_add(failure, (1.0 - self.alpha) * self.ewma_error_rate);
        self.window_requests = self.window_requests.saturating_add(1);
        self.total_requests = self.total_requests.saturating_add(1);
        self.last_sample_at = Utc::now();
    }

    /// Replace the smoothing factor, clamped into the given bounds.
    ///
    /// Returns the alpha actually stored.
    pub fn set_alpha(&mut self, alpha: f64, bounds: &crate::policy::SmoothingBounds) -> f64 {
        self.alpha = bounds.clamp(alpha);
        self.alpha
    }

    /// Begin a new adaptation window, zeroing the window sample counter.
    ///
    /// The EWMAs and total counter are untouched; only the window resets.
    pub const fn begin_window(&mut self) {
        self.window_requests = 0;
    }
}
