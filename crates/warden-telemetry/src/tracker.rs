//! The keyed EWMA tracker.
//!
//! A single [`RwLock`] protects a [`BTreeMap`] keyed by
//! [`PairKey`]; each `record_sample` takes the write lock for one O(1)
//! map update, which makes the EWMA recurrence atomic per key under
//! concurrent invocation. Cross-key operations need no coordination.
//!
//! If the lock is poisoned we recover by skipping the update rather than
//! panicking -- telemetry must never take down the request path.

use std::collections::BTreeMap;
use std::sync::RwLock;

use warden_types::telemetry::DEFAULT_ALPHA;
use warden_types::{PairKey, SmoothingBounds, TelemetryState};

/// Thread-safe, keyed EWMA telemetry tracker.
#[derive(Debug)]
pub struct TelemetryTracker {
    /// Default smoothing factor for newly observed pairs.
    default_alpha: f64,
    /// Bounds applied whenever a pair's alpha is changed.
    bounds: SmoothingBounds,
    /// Per-pair state, keyed by (provider, model).
    states: RwLock<BTreeMap<PairKey, TelemetryState>>,
}

impl TelemetryTracker {
    /// Create a tracker with the system default alpha and bounds.
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_ALPHA, SmoothingBounds::default())
    }

    /// Create a tracker with an explicit starting alpha and bounds.
    pub fn with_settings(default_alpha: f64, bounds: SmoothingBounds) -> Self {
        Self {
            default_alpha: bounds.clamp(default_alpha),
            bounds,
            states: RwLock::new(BTreeMap::new()),
        }
    }

    /// The smoothing bounds this tracker clamps alphas into.
    pub const fn bounds(&self) -> &SmoothingBounds {
        &self.bounds
    }

    /// Record one completed call for a (provider, model) pair.
    ///
    /// The first sample for a pair seeds both EWMAs directly; every
    /// subsequent sample applies the EWMA recurrence at the pair's
    /// current alpha. A poisoned lock drops the sample with a warning.
    pub fn record_sample(&self, provider: &str, model: &str, latency_ms: u64, success: bool) {
        let Ok(mut states) = self.states.write() else {
            tracing::warn!(provider, model, "Telemetry lock poisoned; sample dropped");
            return;
        };

        let key = PairKey::new(provider, model);
        match states.get_mut(&key) {
            Some(state) => state.observe(latency_ms, success),
            None => {
                states.insert(key, TelemetryState::seed(latency_ms, success, self.default_alpha));
            }
        }
    }

    /// Snapshot of the state for one pair, if it has been observed.
    pub fn state(&self, provider: &str, model: &str) -> Option<TelemetryState> {
        let states = self.states.read().ok()?;
        states.get(&PairKey::new(provider, model)).cloned()
    }

    /// Snapshot of all pair states.
    ///
    /// Returns an empty map if the lock is poisoned.
    pub fn all_states(&self) -> BTreeMap<PairKey, TelemetryState> {
        self.states
            .read()
            .map(|states| states.clone())
            .unwrap_or_default()
    }

    /// Replace the smoothing factor for a pair, clamped to the bounds.
    ///
    /// Only the policy adaptation loop calls this. Returns the stored
    /// alpha, or `None` if the pair has never been observed.
    pub fn set_alpha(&self, provider: &str, model: &str, alpha: f64) -> Option<f64> {
        let mut states = self.states.write().ok()?;
        states
            .get_mut(&PairKey::new(provider, model))
            .map(|state| state.set_alpha(alpha, &self.bounds))
    }

    /// Begin a new adaptation window for a pair, zeroing its window
    /// sample counter. The EWMAs and lifetime totals are untouched.
    pub fn begin_window(&self, provider: &str, model: &str) {
        let Ok(mut states) = self.states.write() else {
            return;
        };
        if let Some(state) = states.get_mut(&PairKey::new(provider, model)) {
            state.begin_window();
        }
    }
}

impl Default for TelemetryTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds_without_smoothing() {
        let tracker = TelemetryTracker::new();
        tracker.record_sample("acme", "acme-large", 100, true);

        let state = tracker.state("acme", "acme-large");
        assert!(state.is_some());
        let state = state.unwrap_or_else(|| TelemetryState::seed(0, true, 0.3));
        assert!((state.ewma_latency_ms - 100.0).abs() < f64::EPSILON);
        assert!(state.ewma_error_rate.abs() < f64::EPSILON);
        assert_eq!(state.window_requests, 1);
    }

    #[test]
    fn ewma_update_law_holds() {
        let tracker = TelemetryTracker::new();
        tracker.record_sample("acme", "acme-large", 100, true);
        tracker.record_sample("acme", "acme-large", 200, true);

        let latency = tracker
            .state("acme", "acme-large")
            .map_or(0.0, |s| s.ewma_latency_ms);
        // 0.3 * 200 + 0.7 * 100 = 130
        assert!((latency - 130.0).abs() < 1e-9);
    }

    #[test]
    fn pairs_are_tracked_independently() {
        let tracker = TelemetryTracker::new();
        tracker.record_sample("acme", "acme-large", 100, true);
        tracker.record_sample("acme", "acme-small", 900, false);

        let large = tracker.state("acme", "acme-large").map_or(0.0, |s| s.ewma_error_rate);
        let small = tracker.state("acme", "acme-small").map_or(0.0, |s| s.ewma_error_rate);
        assert!(large.abs() < f64::EPSILON);
        assert!((small - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_pair_has_no_state() {
        let tracker = TelemetryTracker::new();
        assert!(tracker.state("ghost", "ghost-1").is_none());
        assert!(tracker.set_alpha("ghost", "ghost-1", 0.4).is_none());
    }

    #[test]
    fn set_alpha_clamps_into_bounds() {
        let tracker = TelemetryTracker::new();
        tracker.record_sample("acme", "acme-large", 100, true);

        let stored = tracker.set_alpha("acme", "acme-large", 0.9);
        assert!(stored.is_some());
        assert!((stored.unwrap_or(0.0) - 0.5).abs() < f64::EPSILON);

        let stored = tracker.set_alpha("acme", "acme-large", 0.01);
        assert!((stored.unwrap_or(0.0) - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn begin_window_resets_only_window_counter() {
        let tracker = TelemetryTracker::new();
        for _ in 0..5 {
            tracker.record_sample("acme", "acme-large", 100, true);
        }
        tracker.begin_window("acme", "acme-large");

        let state = tracker.state("acme", "acme-large");
        assert_eq!(state.as_ref().map(|s| s.window_requests), Some(0));
        assert_eq!(state.as_ref().map(|s| s.total_requests), Some(5));
    }

    #[test]
    fn all_states_snapshots_every_pair() {
        let tracker = TelemetryTracker::new();
        tracker.record_sample("acme", "acme-large", 100, true);
        tracker.record_sample("zenith", "zenith-base", 200, false);

        let all = tracker.all_states();
        assert_eq!(all.len(), 2);
        assert!(all.contains_key(&PairKey::new("acme", "acme-large")));
        assert!(all.contains_key(&PairKey::new("zenith", "zenith-base")));
    }

    #[test]
    fn thread_safety_concurrent_recording() {
        use std::sync::Arc;
        use std::thread;

        let tracker = Arc::new(TelemetryTracker::new());
        let mut handles = Vec::new();

        for _ in 0..10 {
            let t = Arc::clone(&tracker);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    t.record_sample("acme", "acme-large", 100, true);
                }
            }));
        }

        for handle in handles {
            handle.join().ok();
        }

        let state = tracker.state("acme", "acme-large");
        assert_eq!(state.as_ref().map(|s| s.total_requests), Some(1000));
        // All samples identical, so the EWMA must equal the sample.
        let latency = state.map_or(0.0, |s| s.ewma_latency_ms);
        assert!((latency - 100.0).abs() < 1e-9);
    }
}
