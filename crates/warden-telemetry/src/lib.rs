//! Live EWMA telemetry tracking for the Warden governance engine.
//!
//! Provides a thread-safe [`TelemetryTracker`] that maintains a smoothed
//! latency and error-rate estimate per (provider, model) pair, updated
//! in O(1) on every completed LLM call. Safe to share via
//! `Arc<TelemetryTracker>` across request-handling workers.
//!
//! State is process-lifetime only: it is created on the first observed
//! call for a pair and reset by process restart, never persisted. The
//! smoothing factor per pair starts at the system default and is changed
//! only by the policy adaptation loop.

pub mod tracker;

pub use tracker::TelemetryTracker;
