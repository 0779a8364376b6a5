//! Backend Health Tracking
//!
//! Rolling per-backend health, updated by every completed call and read by the
//! selection policy as a point-in-time snapshot.
//!
//! # State Machine
//!
//! ```text
//!                 failure (< threshold)
//!   +---------+ ----------------------> +----------+
//!   | Healthy |                         | Degraded |
//!   +---------+ <---------------------- +----------+
//!       ^   |          success               |
//!       |   | threshold reached,             | threshold reached,
//!       |   | Auth or QuotaExceeded          | Auth or QuotaExceeded
//!       |   v                                v
//!       |  +-------------+   retry_after   +---------------------+
//!       +--| Unavailable | --------------> | probing (reported   |
//!  success +-------------+    elapsed      | as Degraded)        |
//!  (probe)        ^                        +---------------------+
//!                 |          failure                 |
//!                 +----------------------------------+
//! ```
//!
//! - A failure never improves a backend's status.
//! - `retry_after` never moves earlier while failures keep arriving; only a
//!   success that restores the backend clears it.
//! - `Auth` and `QuotaExceeded` park the backend for the long auth backoff on
//!   the first occurrence.
//!
//! # Thread Safety
//!
//! The tracker keeps a `DashMap` of individually locked entries. Every update
//! takes only its own backend's lock, so updates for one backend are
//! linearizable and never contend with updates for another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::backend::ErrorKind;

/// Longest a backend is ever parked for
pub const MAX_WINDOW: Duration = Duration::from_secs(30 * 24 * 60 * 60);

// ============================================================================
// Health Status
// ============================================================================

/// Health status of a backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Answering normally
    #[default]
    Healthy,

    /// Recently failed, or probing after a backoff window; still eligible
    Degraded,

    /// Parked until `retry_after`
    Unavailable,
}

impl HealthStatus {
    /// Label for logs and tables
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unavailable => "unavailable",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Health Configuration
// ============================================================================

/// Thresholds and backoff for health transitions
#[derive(Clone, Debug, PartialEq)]
pub struct HealthConfig {
    /// Consecutive failures before a backend is parked
    pub failure_threshold: u32,

    /// Backoff unit; the window is `base * 2^min(failures, cap)`
    pub backoff_base: Duration,

    /// Largest exponent applied to the backoff base
    pub backoff_cap_exponent: u32,

    /// Window applied on `Auth` / `QuotaExceeded`
    pub auth_backoff: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap_exponent: 6,
            auth_backoff: Duration::from_secs(15 * 60),
        }
    }
}

impl HealthConfig {
    /// Backoff window after `consecutive_failures` recoverable failures
    #[must_use]
    pub fn backoff_for(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.min(self.backoff_cap_exponent);
        let factor = 2u32.saturating_pow(exponent);
        self.backoff_base.saturating_mul(factor)
    }

    /// Window applied after a failure of `kind` at `consecutive_failures`
    ///
    /// `None` means the failure does not park the backend.
    #[must_use]
    pub fn window_for(&self, kind: ErrorKind, consecutive_failures: u32) -> Option<Duration> {
        if !kind.is_recoverable_soon() {
            Some(self.auth_backoff)
        } else if consecutive_failures >= self.failure_threshold {
            Some(self.backoff_for(consecutive_failures))
        } else {
            None
        }
    }
}

// ============================================================================
// Health State
// ============================================================================

/// Point-in-time health of one backend
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct HealthState {
    /// Recorded status (see [`effective_status`](Self::effective_status))
    pub status: HealthStatus,

    /// Failures since the last success
    pub consecutive_failures: u32,

    /// When the most recent failure was recorded
    pub last_failure_at: Option<Instant>,

    /// When the most recent success was recorded
    pub last_success_at: Option<Instant>,

    /// Earliest instant an `Unavailable` backend may be tried again
    pub retry_after: Option<Instant>,

    /// Classification of the most recent failure
    pub last_error: Option<ErrorKind>,

    /// Lifetime success count
    pub total_successes: u64,

    /// Lifetime failure count
    pub total_failures: u64,

    /// Duration of the most recent successful call
    pub last_latency: Option<Duration>,
}

impl HealthState {
    /// Status as seen by the selection policy at `now`
    ///
    /// An `Unavailable` backend whose window has elapsed is probing and is
    /// reported as `Degraded`.
    #[must_use]
    pub fn effective_status(&self, now: Instant) -> HealthStatus {
        match self.status {
            HealthStatus::Unavailable if self.window_elapsed(now) => HealthStatus::Degraded,
            status => status,
        }
    }

    /// Whether the backend may be called at `now`
    #[must_use]
    pub fn is_eligible(&self, now: Instant) -> bool {
        self.effective_status(now) != HealthStatus::Unavailable
    }

    /// Whether the backend is in its post-backoff probe phase at `now`
    #[must_use]
    pub fn is_probing(&self, now: Instant) -> bool {
        self.status == HealthStatus::Unavailable && self.window_elapsed(now)
    }

    /// Time left before the backend may be retried
    #[must_use]
    pub fn retry_in(&self, now: Instant) -> Option<Duration> {
        match self.status {
            HealthStatus::Unavailable => self
                .retry_after
                .map(|at| at.saturating_duration_since(now))
                .filter(|d| !d.is_zero()),
            _ => None,
        }
    }

    fn window_elapsed(&self, now: Instant) -> bool {
        self.retry_after.is_none_or(|at| now >= at)
    }

    fn apply_success(&mut self, now: Instant, latency: Duration) -> Option<HealthStatus> {
        let previous = self.status;
        self.consecutive_failures = 0;
        self.last_success_at = Some(now);
        self.last_latency = Some(latency);
        self.total_successes += 1;

        // A success from a call that started before the backend was parked
        // does not cut its window short.
        if previous == HealthStatus::Unavailable && !self.window_elapsed(now) {
            return None;
        }

        self.status = HealthStatus::Healthy;
        self.retry_after = None;
        (previous != HealthStatus::Healthy).then_some(previous)
    }

    fn apply_failure(
        &mut self,
        now: Instant,
        kind: ErrorKind,
        config: &HealthConfig,
    ) -> Option<HealthStatus> {
        let previous = self.status;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(now);
        self.last_error = Some(kind);
        self.total_failures += 1;

        match config.window_for(kind, self.consecutive_failures) {
            Some(window) => {
                let candidate = now + window.min(MAX_WINDOW);
                self.retry_after = Some(self.retry_after.map_or(candidate, |at| at.max(candidate)));
                self.status = HealthStatus::Unavailable;
            }
            None if previous == HealthStatus::Unavailable => {}
            None => self.status = HealthStatus::Degraded,
        }

        (previous != self.status).then_some(previous)
    }
}

// ============================================================================
// Health Tracker
// ============================================================================

/// One backend's lock-protected state
#[derive(Debug, Default)]
struct BackendHealth {
    state: Mutex<HealthState>,
}

/// Aggregate counts for status reporting
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    /// Tracked backends
    pub total: usize,
    /// Backends reported `Healthy`
    pub healthy: usize,
    /// Backends reported `Degraded` (probing included)
    pub degraded: usize,
    /// Backends parked until their window elapses
    pub unavailable: usize,
    /// Backends whose window elapsed and await a probe
    pub probing: usize,
}

/// Shared, per-backend health state
///
/// The only writer of [`HealthState`]. Callers report outcomes; the tracker
/// decides transitions.
#[derive(Debug, Default)]
pub struct HealthTracker {
    backends: DashMap<String, Arc<BackendHealth>>,
    config: HealthConfig,
}

impl HealthTracker {
    /// Create a tracker with default thresholds
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker with custom thresholds
    #[must_use]
    pub fn with_config(config: HealthConfig) -> Self {
        Self {
            backends: DashMap::new(),
            config,
        }
    }

    /// Thresholds in use
    #[must_use]
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Start tracking `backend_id` as `Healthy`; a no-op if already tracked
    pub fn register(&self, backend_id: impl Into<String>) {
        self.backends.entry(backend_id.into()).or_default();
    }

    fn entry(&self, backend_id: &str) -> Arc<BackendHealth> {
        if let Some(existing) = self.backends.get(backend_id) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.backends
                .entry(backend_id.to_string())
                .or_default()
                .value(),
        )
    }

    /// Record a successful call
    pub fn record_success(&self, backend_id: &str, latency: Duration) {
        self.record_success_at(backend_id, latency, Instant::now());
    }

    /// Record a successful call observed at `now`
    pub fn record_success_at(&self, backend_id: &str, latency: Duration, now: Instant) {
        let health = self.entry(backend_id);
        let transition = health.state.lock().apply_success(now, latency);

        if let Some(previous) = transition {
            tracing::info!(
                backend = %backend_id,
                from = %previous,
                "Backend recovered"
            );
        }
    }

    /// Record a failed call and return the backend's new status
    pub fn record_failure(&self, backend_id: &str, kind: ErrorKind) -> HealthStatus {
        self.record_failure_at(backend_id, kind, Instant::now())
    }

    /// Record a failed call observed at `now`
    pub fn record_failure_at(&self, backend_id: &str, kind: ErrorKind, now: Instant) -> HealthStatus {
        let health = self.entry(backend_id);
        let (status, transition, failures, retry_in) = {
            let mut state = health.state.lock();
            let transition = state.apply_failure(now, kind, &self.config);
            (
                state.status,
                transition,
                state.consecutive_failures,
                state.retry_in(now),
            )
        };

        match (transition, status) {
            (Some(_), HealthStatus::Unavailable) => {
                tracing::warn!(
                    backend = %backend_id,
                    error_kind = %kind,
                    consecutive_failures = failures,
                    retry_in_ms = retry_in
                        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
                    "Backend marked unavailable"
                );
            }
            (Some(previous), _) => {
                tracing::debug!(
                    backend = %backend_id,
                    from = %previous,
                    to = %status,
                    error_kind = %kind,
                    "Backend health changed"
                );
            }
            (None, _) => {}
        }

        status
    }

    /// Copy of one backend's state
    #[must_use]
    pub fn state(&self, backend_id: &str) -> Option<HealthState> {
        self.backends
            .get(backend_id)
            .map(|entry| entry.value().state.lock().clone())
    }

    /// Copies of every backend's state
    ///
    /// Each entry is read under its own lock, so every copy is internally
    /// consistent; the map as a whole is not a single atomic cut.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, HealthState> {
        self.backends
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state.lock().clone()))
            .collect()
    }

    /// Status as seen by the selection policy; untracked backends are `Healthy`
    #[must_use]
    pub fn effective_status(&self, backend_id: &str) -> HealthStatus {
        self.state(backend_id)
            .map_or(HealthStatus::Healthy, |s| s.effective_status(Instant::now()))
    }

    /// Number of tracked backends
    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Whether nothing is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Aggregate counts at `now`
    #[must_use]
    pub fn summary_at(&self, now: Instant) -> HealthSummary {
        let mut summary = HealthSummary::default();
        for state in self.snapshot().values() {
            summary.total += 1;
            if state.is_probing(now) {
                summary.probing += 1;
            }
            match state.effective_status(now) {
                HealthStatus::Healthy => summary.healthy += 1,
                HealthStatus::Degraded => summary.degraded += 1,
                HealthStatus::Unavailable => summary.unavailable += 1,
            }
        }
        summary
    }

    /// Aggregate counts now
    #[must_use]
    pub fn summary(&self) -> HealthSummary {
        self.summary_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = HealthConfig {
            backoff_base: Duration::from_millis(100),
            backoff_cap_exponent: 3,
            ..HealthConfig::default()
        };
        assert_eq!(config.backoff_for(0), Duration::from_millis(100));
        assert_eq!(config.backoff_for(1), Duration::from_millis(200));
        assert_eq!(config.backoff_for(3), Duration::from_millis(800));
        assert_eq!(config.backoff_for(30), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_saturates() {
        let config = HealthConfig {
            backoff_base: Duration::MAX,
            ..HealthConfig::default()
        };
        assert_eq!(config.backoff_for(5), Duration::MAX);
    }

    #[test]
    fn test_new_backend_is_healthy() {
        let tracker = HealthTracker::new();
        tracker.register("a");
        let state = tracker.state("a").unwrap();
        assert_eq!(state.status, HealthStatus::Healthy);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(tracker.effective_status("untracked"), HealthStatus::Healthy);
    }

    #[test]
    fn test_failures_degrade_then_park() {
        let tracker = HealthTracker::new();
        let now = Instant::now();

        assert_eq!(
            tracker.record_failure_at("a", ErrorKind::TransientNetwork, now),
            HealthStatus::Degraded
        );
        assert_eq!(
            tracker.record_failure_at("a", ErrorKind::Timeout, now),
            HealthStatus::Degraded
        );
        assert_eq!(
            tracker.record_failure_at("a", ErrorKind::TransientNetwork, now),
            HealthStatus::Unavailable
        );

        let state = tracker.state("a").unwrap();
        assert_eq!(state.consecutive_failures, 3);
        // 1s * 2^3
        assert_eq!(state.retry_after, Some(now + Duration::from_secs(8)));
        assert_eq!(state.last_error, Some(ErrorKind::TransientNetwork));
    }

    #[test]
    fn test_auth_parks_immediately() {
        let tracker = HealthTracker::new();
        let now = Instant::now();
        assert_eq!(
            tracker.record_failure_at("a", ErrorKind::Auth, now),
            HealthStatus::Unavailable
        );
        let state = tracker.state("a").unwrap();
        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(state.retry_after, Some(now + Duration::from_secs(900)));

        tracker.record_failure_at("b", ErrorKind::QuotaExceeded, now);
        assert_eq!(tracker.state("b").unwrap().status, HealthStatus::Unavailable);
    }

    #[test]
    fn test_failure_never_improves_status() {
        let tracker = HealthTracker::new();
        let now = Instant::now();
        tracker.record_failure_at("a", ErrorKind::Auth, now);
        // Success from an in-flight call resets the counter but not the window
        tracker.record_success_at("a", MS, now + MS);
        let state = tracker.state("a").unwrap();
        assert_eq!(state.status, HealthStatus::Unavailable);
        assert_eq!(state.consecutive_failures, 0);

        // One recoverable failure is below threshold but must not un-park it
        assert_eq!(
            tracker.record_failure_at("a", ErrorKind::TransientNetwork, now + 2 * MS),
            HealthStatus::Unavailable
        );
        assert_eq!(
            tracker.state("a").unwrap().retry_after,
            Some(now + Duration::from_secs(900))
        );
    }

    #[test]
    fn test_retry_after_is_monotone() {
        let tracker = HealthTracker::new();
        let start = Instant::now();
        let mut previous = None;
        for i in 0..12u32 {
            let kind = if i == 4 {
                ErrorKind::Auth
            } else {
                ErrorKind::TransientNetwork
            };
            tracker.record_failure_at("a", kind, start + Duration::from_secs(u64::from(i)));
            let retry = tracker.state("a").unwrap().retry_after;
            assert!(retry >= previous, "retry_after moved earlier at failure {i}");
            previous = retry;
        }
    }

    #[test]
    fn test_window_elapsed_reports_degraded_then_probe_success_restores() {
        let tracker = HealthTracker::new();
        let now = Instant::now();
        for _ in 0..3 {
            tracker.record_failure_at("a", ErrorKind::Timeout, now);
        }
        let state = tracker.state("a").unwrap();
        assert_eq!(state.effective_status(now), HealthStatus::Unavailable);
        assert!(!state.is_eligible(now));

        let later = now + Duration::from_secs(9);
        assert_eq!(state.effective_status(later), HealthStatus::Degraded);
        assert!(state.is_probing(later));
        assert_eq!(tracker.summary_at(later).probing, 1);

        tracker.record_success_at("a", MS, later);
        let state = tracker.state("a").unwrap();
        assert_eq!(state.status, HealthStatus::Healthy);
        assert_eq!(state.retry_after, None);
        assert_eq!(state.consecutive_failures, 0);
    }

    #[test]
    fn test_failed_probe_extends_window() {
        let tracker = HealthTracker::new();
        let now = Instant::now();
        for _ in 0..3 {
            tracker.record_failure_at("a", ErrorKind::Timeout, now);
        }
        let first = tracker.state("a").unwrap().retry_after.unwrap();

        let probe_at = first + MS;
        tracker.record_failure_at("a", ErrorKind::Timeout, probe_at);
        let state = tracker.state("a").unwrap();
        assert_eq!(state.status, HealthStatus::Unavailable);
        assert_eq!(state.retry_after, Some(probe_at + Duration::from_secs(16)));
    }

    #[test]
    fn test_success_resets_degraded() {
        let tracker = HealthTracker::new();
        tracker.record_failure("a", ErrorKind::MalformedResponse);
        tracker.record_success("a", Duration::from_millis(120));
        let state = tracker.state("a").unwrap();
        assert_eq!(state.status, HealthStatus::Healthy);
        assert_eq!(state.total_failures, 1);
        assert_eq!(state.total_successes, 1);
        assert_eq!(state.last_latency, Some(Duration::from_millis(120)));
    }

    #[test]
    fn test_failures_are_isolated_per_backend() {
        let tracker = HealthTracker::new();
        tracker.register("b");
        for _ in 0..5 {
            tracker.record_failure("a", ErrorKind::TransientNetwork);
        }
        assert_eq!(tracker.state("b").unwrap(), HealthState::default());
    }

    #[test]
    fn test_snapshot_is_a_point_in_time_copy() {
        let tracker = HealthTracker::new();
        let now = Instant::now();
        tracker.record_failure_at("a", ErrorKind::Timeout, now);
        tracker.register("b");

        let snapshot = tracker.snapshot();
        tracker.record_failure_at("a", ErrorKind::Auth, now);
        tracker.record_failure_at("b", ErrorKind::Timeout, now);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["a"].status, HealthStatus::Degraded);
        assert_eq!(snapshot["a"].consecutive_failures, 1);
        assert_eq!(snapshot["b"], HealthState::default());
        assert_eq!(tracker.state("a").unwrap().status, HealthStatus::Unavailable);
    }

    #[test]
    fn test_summary_counts() {
        let tracker = HealthTracker::new();
        let now = Instant::now();
        tracker.register("ok");
        tracker.record_failure_at("meh", ErrorKind::Timeout, now);
        tracker.record_failure_at("down", ErrorKind::Auth, now);

        assert_eq!(
            tracker.summary_at(now),
            HealthSummary {
                total: 3,
                healthy: 1,
                degraded: 1,
                unavailable: 1,
                probing: 0,
            }
        );
    }

    #[test]
    fn test_concurrent_updates_are_linearizable() {
        use std::thread;

        let tracker = Arc::new(HealthTracker::with_config(HealthConfig {
            failure_threshold: u32::MAX,
            ..HealthConfig::default()
        }));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    let id = format!("backend-{}", i % 2);
                    for _ in 0..250 {
                        tracker.record_failure(&id, ErrorKind::TransientNetwork);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        for id in ["backend-0", "backend-1"] {
            let state = tracker.state(id).unwrap();
            assert_eq!(state.total_failures, 1000);
            assert_eq!(state.consecutive_failures, 1000);
        }
    }
}
