//! Dispatch Metrics
//!
//! In-process counters and latency histograms for the dispatcher:
//! - Dispatch outcomes (success, fallback, exhausted)
//! - Attempts and failures per error kind
//! - Per-backend attempt / success / failure counts
//! - End-to-end and per-attempt latency
//!
//! Everything is atomic and lock-free on the record path. There is no
//! exporter; [`DispatchMetrics::snapshot`] produces a serializable view.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::backend::ErrorKind;
use crate::result::{DispatchOutcome, DispatchResult};

// ============================================================================
// Histogram for Latency Tracking
// ============================================================================

/// A histogram for tracking latency distributions
#[derive(Debug)]
pub struct Histogram {
    /// Bucket upper bounds (in the unit being measured)
    buckets: Vec<f64>,
    /// Count per bucket
    counts: Vec<AtomicU64>,
    /// Total count
    total_count: AtomicU64,
    /// Sum of all values
    sum: AtomicU64,
    /// Minimum value seen
    min: AtomicU64,
    /// Maximum value seen
    max: AtomicU64,
}

impl Histogram {
    /// Create a histogram with the given bucket upper bounds
    ///
    /// Values above the last bound are counted in the last bucket.
    #[must_use]
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            total_count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }

    /// Default latency buckets, in milliseconds
    #[must_use]
    pub fn latency_default() -> Self {
        Self::new(vec![
            10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0,
            60000.0, 120_000.0,
        ])
    }

    /// Record a duration in milliseconds
    pub fn record_duration(&self, duration: Duration) {
        self.record(duration.as_secs_f64() * 1000.0);
    }

    /// Record a value
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn record(&self, value: f64) {
        if self.buckets.is_empty() {
            return;
        }
        let bucket_idx = self
            .buckets
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(self.buckets.len() - 1);

        let value_u64 = value.max(0.0) as u64;
        self.counts[bucket_idx].fetch_add(1, Ordering::Relaxed);
        self.total_count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value_u64, Ordering::Relaxed);

        // min/max are updated independently of the counters
        self.min.fetch_min(value_u64, Ordering::Relaxed);
        self.max.fetch_max(value_u64, Ordering::Relaxed);
    }

    /// Point-in-time copy
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> HistogramSnapshot {
        let counts: Vec<u64> = self
            .counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();
        let total = self.total_count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);
        let min = self.min.load(Ordering::Relaxed);

        HistogramSnapshot {
            buckets: self.buckets.clone(),
            counts,
            total,
            sum,
            min: if min == u64::MAX { 0 } else { min },
            max: self.max.load(Ordering::Relaxed),
            mean: if total > 0 {
                sum as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

/// Snapshot of histogram data
#[derive(Clone, Debug, Serialize)]
pub struct HistogramSnapshot {
    /// Bucket upper bounds
    #[serde(skip)]
    pub buckets: Vec<f64>,
    /// Count per bucket
    #[serde(skip)]
    pub counts: Vec<u64>,
    /// Number of recorded values
    pub total: u64,
    /// Sum of recorded values
    pub sum: u64,
    /// Smallest recorded value
    pub min: u64,
    /// Largest recorded value
    pub max: u64,
    /// Mean of recorded values
    pub mean: f64,
}

impl HistogramSnapshot {
    /// Upper bound of the bucket holding the `p` quantile
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn percentile(&self, p: f64) -> f64 {
        if self.total == 0 {
            return 0.0;
        }

        let target = ((self.total as f64 * p).ceil() as u64).max(1);
        let mut cumulative = 0u64;

        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return self.buckets[i];
            }
        }

        self.buckets.last().copied().unwrap_or(0.0)
    }

    /// Median
    #[must_use]
    pub fn p50(&self) -> f64 {
        self.percentile(0.5)
    }

    /// 90th percentile
    #[must_use]
    pub fn p90(&self) -> f64 {
        self.percentile(0.9)
    }

    /// 99th percentile
    #[must_use]
    pub fn p99(&self) -> f64 {
        self.percentile(0.99)
    }
}

// ============================================================================
// Counter
// ============================================================================

/// A simple atomic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a zeroed counter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n`
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Per-Backend Metrics
// ============================================================================

#[derive(Debug, Default)]
struct BackendCounters {
    attempts: Counter,
    successes: Counter,
    failures: Counter,
}

/// Per-backend counts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BackendCounts {
    /// Calls made
    pub attempts: u64,
    /// Calls that produced an answer
    pub successes: u64,
    /// Calls that failed
    pub failures: u64,
}

// ============================================================================
// Dispatch Metrics
// ============================================================================

/// Centralized metrics for the dispatcher
#[derive(Debug)]
pub struct DispatchMetrics {
    dispatches: Counter,
    successes: Counter,
    fallbacks: Counter,
    exhausted: Counter,
    rejected: Counter,
    attempts: Counter,
    deadline_skips: Counter,
    failures_by_kind: [Counter; ErrorKind::ALL.len()],
    backends: DashMap<String, BackendCounters>,
    dispatch_latency: Histogram,
    attempt_latency: Histogram,
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn kind_index(kind: ErrorKind) -> usize {
    match kind {
        ErrorKind::Timeout => 0,
        ErrorKind::Auth => 1,
        ErrorKind::QuotaExceeded => 2,
        ErrorKind::TransientNetwork => 3,
        ErrorKind::MalformedResponse => 4,
    }
}

impl DispatchMetrics {
    /// Create a zeroed collector
    #[must_use]
    pub fn new() -> Self {
        Self {
            dispatches: Counter::new(),
            successes: Counter::new(),
            fallbacks: Counter::new(),
            exhausted: Counter::new(),
            rejected: Counter::new(),
            attempts: Counter::new(),
            deadline_skips: Counter::new(),
            failures_by_kind: Default::default(),
            backends: DashMap::new(),
            dispatch_latency: Histogram::latency_default(),
            attempt_latency: Histogram::latency_default(),
        }
    }

    /// Record one backend call
    pub fn record_attempt(&self, backend_id: &str, error: Option<ErrorKind>, duration: Duration) {
        self.attempts.inc();
        self.attempt_latency.record_duration(duration);

        let counters = self.backends.entry(backend_id.to_string()).or_default();
        counters.attempts.inc();
        match error {
            None => counters.successes.inc(),
            Some(kind) => {
                counters.failures.inc();
                self.failures_by_kind[kind_index(kind)].inc();
            }
        }
    }

    /// Record candidates that were not tried because the deadline passed
    pub fn record_deadline_skips(&self, count: usize) {
        self.deadline_skips.add(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Record a completed dispatch
    pub fn record_dispatch(&self, result: &DispatchResult, elapsed: Duration) {
        self.dispatches.inc();
        self.dispatch_latency.record_duration(elapsed);
        match result.outcome() {
            DispatchOutcome::Success => self.successes.inc(),
            DispatchOutcome::FallbackUsed => self.fallbacks.inc(),
            DispatchOutcome::Exhausted => self.exhausted.inc(),
        }
    }

    /// Record a dispatch refused before any work (blank prompt, shut down)
    pub fn record_rejected(&self) {
        self.rejected.inc();
    }

    /// Counts for one backend
    #[must_use]
    pub fn backend(&self, backend_id: &str) -> BackendCounts {
        self.backends
            .get(backend_id)
            .map(|c| BackendCounts {
                attempts: c.attempts.get(),
                successes: c.successes.get(),
                failures: c.failures.get(),
            })
            .unwrap_or_default()
    }

    /// Serializable view of every metric
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let failures_by_kind = ErrorKind::ALL
            .iter()
            .map(|&kind| (kind, self.failures_by_kind[kind_index(kind)].get()))
            .filter(|(_, count)| *count > 0)
            .collect();

        let backends = self
            .backends
            .iter()
            .map(|entry| {
                let c = entry.value();
                (
                    entry.key().clone(),
                    BackendCounts {
                        attempts: c.attempts.get(),
                        successes: c.successes.get(),
                        failures: c.failures.get(),
                    },
                )
            })
            .collect();

        let dispatch_latency = self.dispatch_latency.snapshot();
        let attempt_latency = self.attempt_latency.snapshot();

        MetricsSnapshot {
            dispatches: self.dispatches.get(),
            successes: self.successes.get(),
            fallbacks: self.fallbacks.get(),
            exhausted: self.exhausted.get(),
            rejected: self.rejected.get(),
            attempts: self.attempts.get(),
            deadline_skips: self.deadline_skips.get(),
            failures_by_kind,
            backends,
            dispatch_latency_p50_ms: dispatch_latency.p50(),
            dispatch_latency_p90_ms: dispatch_latency.p90(),
            dispatch_latency_p99_ms: dispatch_latency.p99(),
            attempt_latency_p50_ms: attempt_latency.p50(),
            attempt_latency_p99_ms: attempt_latency.p99(),
            dispatch_latency,
        }
    }
}

/// Point-in-time metrics
#[derive(Clone, Debug, Serialize)]
pub struct MetricsSnapshot {
    /// Completed dispatches
    pub dispatches: u64,
    /// Dispatches answered by a backend
    pub successes: u64,
    /// Dispatches answered by the fallback template
    pub fallbacks: u64,
    /// Dispatches that ended with no content
    pub exhausted: u64,
    /// Dispatches refused before any work
    pub rejected: u64,
    /// Backend calls made
    pub attempts: u64,
    /// Candidates skipped because the deadline passed
    pub deadline_skips: u64,
    /// Failed calls per error kind (zero counts omitted)
    pub failures_by_kind: BTreeMap<ErrorKind, u64>,
    /// Per-backend counts
    pub backends: BTreeMap<String, BackendCounts>,
    /// End-to-end latency distribution
    pub dispatch_latency: HistogramSnapshot,
    /// Median dispatch latency
    pub dispatch_latency_p50_ms: f64,
    /// 90th percentile dispatch latency
    pub dispatch_latency_p90_ms: f64,
    /// 99th percentile dispatch latency
    pub dispatch_latency_p99_ms: f64,
    /// Median attempt latency
    pub attempt_latency_p50_ms: f64,
    /// 99th percentile attempt latency
    pub attempt_latency_p99_ms: f64,
}
