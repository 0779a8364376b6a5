//! Multi-Backend Routing
//!
//! Decides which backend answers a query, tries candidates in order under the
//! query's deadline, and keeps per-backend health so that broken backends
//! stop receiving traffic until their backoff window elapses.
//!
//! # Architecture
//!
//! ```text
//! +------------------+     +------------------+
//! | BackendRegistry  |     |  HealthTracker   |  <-- shared, per-backend locks
//! +--------+---------+     +--------+---------+
//!          |    profiles            |   snapshot
//!          +-----------+------------+
//!                      v
//!            +------------------+
//!            | SelectionPolicy  |  <-- filter + score + order
//!            +--------+---------+
//!                     |  ranked ids
//!                     v
//!            +------------------+
//!            | DispatchExecutor |  <-- sequential attempts, deadline-clipped
//!            +--------+---------+
//!                     |
//!            success  |  exhausted
//!                     v
//!            +------------------+
//!            |FallbackResponder |  <-- templated, never AI-labelled
//!            +------------------+
//! ```
//!
//! # Design Principles
//!
//! 1. **Deterministic ranking**: equal scores are ordered by backend id
//! 2. **Failure isolation**: one backend's failures never touch another's state
//! 3. **Honest degradation**: fallback content is always marked as not AI-generated
//! 4. **Observability**: counters and latency histograms for every attempt

pub mod executor;
pub mod fallback;
pub mod health;
pub mod metrics;
pub mod policy;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_utils;

pub use executor::{DispatchExecutor, Execution, ExecutionOutcome};
pub use fallback::{FallbackNotice, FallbackResponder, FALLBACK_BANNER};
pub use health::{
    HealthConfig, HealthState, HealthStatus, HealthSummary, HealthTracker, MAX_WINDOW,
};
pub use metrics::{
    BackendCounts, Counter, DispatchMetrics, Histogram, HistogramSnapshot, MetricsSnapshot,
};
pub use policy::{PolicyConfig, RankedCandidate, ScoreWeights, SelectionPolicy, WeightTable};
pub use registry::{BackendProfile, BackendRegistry, RegistryError, MAX_SCORE, MIN_SCORE};
