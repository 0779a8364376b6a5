//! Dispatch Executor
//!
//! Walks a ranked candidate list under the request's deadline.
//!
//! ```text
//!  NotStarted --> Trying(0) --ok--> Success
//!                    |
//!                  error / timeout
//!                    v
//!                 Trying(1) --ok--> Success
//!                    |
//!                   ...
//!                    v
//!                 Exhausted (list done, or deadline reached)
//! ```
//!
//! Each candidate is tried at most once, strictly in order. The budget for an
//! attempt is `min(call_timeout, deadline - now)`; when it runs out the call
//! future is dropped, which aborts the in-flight request. Every completed
//! attempt is reported to the health tracker, deadline-clipped timeouts
//! included, so a backend that keeps outliving short deadlines is parked.

use std::sync::Arc;

use tokio::time::Instant;

use super::health::HealthTracker;
use super::metrics::DispatchMetrics;
use super::registry::BackendRegistry;
use crate::backend::{AdapterSet, BackendError, Completion, ErrorKind};
use crate::query::QueryDescriptor;
use crate::result::{AttemptRecord, ExhaustionReason};

/// How an execution ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// `backend_id` answered with `completion`
    Success {
        /// Backend that answered
        backend_id: String,
        /// The answer
        completion: Completion,
    },
    /// No candidate answered
    Exhausted(ExhaustionReason),
}

/// Result of walking a ranking
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Execution {
    /// How it ended
    pub outcome: ExecutionOutcome,
    /// Every call made, in order
    pub attempts: Vec<AttemptRecord>,
    /// Candidates not tried because the deadline had passed
    pub skipped: Vec<String>,
}

/// Tries ranked candidates in order until one answers
#[derive(Debug)]
pub struct DispatchExecutor {
    registry: Arc<BackendRegistry>,
    tracker: Arc<HealthTracker>,
    metrics: Arc<DispatchMetrics>,
}

impl DispatchExecutor {
    /// Create an executor reporting into `tracker` and `metrics`
    #[must_use]
    pub fn new(
        registry: Arc<BackendRegistry>,
        tracker: Arc<HealthTracker>,
        metrics: Arc<DispatchMetrics>,
    ) -> Self {
        Self {
            registry,
            tracker,
            metrics,
        }
    }

    /// Walk `ranking` for `query` using `adapters`
    pub async fn execute(
        &self,
        query: &QueryDescriptor,
        ranking: &[String],
        adapters: &AdapterSet,
    ) -> Execution {
        let mut attempts = Vec::new();

        for (index, backend_id) in ranking.iter().enumerate() {
            let remaining = query.remaining_at(Instant::now());
            if remaining.is_zero() {
                let skipped = ranking[index..].to_vec();
                self.metrics.record_deadline_skips(skipped.len());
                tracing::debug!(
                    request_id = %query.request_id,
                    skipped = skipped.len(),
                    "Deadline reached before all candidates were tried"
                );
                return Execution {
                    outcome: ExecutionOutcome::Exhausted(ExhaustionReason::DeadlineElapsed),
                    attempts,
                    skipped,
                };
            }

            let profile = match self.registry.get(backend_id) {
                Ok(profile) => profile,
                Err(e) => {
                    tracing::warn!(request_id = %query.request_id, error = %e, "Skipping candidate");
                    continue;
                }
            };
            let Some(adapter) = adapters.get(backend_id) else {
                tracing::warn!(
                    request_id = %query.request_id,
                    backend = %backend_id,
                    "Skipping candidate with no adapter bound"
                );
                continue;
            };

            let budget = profile.call_timeout.min(remaining);

            tracing::debug!(
                request_id = %query.request_id,
                backend = %backend_id,
                provider = adapter.name(),
                attempt = attempts.len() + 1,
                budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
                "Calling backend"
            );

            let started = Instant::now();
            let result = match tokio::time::timeout(budget, adapter.call(&query.prompt, budget)).await
            {
                Ok(Ok(completion)) if completion.text.trim().is_empty() => Err(BackendError::new(
                    ErrorKind::MalformedResponse,
                    "backend returned an empty completion",
                )),
                Ok(result) => result,
                Err(_elapsed) => Err(BackendError::timeout(budget)),
            };
            let elapsed = started.elapsed();

            match result {
                Ok(completion) => {
                    self.tracker.record_success(backend_id, elapsed);
                    self.metrics.record_attempt(backend_id, None, elapsed);
                    attempts.push(AttemptRecord::succeeded(backend_id.clone(), elapsed));
                    return Execution {
                        outcome: ExecutionOutcome::Success {
                            backend_id: backend_id.clone(),
                            completion,
                        },
                        attempts,
                        skipped: Vec::new(),
                    };
                }
                Err(err) => {
                    let status = self.tracker.record_failure(backend_id, err.kind);
                    self.metrics.record_attempt(backend_id, Some(err.kind), elapsed);
                    attempts.push(AttemptRecord::failed(backend_id.clone(), err.kind, elapsed));

                    tracing::warn!(
                        request_id = %query.request_id,
                        backend = %backend_id,
                        error_kind = %err.kind,
                        detail = %err.detail,
                        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                        status = %status,
                        "Backend attempt failed"
                    );
                }
            }
        }

        let reason = if attempts.is_empty() {
            ExhaustionReason::NoEligibleBackends
        } else if query.is_expired_at(Instant::now()) {
            ExhaustionReason::DeadlineElapsed
        } else {
            ExhaustionReason::AllCandidatesFailed
        };

        Execution {
            outcome: ExecutionOutcome::Exhausted(reason),
            attempts,
            skipped: Vec::new(),
        }
    }
}
