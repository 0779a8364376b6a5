//! Selection Policy
//!
//! Turns a query descriptor and a health snapshot into an ordered candidate
//! list. Pure with respect to its inputs: same registry, same snapshot, same
//! query, same instant, same order.
//!
//! # Ranking Flow
//!
//! ```text
//! 1. Filter: drop backends whose capacity is below the estimated size,
//!    and backends parked until a retry_after that has not elapsed
//! 2. Score:  w_quality*quality + w_speed*speed - w_cost*cost,
//!            weights picked by complexity hint
//! 3. Demote: Degraded (including probing) backends by the penalty factor
//! 4. Order:  descending score, ties broken by ascending id
//! ```
//!
//! An empty result means nothing is eligible; the dispatcher goes straight to
//! exhaustion without touching the network.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::health::{HealthState, HealthStatus};
use super::registry::{BackendProfile, BackendRegistry};
use crate::query::{ComplexityHint, QueryDescriptor};

// ============================================================================
// Weights
// ============================================================================

/// Linear weights applied to a backend's ranks
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Weight on `quality_score`
    pub quality: f64,
    /// Weight on `speed_score`
    pub speed: f64,
    /// Weight on `cost_score` (subtracted)
    pub cost: f64,
}

impl ScoreWeights {
    /// Create a weight triple
    #[must_use]
    pub const fn new(quality: f64, speed: f64, cost: f64) -> Self {
        Self {
            quality,
            speed,
            cost,
        }
    }

    /// Raw score of `profile` under these weights
    #[must_use]
    pub fn score(&self, profile: &BackendProfile) -> f64 {
        self.quality * f64::from(profile.quality_score) + self.speed * f64::from(profile.speed_score)
            - self.cost * f64::from(profile.cost_score)
    }

    fn is_valid(&self) -> bool {
        [self.quality, self.speed, self.cost]
            .iter()
            .all(|w| w.is_finite() && *w >= 0.0)
    }
}

/// Weights per complexity hint
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightTable {
    /// Used for `Simple` queries
    pub simple: ScoreWeights,
    /// Used for `Moderate` queries
    pub moderate: ScoreWeights,
    /// Used for `Complex` queries
    pub complex: ScoreWeights,
}

impl Default for WeightTable {
    fn default() -> Self {
        Self {
            simple: ScoreWeights::new(0.2, 0.5, 0.3),
            moderate: ScoreWeights::new(0.4, 0.35, 0.25),
            complex: ScoreWeights::new(0.7, 0.2, 0.1),
        }
    }
}

impl WeightTable {
    /// Weights for `hint`
    #[must_use]
    pub fn for_hint(&self, hint: ComplexityHint) -> &ScoreWeights {
        match hint {
            ComplexityHint::Simple => &self.simple,
            ComplexityHint::Moderate => &self.moderate,
            ComplexityHint::Complex => &self.complex,
        }
    }
}

/// Selection policy parameters
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyConfig {
    /// Weights per complexity hint
    pub weights: WeightTable,

    /// Factor in `(0, 1]` demoting `Degraded` backends
    pub degraded_penalty: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            weights: WeightTable::default(),
            degraded_penalty: 0.5,
        }
    }
}

impl PolicyConfig {
    /// Check weights and penalty, naming the first offending setting
    pub fn validate(&self) -> Result<(), String> {
        for hint in ComplexityHint::ALL {
            if !self.weights.for_hint(hint).is_valid() {
                return Err(format!(
                    "policy weights for '{hint}' must be finite and non-negative"
                ));
            }
        }
        if !(self.degraded_penalty > 0.0 && self.degraded_penalty <= 1.0) {
            return Err(format!(
                "degraded_penalty must be in (0, 1], got {}",
                self.degraded_penalty
            ));
        }
        Ok(())
    }

    /// Lower `score` for a degraded backend, whatever its sign
    #[must_use]
    pub fn demote(&self, score: f64) -> f64 {
        if score >= 0.0 {
            score * self.degraded_penalty
        } else {
            score / self.degraded_penalty
        }
    }
}

// ============================================================================
// Selection Policy
// ============================================================================

/// A backend that passed filtering, with its adjusted score
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RankedCandidate {
    /// Backend id
    pub backend_id: String,
    /// Score after any degraded demotion
    pub score: f64,
    /// Status the policy saw
    pub status: HealthStatus,
}

/// Ranks registered backends for a query
#[derive(Debug)]
pub struct SelectionPolicy {
    registry: Arc<BackendRegistry>,
    config: PolicyConfig,
}

impl SelectionPolicy {
    /// Create a policy over `registry`
    #[must_use]
    pub fn new(registry: Arc<BackendRegistry>, config: PolicyConfig) -> Self {
        Self { registry, config }
    }

    /// Parameters in use
    #[must_use]
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Ordered backend ids for `query`
    #[must_use]
    pub fn rank(
        &self,
        query: &QueryDescriptor,
        healths: &HashMap<String, HealthState>,
    ) -> Vec<String> {
        self.rank_scored_at(query, healths, Instant::now())
            .into_iter()
            .map(|c| c.backend_id)
            .collect()
    }

    /// Ordered candidates with scores, evaluated at `now`
    #[must_use]
    pub fn rank_scored_at(
        &self,
        query: &QueryDescriptor,
        healths: &HashMap<String, HealthState>,
        now: Instant,
    ) -> Vec<RankedCandidate> {
        let weights = self.config.weights.for_hint(query.complexity_hint);
        let table = self.registry.current();

        let mut ranked: Vec<RankedCandidate> = table
            .values()
            .filter(|profile| profile.max_context_tokens >= query.estimated_tokens)
            .filter_map(|profile| {
                let status = healths
                    .get(&profile.id)
                    .map_or(HealthStatus::Healthy, |h| h.effective_status(now));

                let raw = weights.score(profile);
                let score = match status {
                    HealthStatus::Healthy => raw,
                    HealthStatus::Degraded => self.config.demote(raw),
                    HealthStatus::Unavailable => return None,
                };

                Some(RankedCandidate {
                    backend_id: profile.id.clone(),
                    score,
                    status,
                })
            })
            .collect();

        ranked.sort_by(|a, b| match b.score.total_cmp(&a.score) {
            Ordering::Equal => a.backend_id.cmp(&b.backend_id),
            other => other,
        });

        tracing::debug!(
            request_id = %query.request_id,
            complexity = %query.complexity_hint,
            estimated_tokens = query.estimated_tokens,
            eligible = ranked.len(),
            registered = table.len(),
            order = ?ranked.iter().map(|c| c.backend_id.as_str()).collect::<Vec<_>>(),
            "Ranked backends"
        );

        ranked
    }
}
