//! Query Descriptor
//!
//! What a caller hands the dispatcher: the assembled prompt, a size estimate
//! for capacity filtering, a complexity hint that picks the scoring weights,
//! and the absolute deadline shared by every failover attempt.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

// ============================================================================
// Complexity Hint
// ============================================================================

/// Caller's estimate of how demanding a query is
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityHint {
    /// Short factual or conversational queries; speed and cost dominate
    Simple,
    /// Everyday queries
    #[default]
    Moderate,
    /// Multi-step reasoning or analysis; quality dominates
    Complex,
}

impl ComplexityHint {
    /// All hints, cheapest first
    pub const ALL: [ComplexityHint; 3] = [
        ComplexityHint::Simple,
        ComplexityHint::Moderate,
        ComplexityHint::Complex,
    ];

    /// Guess a hint from the prompt text
    ///
    /// Keyword and length heuristic for callers that have no better signal.
    /// The dispatcher itself never overrides a hint it was given.
    #[must_use]
    pub fn estimate(prompt: &str) -> Self {
        let lower = prompt.to_lowercase();
        let word_count = prompt.split_whitespace().count();

        if word_count > 150
            || lower.contains("step by step")
            || lower.contains("analyze")
            || lower.contains("analyse")
            || lower.contains("compare")
            || lower.contains("trade-off")
            || lower.contains("tradeoff")
            || lower.contains("strategy")
            || lower.contains("plan for")
            || lower.contains("explain in detail")
        {
            return ComplexityHint::Complex;
        }

        let greeting = ["hi", "hello", "hey", "thanks", "thank you"]
            .iter()
            .any(|g| lower.trim_start().starts_with(g));
        let single_question = word_count <= 12 && lower.matches('?').count() <= 1;

        if (word_count < 6 && greeting) || (single_question && word_count <= 8) {
            return ComplexityHint::Simple;
        }

        ComplexityHint::Moderate
    }

    /// Lowercase label
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ComplexityHint::Simple => "simple",
            ComplexityHint::Moderate => "moderate",
            ComplexityHint::Complex => "complex",
        }
    }
}

impl fmt::Display for ComplexityHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized complexity label
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown complexity '{0}' (expected simple, moderate, or complex)")]
pub struct ParseComplexityError(String);

impl FromStr for ComplexityHint {
    type Err = ParseComplexityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(ComplexityHint::Simple),
            "moderate" => Ok(ComplexityHint::Moderate),
            "complex" => Ok(ComplexityHint::Complex),
            other => Err(ParseComplexityError(other.to_string())),
        }
    }
}

// ============================================================================
// Query Descriptor
// ============================================================================

/// Rough token count for `text`: one token per four characters, rounded up
#[must_use]
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

/// One dispatch request
#[derive(Clone, Debug)]
pub struct QueryDescriptor {
    /// Correlation id carried through logs and the result envelope
    pub request_id: Uuid,

    /// Fully assembled prompt
    pub prompt: String,

    /// Approximate prompt size in tokens, compared against backend capacity
    pub estimated_tokens: u32,

    /// Selects the scoring weights
    pub complexity_hint: ComplexityHint,

    /// Absolute instant by which a result is needed
    pub deadline: Instant,
}

impl QueryDescriptor {
    /// Create a descriptor with an estimated size and `Moderate` complexity
    pub fn new(prompt: impl Into<String>, deadline: Instant) -> Self {
        let prompt = prompt.into();
        Self {
            request_id: Uuid::new_v4(),
            estimated_tokens: estimate_tokens(&prompt),
            prompt,
            complexity_hint: ComplexityHint::default(),
            deadline,
        }
    }

    /// Create a descriptor whose deadline is `timeout` from now
    pub fn with_timeout(prompt: impl Into<String>, timeout: Duration) -> Self {
        Self::new(prompt, Instant::now() + timeout)
    }

    /// Set the complexity hint
    #[must_use]
    pub fn with_complexity(mut self, hint: ComplexityHint) -> Self {
        self.complexity_hint = hint;
        self
    }

    /// Override the size estimate
    #[must_use]
    pub fn with_estimated_tokens(mut self, tokens: u32) -> Self {
        self.estimated_tokens = tokens;
        self
    }

    /// Override the deadline
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = deadline;
        self
    }

    /// Use a caller-supplied correlation id
    #[must_use]
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }

    /// Time left before the deadline at `now`; zero once it has passed
    #[must_use]
    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    /// Whether the deadline has passed at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.remaining_at(now).is_zero()
    }
}
