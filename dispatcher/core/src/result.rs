//! Dispatch Result Envelope
//!
//! The uniform answer returned for every dispatch. Fields are private and the
//! envelope can only be built through its three constructors, each of which
//! fixes `is_ai_generated` from the outcome. A fallback or exhausted result can
//! therefore never claim to be model output.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::backend::{ErrorKind, TokenUsage};
use crate::routing::fallback::FallbackNotice;

// ============================================================================
// Outcome
// ============================================================================

/// How a dispatch ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// A backend produced the content
    Success,
    /// No backend answered; content is the deterministic fallback template
    FallbackUsed,
    /// No backend answered and fallback is disabled; content is empty
    Exhausted,
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DispatchOutcome::Success => "success",
            DispatchOutcome::FallbackUsed => "fallback_used",
            DispatchOutcome::Exhausted => "exhausted",
        })
    }
}

/// Why no backend produced an answer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionReason {
    /// Filtering left no candidate (capacity, or every backend parked)
    NoEligibleBackends,
    /// The deadline passed before a candidate answered
    DeadlineElapsed,
    /// Every candidate was tried and failed
    AllCandidatesFailed,
}

impl fmt::Display for ExhaustionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExhaustionReason::NoEligibleBackends => "no eligible backends",
            ExhaustionReason::DeadlineElapsed => "deadline elapsed",
            ExhaustionReason::AllCandidatesFailed => "all candidate backends failed",
        })
    }
}

// ============================================================================
// Attempt Record
// ============================================================================

fn serialize_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
}

/// One backend call made during a dispatch
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    /// Backend that was called
    pub backend_id: String,

    /// Failure classification; `None` for the successful attempt
    pub error_kind: Option<ErrorKind>,

    /// Wall time spent on the call
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl AttemptRecord {
    /// Record of a successful call
    pub fn succeeded(backend_id: impl Into<String>, duration: Duration) -> Self {
        Self {
            backend_id: backend_id.into(),
            error_kind: None,
            duration,
        }
    }

    /// Record of a failed call
    pub fn failed(backend_id: impl Into<String>, kind: ErrorKind, duration: Duration) -> Self {
        Self {
            backend_id: backend_id.into(),
            error_kind: Some(kind),
            duration,
        }
    }
}

// ============================================================================
// Dispatch Result
// ============================================================================

/// The envelope returned by [`Dispatcher::dispatch`](crate::Dispatcher::dispatch)
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DispatchResult {
    request_id: Uuid,
    outcome: DispatchOutcome,
    backend_id: Option<String>,
    content: String,
    is_ai_generated: bool,
    attempts: Vec<AttemptRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    skipped: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fallback: Option<FallbackNotice>,
    completed_at: DateTime<Utc>,
}

impl DispatchResult {
    /// A backend answered
    pub(crate) fn success(
        request_id: Uuid,
        backend_id: String,
        content: String,
        token_usage: Option<TokenUsage>,
        attempts: Vec<AttemptRecord>,
    ) -> Self {
        Self {
            request_id,
            outcome: DispatchOutcome::Success,
            backend_id: Some(backend_id),
            content,
            is_ai_generated: true,
            attempts,
            skipped: Vec::new(),
            token_usage,
            fallback: None,
            completed_at: Utc::now(),
        }
    }

    /// The deterministic fallback template stands in for an answer
    pub(crate) fn fallback_used(
        request_id: Uuid,
        notice: FallbackNotice,
        content: String,
        attempts: Vec<AttemptRecord>,
        skipped: Vec<String>,
    ) -> Self {
        Self {
            request_id,
            outcome: DispatchOutcome::FallbackUsed,
            backend_id: None,
            content,
            is_ai_generated: false,
            attempts,
            skipped,
            token_usage: None,
            fallback: Some(notice),
            completed_at: Utc::now(),
        }
    }

    /// Nothing answered and no fallback was produced
    pub(crate) fn exhausted(
        request_id: Uuid,
        attempts: Vec<AttemptRecord>,
        skipped: Vec<String>,
    ) -> Self {
        Self {
            request_id,
            outcome: DispatchOutcome::Exhausted,
            backend_id: None,
            content: String::new(),
            is_ai_generated: false,
            attempts,
            skipped,
            token_usage: None,
            fallback: None,
            completed_at: Utc::now(),
        }
    }

    /// Correlation id of the request
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// How the dispatch ended
    #[must_use]
    pub fn outcome(&self) -> DispatchOutcome {
        self.outcome
    }

    /// Backend that produced the content, on success
    #[must_use]
    pub fn backend_id(&self) -> Option<&str> {
        self.backend_id.as_deref()
    }

    /// AI text on success, fallback template otherwise, empty when exhausted
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// True exactly when the outcome is `Success`
    #[must_use]
    pub fn is_ai_generated(&self) -> bool {
        self.is_ai_generated
    }

    /// Every backend call made, in order
    #[must_use]
    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    /// Candidates not tried because the deadline had passed
    #[must_use]
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Token usage reported by the answering backend
    #[must_use]
    pub fn token_usage(&self) -> Option<TokenUsage> {
        self.token_usage
    }

    /// Structured fallback notice, when the fallback was used
    #[must_use]
    pub fn fallback(&self) -> Option<&FallbackNotice> {
        self.fallback.as_ref()
    }

    /// When the envelope was produced
    #[must_use]
    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    /// Shorthand for `outcome() == Success`
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == DispatchOutcome::Success
    }
}
