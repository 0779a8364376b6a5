//! Fallback Responder
//!
//! When every candidate is exhausted the caller still gets a structured,
//! deterministic answer. It is rendered from a fixed template, opens with an
//! explicit banner, and is never marked as AI output.
//!
//! ```text
//! Execution exhausted
//!        |
//!        +-- fallback enabled  --> FallbackUsed, templated content + notice
//!        +-- fallback disabled --> Exhausted, empty content
//! ```

use serde::Serialize;
use uuid::Uuid;

use crate::backend::ErrorKind;
use crate::query::ComplexityHint;
use crate::result::{AttemptRecord, DispatchResult, ExhaustionReason};

/// First line of every fallback response
pub const FALLBACK_BANNER: &str = "[FALLBACK RESPONSE - NOT GENERATED BY AN AI MODEL]";

/// Structured form of a fallback response
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FallbackNotice {
    /// Why no backend answered
    pub reason: ExhaustionReason,

    /// Backends that were tried and failed, in attempt order
    pub failed_backends: Vec<String>,

    /// Distinct failure kinds seen, in first-seen order
    pub error_kinds: Vec<ErrorKind>,

    /// Static advice for the reader
    pub guidance: Vec<String>,
}

/// Produces the non-AI response used when all candidates are exhausted
#[derive(Clone, Debug)]
pub struct FallbackResponder {
    enabled: bool,
}

impl Default for FallbackResponder {
    fn default() -> Self {
        Self::new(true)
    }
}

impl FallbackResponder {
    /// Create a responder; a disabled one yields `Exhausted` results
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Whether templated fallback content is produced
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Build the envelope for an exhausted dispatch
    pub fn respond(
        &self,
        request_id: Uuid,
        hint: ComplexityHint,
        reason: ExhaustionReason,
        attempts: Vec<AttemptRecord>,
        skipped: Vec<String>,
    ) -> DispatchResult {
        tracing::warn!(
            request_id = %request_id,
            reason = %reason,
            attempts = attempts.len(),
            skipped = skipped.len(),
            fallback = self.enabled,
            "No backend answered"
        );

        if !self.enabled {
            return DispatchResult::exhausted(request_id, attempts, skipped);
        }

        let (notice, content) = self.render(reason, hint, &attempts);
        DispatchResult::fallback_used(request_id, notice, content, attempts, skipped)
    }

    /// Render the notice and its text form
    #[must_use]
    pub fn render(
        &self,
        reason: ExhaustionReason,
        hint: ComplexityHint,
        attempts: &[AttemptRecord],
    ) -> (FallbackNotice, String) {
        let mut failed_backends = Vec::new();
        let mut error_kinds = Vec::new();
        for attempt in attempts {
            if let Some(kind) = attempt.error_kind {
                failed_backends.push(attempt.backend_id.clone());
                if !error_kinds.contains(&kind) {
                    error_kinds.push(kind);
                }
            }
        }

        let guidance = guidance_for(reason, hint, &error_kinds);
        let notice = FallbackNotice {
            reason,
            failed_backends,
            error_kinds,
            guidance,
        };
        let content = render_text(&notice);
        (notice, content)
    }
}

fn guidance_for(
    reason: ExhaustionReason,
    hint: ComplexityHint,
    error_kinds: &[ErrorKind],
) -> Vec<String> {
    let mut guidance = Vec::new();

    match reason {
        ExhaustionReason::NoEligibleBackends => {
            guidance.push(
                "No configured backend can currently accept this request. \
                 Shorten the prompt or retry once parked backends recover."
                    .to_string(),
            );
        }
        ExhaustionReason::DeadlineElapsed => {
            guidance.push(
                "The time budget ran out before an answer arrived. \
                 Retry with a longer deadline."
                    .to_string(),
            );
        }
        ExhaustionReason::AllCandidatesFailed => {
            if error_kinds
                .iter()
                .any(|k| matches!(k, ErrorKind::Auth | ErrorKind::QuotaExceeded))
            {
                guidance.push(
                    "At least one backend rejected its credentials or ran out of quota. \
                     Check the API keys and account limits."
                        .to_string(),
                );
            }
            if error_kinds.iter().any(|k| k.is_recoverable_soon()) {
                guidance.push(
                    "Some failures look transient. Retrying shortly is likely to succeed."
                        .to_string(),
                );
            }
        }
    }

    match hint {
        ComplexityHint::Complex => guidance.push(
            "Consider breaking the question into smaller steps and asking them separately."
                .to_string(),
        ),
        ComplexityHint::Simple => guidance.push(
            "Short factual questions can often be answered from local reference material."
                .to_string(),
        ),
        ComplexityHint::Moderate => {}
    }

    guidance
}

fn render_text(notice: &FallbackNotice) -> String {
    let mut text = String::new();
    text.push_str(FALLBACK_BANNER);
    text.push_str("\n\nNo AI backend produced an answer for this request.\n");
    text.push_str(&format!("Reason: {}", notice.reason));

    if !notice.failed_backends.is_empty() {
        let kinds: Vec<_> = notice.error_kinds.iter().map(|k| k.as_str()).collect();
        text.push_str(&format!(
            " (tried {}; errors: {})",
            notice.failed_backends.join(", "),
            kinds.join(", ")
        ));
    }
    text.push('\n');

    if !notice.guidance.is_empty() {
        text.push_str("\nGuidance:\n");
        for line in &notice.guidance {
            text.push_str("- ");
            text.push_str(line);
            text.push('\n');
        }
    }

    text
}
