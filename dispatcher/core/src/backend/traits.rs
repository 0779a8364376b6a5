//! Backend Adapter Traits
//!
//! The uniform contract every inference backend is reached through. The
//! dispatcher never talks to a provider API directly: it hands an adapter a
//! prompt and a time budget and gets back either a [`Completion`] or a
//! [`BackendError`] already classified into the closed [`ErrorKind`] set.
//!
//! # Design Philosophy
//!
//! Classification happens exactly once, at this boundary. Everything
//! downstream (health tracking, failover, fallback rendering) matches on
//! [`ErrorKind`] exhaustively instead of inspecting provider error strings.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// Error Classification
// ============================================================================

/// Closed classification of a failed backend call
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The call did not complete within its time budget
    Timeout,
    /// Credentials were rejected
    Auth,
    /// The account ran out of quota or credit
    QuotaExceeded,
    /// Connection failure, reset, rate limiting, or a server-side error
    TransientNetwork,
    /// The backend answered but the answer was unusable
    MalformedResponse,
}

impl ErrorKind {
    /// Every variant, in declaration order
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::Timeout,
        ErrorKind::Auth,
        ErrorKind::QuotaExceeded,
        ErrorKind::TransientNetwork,
        ErrorKind::MalformedResponse,
    ];

    /// Whether the failure is likely to clear up on its own shortly
    ///
    /// `Auth` and `QuotaExceeded` need operator action, so the backend is
    /// parked for a long interval instead of being retried on exponential
    /// backoff.
    #[must_use]
    pub fn is_recoverable_soon(self) -> bool {
        match self {
            ErrorKind::Timeout | ErrorKind::TransientNetwork | ErrorKind::MalformedResponse => {
                true
            }
            ErrorKind::Auth | ErrorKind::QuotaExceeded => false,
        }
    }

    /// Stable snake_case label used in logs and metrics
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Auth => "auth",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::MalformedResponse => "malformed_response",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified backend failure
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct BackendError {
    /// Classification used by the health tracker and failover logic
    pub kind: ErrorKind,
    /// Human-readable detail for logs; never shown as model output
    pub detail: String,
}

impl BackendError {
    /// Create an error of the given kind
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Shorthand for a timeout after `budget`
    #[must_use]
    pub fn timeout(budget: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("no response within {}ms", budget.as_millis()),
        )
    }
}

// ============================================================================
// Completion
// ============================================================================

/// Token accounting reported by a backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt
    pub input_tokens: u32,
    /// Tokens produced in the answer
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Create a usage record
    #[must_use]
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Input plus output
    #[must_use]
    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// A successful backend answer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    /// Generated text
    pub text: String,
    /// Token usage, when the backend reports it
    pub token_usage: Option<TokenUsage>,
}

impl Completion {
    /// Create a completion without usage information
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            token_usage: None,
        }
    }

    /// Attach usage information
    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.token_usage = Some(usage);
        self
    }
}

// ============================================================================
// Adapter Trait
// ============================================================================

/// A single inference backend
///
/// Implementations must be cancel-safe: the dispatcher drops the returned
/// future when the attempt budget runs out, and that must abort the request.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Short provider name for logs (e.g. "openai")
    fn name(&self) -> &str;

    /// Send `prompt` and wait at most `timeout` for the full answer
    async fn call(&self, prompt: &str, timeout: Duration) -> Result<Completion, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(ErrorKind::Timeout.is_recoverable_soon());
        assert!(ErrorKind::TransientNetwork.is_recoverable_soon());
        assert!(ErrorKind::MalformedResponse.is_recoverable_soon());
        assert!(!ErrorKind::Auth.is_recoverable_soon());
        assert!(!ErrorKind::QuotaExceeded.is_recoverable_soon());
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::QuotaExceeded).unwrap();
        assert_eq!(json, "\"quota_exceeded\"");
        for kind in ErrorKind::ALL {
            assert_eq!(
                serde_json::to_string(&kind).unwrap(),
                format!("\"{}\"", kind.as_str())
            );
        }
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "timeout: no response within 1500ms");
    }

    #[test]
    fn test_token_usage_total_saturates() {
        assert_eq!(TokenUsage::new(10, 5).total(), 15);
        assert_eq!(TokenUsage::new(u32::MAX, 5).total(), u32::MAX);
    }
}
