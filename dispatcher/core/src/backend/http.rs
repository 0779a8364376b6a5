//! Shared HTTP plumbing for the provider adapters
//!
//! All three adapters speak JSON over HTTP and fail the same ways, so the
//! status and transport classification lives here once.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;

use super::traits::{BackendError, ErrorKind};

/// Body fragments that mark a 429 as an exhausted quota rather than a burst limit
const QUOTA_MARKERS: &[&str] = &[
    "insufficient_quota",
    "quota",
    "billing",
    "credit balance",
    "exceeded your current",
];

/// Longest body excerpt carried into error details
const DETAIL_LIMIT: usize = 200;

/// Build the shared HTTP client
///
/// No client-level timeout is set; every request carries the budget the
/// executor computed for that attempt.
pub(crate) fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
}

/// Map an HTTP status (and body, for 429 disambiguation) to an error kind
#[must_use]
pub fn classify_status(status: StatusCode, body: &str) -> ErrorKind {
    match status.as_u16() {
        401 | 403 => ErrorKind::Auth,
        402 => ErrorKind::QuotaExceeded,
        429 => {
            let lower = body.to_lowercase();
            if QUOTA_MARKERS.iter().any(|m| lower.contains(m)) {
                ErrorKind::QuotaExceeded
            } else {
                ErrorKind::TransientNetwork
            }
        }
        408 | 504 => ErrorKind::Timeout,
        // 529 is Anthropic's "overloaded"
        500..=599 => ErrorKind::TransientNetwork,
        _ => ErrorKind::MalformedResponse,
    }
}

/// Map a transport-level failure to a classified error
pub(crate) fn classify_transport(err: &reqwest::Error, budget: Duration) -> BackendError {
    if err.is_timeout() {
        BackendError::timeout(budget)
    } else if err.is_decode() || err.is_body() {
        BackendError::new(ErrorKind::MalformedResponse, err.to_string())
    } else {
        BackendError::new(ErrorKind::TransientNetwork, err.to_string())
    }
}

/// Send a prepared request and return the parsed JSON body of a 2xx answer
pub(crate) async fn send_json(
    request: reqwest::RequestBuilder,
    budget: Duration,
) -> Result<Value, BackendError> {
    let response = request
        .timeout(budget)
        .send()
        .await
        .map_err(|e| classify_transport(&e, budget))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| classify_transport(&e, budget))?;

    if !status.is_success() {
        let kind = classify_status(status, &body);
        return Err(BackendError::new(
            kind,
            format!("HTTP {}: {}", status.as_u16(), excerpt(&body)),
        ));
    }

    serde_json::from_str(&body).map_err(|e| {
        BackendError::new(
            ErrorKind::MalformedResponse,
            format!("invalid JSON body: {e}"),
        )
    })
}

/// Read a non-negative integer field as `u32`
pub(crate) fn read_u32(value: &Value, pointer: &str) -> Option<u32> {
    value
        .pointer(pointer)
        .and_then(Value::as_u64)
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(DETAIL_LIMIT) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
