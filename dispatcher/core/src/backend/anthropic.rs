//! Anthropic messages backend

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::http;
use super::traits::{BackendAdapter, BackendError, Completion, ErrorKind, TokenUsage};

/// API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Messages API requires an explicit answer budget
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Anthropic backend client
#[derive(Clone)]
pub struct AnthropicBackend {
    base_url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    http_client: reqwest::Client,
}

impl AnthropicBackend {
    /// Create a client for `model`
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            http_client: http::build_client()?,
        })
    }

    /// Cap the answer length
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        })
    }

    /// Concatenate the text blocks of a messages response
    pub(crate) fn parse_completion(body: &Value) -> Result<Completion, BackendError> {
        let blocks = body
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                BackendError::new(ErrorKind::MalformedResponse, "response has no content array")
            })?;

        let text: String = blocks
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect();

        let mut completion = Completion::new(text);
        if let (Some(input), Some(output)) = (
            http::read_u32(body, "/usage/input_tokens"),
            http::read_u32(body, "/usage/output_tokens"),
        ) {
            completion = completion.with_usage(TokenUsage::new(input, output));
        }
        Ok(completion)
    }
}

#[async_trait]
impl BackendAdapter for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn call(&self, prompt: &str, timeout: Duration) -> Result<Completion, BackendError> {
        let request = self
            .http_client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(prompt));

        let body = http::send_json(request, timeout).await?;
        Self::parse_completion(&body)
    }
}
