//! OpenAI-compatible chat completions backend
//!
//! Works against api.openai.com and any server exposing the same
//! `/v1/chat/completions` surface (vLLM, LM Studio, llama.cpp server, ...).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::http;
use super::traits::{BackendAdapter, BackendError, Completion, ErrorKind, TokenUsage};

/// OpenAI-compatible backend client
#[derive(Clone)]
pub struct OpenAiBackend {
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: Option<u32>,
    http_client: reqwest::Client,
}

impl OpenAiBackend {
    /// Create a client for `model` at `base_url`
    ///
    /// `api_key` is optional because local compatible servers usually run
    /// without authentication.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            max_tokens: None,
            http_client: http::build_client()?,
        })
    }

    /// Cap the answer length
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn request_body(&self, prompt: &str) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "stream": false,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    /// Extract the answer from a chat completions response body
    pub(crate) fn parse_completion(body: &Value) -> Result<Completion, BackendError> {
        let text = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BackendError::new(
                    ErrorKind::MalformedResponse,
                    "response has no choices[0].message.content",
                )
            })?;

        let mut completion = Completion::new(text);
        if let (Some(input), Some(output)) = (
            http::read_u32(body, "/usage/prompt_tokens"),
            http::read_u32(body, "/usage/completion_tokens"),
        ) {
            completion = completion.with_usage(TokenUsage::new(input, output));
        }
        Ok(completion)
    }
}

#[async_trait]
impl BackendAdapter for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn call(&self, prompt: &str, timeout: Duration) -> Result<Completion, BackendError> {
        let mut request = self
            .http_client
            .post(self.completions_url())
            .json(&self.request_body(prompt));
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let body = http::send_json(request, timeout).await?;
        Self::parse_completion(&body)
    }
}
