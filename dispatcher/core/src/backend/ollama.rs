//! Ollama Backend
//!
//! Local Ollama server reached through `/api/generate` with streaming off,
//! so one HTTP exchange carries the whole answer.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::http;
use super::traits::{BackendAdapter, BackendError, Completion, ErrorKind, TokenUsage};

/// Ollama backend client
#[derive(Clone)]
pub struct OllamaBackend {
    host: String,
    port: u16,
    model: String,
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a client for `model` on `host:port`
    pub fn new(
        host: impl Into<String>,
        port: u16,
        model: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            host: host.into(),
            port,
            model: model.into(),
            http_client: http::build_client()?,
        })
    }

    fn generate_url(&self) -> String {
        format!("http://{}:{}/api/generate", self.host, self.port)
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        })
    }

    pub(crate) fn parse_completion(body: &Value) -> Result<Completion, BackendError> {
        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(BackendError::new(ErrorKind::MalformedResponse, error));
        }

        let text = body.get("response").and_then(Value::as_str).ok_or_else(|| {
            BackendError::new(ErrorKind::MalformedResponse, "response field missing")
        })?;

        let mut completion = Completion::new(text);
        if let Some(output) = http::read_u32(body, "/eval_count") {
            let input = http::read_u32(body, "/prompt_eval_count").unwrap_or(0);
            completion = completion.with_usage(TokenUsage::new(input, output));
        }
        Ok(completion)
    }
}

#[async_trait]
impl BackendAdapter for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn call(&self, prompt: &str, timeout: Duration) -> Result<Completion, BackendError> {
        let request = self
            .http_client
            .post(self.generate_url())
            .json(&self.request_body(prompt));

        let body = http::send_json(request, timeout).await?;
        Self::parse_completion(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generate_response() {
        let body = json!({
            "model": "llama3",
            "response": "Fortify the pass.",
            "done": true,
            "prompt_eval_count": 30,
            "eval_count": 6
        });
        let completion = OllamaBackend::parse_completion(&body).unwrap();
        assert_eq!(completion.text, "Fortify the pass.");
        assert_eq!(completion.token_usage.map(|u| u.total()), Some(36));
    }

    #[test]
    fn test_parse_error_body() {
        let err = OllamaBackend::parse_completion(&json!({"error": "model not found"}))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
        assert_eq!(err.detail, "model not found");
    }

    #[test]
    fn test_generate_url() {
        let backend = OllamaBackend::new("localhost", 11434, "llama3").unwrap();
        assert_eq!(backend.generate_url(), "http://localhost:11434/api/generate");
        assert_eq!(backend.request_body("x")["stream"], false);
    }
}
