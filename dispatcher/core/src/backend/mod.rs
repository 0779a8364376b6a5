//! Backend Adapters
//!
//! Provider-specific clients behind the [`BackendAdapter`] trait, plus the
//! declarative [`AdapterConfig`] that binds a configured backend id to one of
//! them.
//!
//! ```text
//!   [[backends]] id = "fast-a"          AdapterSet
//!   [backends.adapter] kind = ...  ──►  "fast-a" ──► Arc<dyn BackendAdapter>
//!                                       "quality-b" ──► ...
//! ```

mod anthropic;
pub mod http;
mod ollama;
mod openai;
mod traits;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use anthropic::AnthropicBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;
pub use traits::{BackendAdapter, BackendError, Completion, ErrorKind, TokenUsage};

// ============================================================================
// Adapter Configuration
// ============================================================================

fn default_openai_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_anthropic_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_anthropic_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_ollama_host() -> String {
    "localhost".to_string()
}

fn default_ollama_port() -> u16 {
    11434
}

/// How to reach a backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterConfig {
    /// OpenAI or a compatible chat completions server
    #[serde(rename = "openai")]
    OpenAi {
        /// Server root, without the `/v1/...` path
        #[serde(default = "default_openai_url")]
        base_url: String,
        /// Model name sent in the request body
        model: String,
        /// Environment variable holding the API key; `None` sends no auth
        #[serde(default)]
        api_key_env: Option<String>,
        /// Answer length cap
        #[serde(default)]
        max_tokens: Option<u32>,
    },
    /// Anthropic messages API
    Anthropic {
        /// Server root, without the `/v1/...` path
        #[serde(default = "default_anthropic_url")]
        base_url: String,
        /// Model name sent in the request body
        model: String,
        /// Environment variable holding the API key
        #[serde(default = "default_anthropic_key_env")]
        api_key_env: String,
        /// Answer length cap
        #[serde(default)]
        max_tokens: Option<u32>,
    },
    /// Local Ollama server
    Ollama {
        /// Host name
        #[serde(default = "default_ollama_host")]
        host: String,
        /// Port
        #[serde(default = "default_ollama_port")]
        port: u16,
        /// Model tag
        model: String,
    },
}

impl AdapterConfig {
    /// Provider label for display
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            AdapterConfig::OpenAi { .. } => "openai",
            AdapterConfig::Anthropic { .. } => "anthropic",
            AdapterConfig::Ollama { .. } => "ollama",
        }
    }

    /// Model name the adapter will request
    #[must_use]
    pub fn model(&self) -> &str {
        match self {
            AdapterConfig::OpenAi { model, .. }
            | AdapterConfig::Anthropic { model, .. }
            | AdapterConfig::Ollama { model, .. } => model,
        }
    }
}

/// Failure to construct an adapter at startup
#[derive(Debug, thiserror::Error)]
pub enum AdapterBuildError {
    /// The configured API key variable is unset or empty
    #[error("backend '{backend}': environment variable {var} is not set")]
    MissingApiKey {
        /// Backend id
        backend: String,
        /// Variable name
        var: String,
    },

    /// The HTTP client could not be built
    #[error("backend '{backend}': failed to build HTTP client: {source}")]
    Client {
        /// Backend id
        backend: String,
        /// Underlying error
        #[source]
        source: reqwest::Error,
    },
}

fn read_key(backend: &str, var: &str) -> Result<String, AdapterBuildError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AdapterBuildError::MissingApiKey {
            backend: backend.to_string(),
            var: var.to_string(),
        }),
    }
}

/// Construct the adapter described by `config` for backend `backend_id`
pub fn build_adapter(
    backend_id: &str,
    config: &AdapterConfig,
) -> Result<Arc<dyn BackendAdapter>, AdapterBuildError> {
    let client_err = |source| AdapterBuildError::Client {
        backend: backend_id.to_string(),
        source,
    };

    let adapter: Arc<dyn BackendAdapter> = match config {
        AdapterConfig::OpenAi {
            base_url,
            model,
            api_key_env,
            max_tokens,
        } => {
            let key = api_key_env
                .as_deref()
                .map(|var| read_key(backend_id, var))
                .transpose()?;
            let mut backend = OpenAiBackend::new(base_url, model, key).map_err(client_err)?;
            if let Some(max) = max_tokens {
                backend = backend.with_max_tokens(*max);
            }
            Arc::new(backend)
        }
        AdapterConfig::Anthropic {
            base_url,
            model,
            api_key_env,
            max_tokens,
        } => {
            let key = read_key(backend_id, api_key_env)?;
            let mut backend = AnthropicBackend::new(base_url, model, key).map_err(client_err)?;
            if let Some(max) = max_tokens {
                backend = backend.with_max_tokens(*max);
            }
            Arc::new(backend)
        }
        AdapterConfig::Ollama { host, port, model } => {
            Arc::new(OllamaBackend::new(host, *port, model).map_err(client_err)?)
        }
    };

    Ok(adapter)
}

// ============================================================================
// Adapter Set
// ============================================================================

/// Adapters keyed by backend id
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<String, Arc<dyn BackendAdapter>>,
}

impl AdapterSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `adapter` to `backend_id`, replacing any previous binding
    pub fn insert(&mut self, backend_id: impl Into<String>, adapter: Arc<dyn BackendAdapter>) {
        self.adapters.insert(backend_id.into(), adapter);
    }

    /// Builder-style [`insert`](Self::insert)
    #[must_use]
    pub fn with(mut self, backend_id: impl Into<String>, adapter: Arc<dyn BackendAdapter>) -> Self {
        self.insert(backend_id, adapter);
        self
    }

    /// Adapter bound to `backend_id`
    #[must_use]
    pub fn get(&self, backend_id: &str) -> Option<Arc<dyn BackendAdapter>> {
        self.adapters.get(backend_id).cloned()
    }

    /// Whether `backend_id` has an adapter
    #[must_use]
    pub fn contains(&self, backend_id: &str) -> bool {
        self.adapters.contains_key(backend_id)
    }

    /// Keep only the bindings whose backend id satisfies `keep`
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.adapters.retain(|id, _| keep(id));
    }

    /// Number of bound adapters
    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether no adapters are bound
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.adapters.keys().collect();
        ids.sort();
        f.debug_struct("AdapterSet").field("backends", &ids).finish()
    }
}
