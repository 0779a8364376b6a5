//! TOML Configuration File Support
//!
//! Loads the dispatcher's tunables and backend table from
//! `~/.config/dispatcher/dispatcher.toml` (or an explicit path).
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables (`DISPATCHER_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! The default file lives at `$XDG_CONFIG_HOME/dispatcher/dispatcher.toml`.
//! A missing default file is not an error: the dispatcher starts with
//! defaults and no backends. A file named explicitly must exist.
//!
//! # Example Configuration
//!
//! ```toml
//! [health]
//! failure_threshold = 3
//! backoff_base_ms = 1000
//! backoff_cap_exponent = 6
//! auth_backoff_secs = 900
//!
//! [policy]
//! degraded_penalty = 0.5
//!
//! [policy.weights.complex]
//! quality = 0.7
//! speed = 0.2
//! cost = 0.1
//!
//! [fallback]
//! enabled = true
//!
//! [[backends]]
//! id = "fast-a"
//! speed_score = 9
//! quality_score = 4
//! cost_score = 2
//! max_context_tokens = 8192
//! call_timeout_ms = 10000
//!
//! [backends.adapter]
//! kind = "ollama"
//! model = "llama3.2"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::AdapterConfig;
use crate::routing::{BackendProfile, HealthConfig, PolicyConfig, ScoreWeights};

/// Environment variable overriding `health.failure_threshold`
pub const ENV_FAILURE_THRESHOLD: &str = "DISPATCHER_FAILURE_THRESHOLD";
/// Environment variable overriding `health.backoff_base_ms`
pub const ENV_BACKOFF_BASE_MS: &str = "DISPATCHER_BACKOFF_BASE_MS";
/// Environment variable overriding `policy.degraded_penalty`
pub const ENV_DEGRADED_PENALTY: &str = "DISPATCHER_DEGRADED_PENALTY";
/// Environment variable overriding `fallback.enabled`
pub const ENV_FALLBACK_ENABLED: &str = "DISPATCHER_FALLBACK_ENABLED";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the highest-priority value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[health]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthToml {
    /// Consecutive failures before a backend is parked
    pub failure_threshold: Option<u32>,

    /// Backoff unit in milliseconds
    pub backoff_base_ms: Option<u64>,

    /// Largest backoff exponent
    pub backoff_cap_exponent: Option<u32>,

    /// Window after an auth or quota failure, in seconds
    pub auth_backoff_secs: Option<u64>,
}

/// One weight triple; unset fields keep the default
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightsToml {
    /// Weight on quality
    pub quality: Option<f64>,
    /// Weight on speed
    pub speed: Option<f64>,
    /// Weight on cost
    pub cost: Option<f64>,
}

impl WeightsToml {
    fn apply(&self, weights: &mut ScoreWeights) {
        if let Some(quality) = self.quality {
            weights.quality = quality;
        }
        if let Some(speed) = self.speed {
            weights.speed = speed;
        }
        if let Some(cost) = self.cost {
            weights.cost = cost;
        }
    }
}

/// `[policy.weights]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightTableToml {
    /// Weights for simple queries
    pub simple: Option<WeightsToml>,
    /// Weights for moderate queries
    pub moderate: Option<WeightsToml>,
    /// Weights for complex queries
    pub complex: Option<WeightsToml>,
}

/// `[policy]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyToml {
    /// Factor demoting degraded backends
    pub degraded_penalty: Option<f64>,

    /// Weights per complexity hint
    pub weights: Option<WeightTableToml>,
}

/// `[fallback]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackToml {
    /// Produce the templated fallback when every backend fails
    pub enabled: Option<bool>,
}

/// One `[[backends]]` entry
///
/// `id` and `adapter` are required; omitted scores take the profile defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendToml {
    /// Unique backend name
    pub id: String,

    /// Speed rank, 1 to 10
    #[serde(default)]
    pub speed_score: Option<u8>,

    /// Quality rank, 1 to 10
    #[serde(default)]
    pub quality_score: Option<u8>,

    /// Cost rank, 1 to 10
    #[serde(default)]
    pub cost_score: Option<u8>,

    /// Context ceiling in tokens
    #[serde(default)]
    pub max_context_tokens: Option<u32>,

    /// Per-call timeout in milliseconds
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,

    /// How to reach the backend
    pub adapter: AdapterConfig,
}

impl BackendToml {
    fn into_entry(self) -> BackendEntry {
        let mut profile = BackendProfile::new(self.id);
        if let Some(speed) = self.speed_score {
            profile.speed_score = speed;
        }
        if let Some(quality) = self.quality_score {
            profile.quality_score = quality;
        }
        if let Some(cost) = self.cost_score {
            profile.cost_score = cost;
        }
        if let Some(tokens) = self.max_context_tokens {
            profile.max_context_tokens = tokens;
        }
        if let Some(ms) = self.call_timeout_ms {
            profile.call_timeout = Duration::from_millis(ms);
        }
        BackendEntry {
            profile,
            adapter: self.adapter,
        }
    }
}

/// Root of the TOML file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherToml {
    /// `[health]`
    pub health: Option<HealthToml>,
    /// `[policy]`
    pub policy: Option<PolicyToml>,
    /// `[fallback]`
    pub fallback: Option<FallbackToml>,
    /// `[[backends]]`
    pub backends: Vec<BackendToml>,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// A backend profile paired with its adapter settings
#[derive(Clone, Debug, PartialEq)]
pub struct BackendEntry {
    /// Routing profile
    pub profile: BackendProfile,
    /// Adapter construction settings
    pub adapter: AdapterConfig,
}

/// Fully resolved dispatcher configuration
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Health thresholds and backoff
    pub health: HealthConfig,

    /// Scoring weights and degraded penalty
    pub policy: PolicyConfig,

    /// Whether exhaustion yields the templated fallback
    pub fallback_enabled: bool,

    /// Backends in file order
    pub backends: Vec<BackendEntry>,

    /// File the configuration was read from, if any
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            health: HealthConfig::default(),
            policy: PolicyConfig::default(),
            fallback_enabled: true,
            backends: Vec::new(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl DispatcherConfig {
    /// Highest-priority layer that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check every setting, naming the first offending one
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.health.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "health.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.health.backoff_base.is_zero() {
            return Err(ConfigError::ValidationError(
                "health.backoff_base_ms must be greater than zero".to_string(),
            ));
        }
        self.policy
            .validate()
            .map_err(ConfigError::ValidationError)?;

        let mut seen = HashSet::new();
        for entry in &self.backends {
            entry
                .profile
                .validate()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
            if !seen.insert(entry.profile.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate backend id '{}'",
                    entry.profile.id
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Default configuration file location
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("dispatcher").join("dispatcher.toml"))
}

/// Load from the default location, tolerating its absence, then apply the environment
pub fn load_config() -> Result<DispatcherConfig, ConfigError> {
    let path = default_config_path().filter(|p| p.exists());
    load_config_from_path(path)
}

/// Load from `path` (which must exist) or from defaults, then apply the environment
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<DispatcherConfig, ConfigError> {
    let mut config = DispatcherConfig::default();

    if let Some(path) = path {
        let toml_config = read_toml(&path)?;
        apply_toml_config(&mut config, toml_config);
        config.config_file_path = Some(path);
    }

    apply_env_config(&mut config)?;
    config.validate()?;

    tracing::debug!(
        path = ?config.config_file_path,
        source = %config.source,
        backends = config.backends.len(),
        "Configuration loaded"
    );
    Ok(config)
}

/// Parse TOML text
pub fn parse_config(content: &str) -> Result<DispatcherToml, ConfigError> {
    Ok(toml::from_str(content)?)
}

fn read_toml(path: &Path) -> Result<DispatcherToml, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Apply TOML file values over `config`
pub fn apply_toml_config(config: &mut DispatcherConfig, toml_config: DispatcherToml) {
    config.source = ConfigSource::File;

    if let Some(health) = toml_config.health {
        if let Some(threshold) = health.failure_threshold {
            config.health.failure_threshold = threshold;
        }
        if let Some(ms) = health.backoff_base_ms {
            config.health.backoff_base = Duration::from_millis(ms);
        }
        if let Some(cap) = health.backoff_cap_exponent {
            config.health.backoff_cap_exponent = cap;
        }
        if let Some(secs) = health.auth_backoff_secs {
            config.health.auth_backoff = Duration::from_secs(secs);
        }
    }

    if let Some(policy) = toml_config.policy {
        if let Some(penalty) = policy.degraded_penalty {
            config.policy.degraded_penalty = penalty;
        }
        if let Some(weights) = policy.weights {
            let table = &mut config.policy.weights;
            if let Some(ref simple) = weights.simple {
                simple.apply(&mut table.simple);
            }
            if let Some(ref moderate) = weights.moderate {
                moderate.apply(&mut table.moderate);
            }
            if let Some(ref complex) = weights.complex {
                complex.apply(&mut table.complex);
            }
        }
    }

    if let Some(enabled) = toml_config.fallback.and_then(|f| f.enabled) {
        config.fallback_enabled = enabled;
    }

    config.backends = toml_config
        .backends
        .into_iter()
        .map(BackendToml::into_entry)
        .collect();
}

/// Apply `DISPATCHER_*` environment variables over `config`
pub fn apply_env_config(config: &mut DispatcherConfig) -> Result<(), ConfigError> {
    apply_env_with(config, |name| std::env::var(name).ok())
}

/// Apply environment overrides read through `lookup`
///
/// A variable that is set but does not parse is an error rather than
/// silently ignored.
pub fn apply_env_with<F>(config: &mut DispatcherConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(threshold) = parse_env::<u32, _>(&lookup, ENV_FAILURE_THRESHOLD)? {
        config.health.failure_threshold = threshold;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parse_env::<u64, _>(&lookup, ENV_BACKOFF_BASE_MS)? {
        config.health.backoff_base = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(penalty) = parse_env::<f64, _>(&lookup, ENV_DEGRADED_PENALTY)? {
        config.policy.degraded_penalty = penalty;
        config.source = ConfigSource::Env;
    }
    if let Some(raw) = lookup(ENV_FALLBACK_ENABLED) {
        config.fallback_enabled = parse_bool(&raw).ok_or_else(|| {
            ConfigError::ValidationError(format!("{ENV_FALLBACK_ENABLED}: cannot parse '{raw}'"))
        })?;
        config.source = ConfigSource::Env;
    }
    Ok(())
}

fn parse_env<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            ConfigError::ValidationError(format!("{name}: cannot parse '{raw}'"))
        }),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Failure threshold override
    pub failure_threshold: Option<u32>,

    /// Fallback toggle override
    pub fallback_enabled: Option<bool>,

    /// Degraded penalty override
    pub degraded_penalty: Option<f64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set failure threshold override
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Set fallback toggle override
    #[must_use]
    pub fn with_fallback_enabled(mut self, enabled: bool) -> Self {
        self.fallback_enabled = Some(enabled);
        self
    }

    /// Set degraded penalty override
    #[must_use]
    pub fn with_degraded_penalty(mut self, penalty: f64) -> Self {
        self.degraded_penalty = Some(penalty);
        self
    }

    /// Apply overrides; re-run [`DispatcherConfig::validate`] afterwards
    pub fn apply(&self, config: &mut DispatcherConfig) {
        if self.failure_threshold.is_some()
            || self.fallback_enabled.is_some()
            || self.degraded_penalty.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(threshold) = self.failure_threshold {
            config.health.failure_threshold = threshold;
        }
        if let Some(enabled) = self.fallback_enabled {
            config.fallback_enabled = enabled;
        }
        if let Some(penalty) = self.degraded_penalty {
            config.policy.degraded_penalty = penalty;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
