//! Dispatch Facade
//!
//! [`Dispatcher`] is the single entry point callers use. It owns the health
//! tracker for its whole lifetime and composes registry, policy, executor,
//! and fallback responder into one call:
//!
//! ```text
//! dispatch(query)
//!   |-- snapshot health
//!   |-- rank candidates (registry + snapshot)
//!   |-- execute ranking under the deadline (adapters, tracker updates)
//!   `-- success envelope, or fallback / exhausted envelope
//! ```
//!
//! `dispatch` never returns an error for backend trouble; only misuse (a
//! blank prompt, or a call after [`Dispatcher::shutdown`]) is an `Err`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::Instrument;

use crate::backend::{build_adapter, AdapterBuildError, AdapterSet};
use crate::config::DispatcherConfig;
use crate::query::QueryDescriptor;
use crate::result::DispatchResult;
use crate::routing::{
    BackendProfile, BackendRegistry, DispatchExecutor, DispatchMetrics, ExecutionOutcome,
    FallbackResponder, HealthConfig, HealthTracker, PolicyConfig, RankedCandidate, RegistryError,
    SelectionPolicy,
};

// ============================================================================
// Errors
// ============================================================================

/// Caller misuse of [`Dispatcher::dispatch`]
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The prompt is empty or whitespace
    #[error("prompt must not be empty")]
    EmptyPrompt,

    /// The dispatcher was shut down
    #[error("dispatcher has been shut down")]
    ShutDown,
}

/// Failure to assemble or reload a dispatcher
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The backend table is invalid
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A backend has no adapter bound
    #[error("backend '{0}' has no adapter")]
    MissingAdapter(String),

    /// An adapter could not be constructed
    #[error(transparent)]
    Adapter(#[from] AdapterBuildError),

    /// Policy or health settings are out of range
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`Dispatcher`]
#[derive(Debug, Default)]
pub struct DispatcherBuilder {
    profiles: Vec<BackendProfile>,
    adapters: AdapterSet,
    health: HealthConfig,
    policy: PolicyConfig,
    fallback_enabled: Option<bool>,
}

impl DispatcherBuilder {
    /// Start with defaults and no backends
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend and the adapter that reaches it
    #[must_use]
    pub fn backend(
        mut self,
        profile: BackendProfile,
        adapter: Arc<dyn crate::backend::BackendAdapter>,
    ) -> Self {
        self.adapters.insert(profile.id.clone(), adapter);
        self.profiles.push(profile);
        self
    }

    /// Health thresholds and backoff
    #[must_use]
    pub fn health_config(mut self, config: HealthConfig) -> Self {
        self.health = config;
        self
    }

    /// Scoring weights and degraded penalty
    #[must_use]
    pub fn policy_config(mut self, config: PolicyConfig) -> Self {
        self.policy = config;
        self
    }

    /// Produce the templated fallback (default) or return `Exhausted`
    #[must_use]
    pub fn fallback_enabled(mut self, enabled: bool) -> Self {
        self.fallback_enabled = Some(enabled);
        self
    }

    /// Validate everything and build
    pub fn build(self) -> Result<Dispatcher, BuildError> {
        self.policy.validate().map_err(BuildError::InvalidSettings)?;
        validate_health(&self.health)?;
        check_adapters(&self.profiles, &self.adapters)?;

        let registry = Arc::new(BackendRegistry::new(self.profiles)?);
        let tracker = Arc::new(HealthTracker::with_config(self.health));
        for profile in registry.list() {
            tracker.register(profile.id);
        }
        let metrics = Arc::new(DispatchMetrics::new());

        tracing::info!(
            backends = registry.len(),
            fallback = self.fallback_enabled.unwrap_or(true),
            "Dispatcher ready"
        );

        Ok(Dispatcher {
            policy: SelectionPolicy::new(Arc::clone(&registry), self.policy),
            executor: DispatchExecutor::new(
                Arc::clone(&registry),
                Arc::clone(&tracker),
                Arc::clone(&metrics),
            ),
            fallback: FallbackResponder::new(self.fallback_enabled.unwrap_or(true)),
            adapters: RwLock::new(Arc::new(self.adapters)),
            registry,
            tracker,
            metrics,
            running: AtomicBool::new(true),
        })
    }
}

fn validate_health(config: &HealthConfig) -> Result<(), BuildError> {
    if config.failure_threshold == 0 {
        return Err(BuildError::InvalidSettings(
            "failure_threshold must be at least 1".to_string(),
        ));
    }
    if config.backoff_base.is_zero() {
        return Err(BuildError::InvalidSettings(
            "backoff base must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn check_adapters(profiles: &[BackendProfile], adapters: &AdapterSet) -> Result<(), BuildError> {
    match profiles.iter().find(|p| !adapters.contains(&p.id)) {
        Some(profile) => Err(BuildError::MissingAdapter(profile.id.clone())),
        None => Ok(()),
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Multi-backend dispatcher
///
/// Cheap to share behind an `Arc`; every method takes `&self` and concurrent
/// dispatches only share the registry and the health tracker.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<BackendRegistry>,
    tracker: Arc<HealthTracker>,
    metrics: Arc<DispatchMetrics>,
    policy: SelectionPolicy,
    executor: DispatchExecutor,
    fallback: FallbackResponder,
    adapters: RwLock<Arc<AdapterSet>>,
    running: AtomicBool,
}

impl Dispatcher {
    /// Start assembling a dispatcher
    #[must_use]
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Build from loaded configuration, constructing every adapter
    pub fn from_config(config: &DispatcherConfig) -> Result<Self, BuildError> {
        let mut builder = DispatcherBuilder::new()
            .health_config(config.health.clone())
            .policy_config(config.policy.clone())
            .fallback_enabled(config.fallback_enabled);

        for entry in &config.backends {
            let adapter = build_adapter(&entry.profile.id, &entry.adapter)?;
            builder = builder.backend(entry.profile.clone(), adapter);
        }

        builder.build()
    }

    /// Answer `query` from the best available backend, or fall back
    pub async fn dispatch(&self, query: QueryDescriptor) -> Result<DispatchResult, DispatchError> {
        if !self.is_running() {
            self.metrics.record_rejected();
            return Err(DispatchError::ShutDown);
        }
        if query.prompt.trim().is_empty() {
            self.metrics.record_rejected();
            return Err(DispatchError::EmptyPrompt);
        }

        let span = tracing::info_span!(
            "dispatch",
            request_id = %query.request_id,
            complexity = %query.complexity_hint,
        );

        async move {
            let started = Instant::now();
            let snapshot = self.tracker.snapshot();
            let ranking = self.policy.rank(&query, &snapshot);
            let adapters = Arc::clone(&*self.adapters.read());

            let execution = self.executor.execute(&query, &ranking, &adapters).await;

            let result = match execution.outcome {
                ExecutionOutcome::Success {
                    backend_id,
                    completion,
                } => {
                    tracing::info!(
                        backend = %backend_id,
                        attempts = execution.attempts.len(),
                        "Dispatch answered"
                    );
                    DispatchResult::success(
                        query.request_id,
                        backend_id,
                        completion.text,
                        completion.token_usage,
                        execution.attempts,
                    )
                }
                ExecutionOutcome::Exhausted(reason) => self.fallback.respond(
                    query.request_id,
                    query.complexity_hint,
                    reason,
                    execution.attempts,
                    execution.skipped,
                ),
            };

            self.metrics.record_dispatch(&result, started.elapsed());
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Dry-run ranking for `query` against current health, without calling anything
    #[must_use]
    pub fn rank(&self, query: &QueryDescriptor) -> Vec<RankedCandidate> {
        self.policy
            .rank_scored_at(query, &self.tracker.snapshot(), Instant::now())
    }

    /// Replace the backend table and bind `adapters` for new or changed backends
    ///
    /// Adapters already bound are kept unless `adapters` rebinds them, and
    /// bindings for backends missing from `profiles` are released. A rejected
    /// reload leaves the dispatcher unchanged.
    pub fn reload(
        &self,
        profiles: Vec<BackendProfile>,
        adapters: AdapterSet,
    ) -> Result<(), BuildError> {
        let mut merged = (**self.adapters.read()).clone();
        for profile in &profiles {
            if let Some(adapter) = adapters.get(&profile.id) {
                merged.insert(profile.id.clone(), adapter);
            }
        }
        check_adapters(&profiles, &merged)?;

        let ids: Vec<String> = profiles.iter().map(|p| p.id.clone()).collect();
        let mut pruned = merged.clone();
        pruned.retain(|id| ids.iter().any(|kept| kept == id));

        // Bind the superset first so readers of either table find an adapter
        let previous = std::mem::replace(&mut *self.adapters.write(), Arc::new(merged));
        if let Err(e) = self.registry.reload(profiles) {
            *self.adapters.write() = previous;
            return Err(e.into());
        }
        // Backends dropped from the table lose their binding
        *self.adapters.write() = Arc::new(pruned);

        for id in ids {
            self.tracker.register(id);
        }
        Ok(())
    }

    /// Rebuild backends from freshly loaded configuration
    pub fn reload_from_config(&self, config: &DispatcherConfig) -> Result<(), BuildError> {
        let mut adapters = AdapterSet::new();
        let mut profiles = Vec::with_capacity(config.backends.len());
        for entry in &config.backends {
            adapters.insert(
                entry.profile.id.clone(),
                build_adapter(&entry.profile.id, &entry.adapter)?,
            );
            profiles.push(entry.profile.clone());
        }
        self.reload(profiles, adapters)
    }

    /// Refuse further dispatches; in-flight dispatches run to completion
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            tracing::info!("Dispatcher shut down");
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has not been called
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Backend table
    #[must_use]
    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Health tracker owned by this dispatcher
    #[must_use]
    pub fn health(&self) -> &HealthTracker {
        &self.tracker
    }

    /// Counters and latency histograms
    #[must_use]
    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    /// Whether exhaustion yields the fallback template
    #[must_use]
    pub fn fallback_enabled(&self) -> bool {
        self.fallback.is_enabled()
    }
}
