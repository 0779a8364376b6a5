//! Shared fixtures for dispatcher integration tests
//!
//! [`FakeBackend`] stands in for a provider: it plays a queue of
//! [`Behavior`]s, then repeats its fallback behavior, and counts how often it
//! was called and how often a call was dropped mid-flight.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use dispatcher_core::backend::{BackendAdapter, BackendError, Completion, ErrorKind, TokenUsage};
use dispatcher_core::{BackendProfile, Dispatcher, DispatcherBuilder};

/// What a fake backend does on one call
#[derive(Clone, Debug)]
pub enum Behavior {
    /// Answer with this text
    Answer(String),
    /// Fail with this kind
    Fail(ErrorKind),
    /// Answer after a delay
    SlowAnswer(Duration, String),
    /// Never answer
    Hang,
}

#[derive(Default)]
struct Stats {
    calls: AtomicUsize,
    dropped: AtomicUsize,
}

/// Scripted stand-in for a provider
#[derive(Clone)]
pub struct FakeBackend {
    id: String,
    queue: Arc<Mutex<VecDeque<Behavior>>>,
    otherwise: Behavior,
    stats: Arc<Stats>,
}

impl FakeBackend {
    /// Always answers "answer from {id}"
    pub fn healthy(id: &str) -> Self {
        Self::with(id, Behavior::Answer(format!("answer from {id}")))
    }

    /// Always fails with `kind`
    pub fn failing(id: &str, kind: ErrorKind) -> Self {
        Self::with(id, Behavior::Fail(kind))
    }

    /// Always behaves as `behavior`
    pub fn with(id: &str, behavior: Behavior) -> Self {
        Self {
            id: id.to_string(),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            otherwise: behavior,
            stats: Arc::new(Stats::default()),
        }
    }

    /// Play `behavior` on the next unscripted call
    pub fn then(self, behavior: Behavior) -> Self {
        self.queue.lock().push_back(behavior);
        self
    }

    /// Calls started
    pub fn calls(&self) -> usize {
        self.stats.calls.load(Ordering::SeqCst)
    }

    /// Calls dropped before completion
    pub fn dropped(&self) -> usize {
        self.stats.dropped.load(Ordering::SeqCst)
    }

    /// As a shared adapter
    pub fn adapter(&self) -> Arc<dyn BackendAdapter> {
        Arc::new(self.clone())
    }
}

struct DropWatch(Option<Arc<Stats>>);

impl Drop for DropWatch {
    fn drop(&mut self) {
        if let Some(stats) = self.0.take() {
            stats.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl BackendAdapter for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn call(&self, _prompt: &str, _timeout: Duration) -> Result<Completion, BackendError> {
        self.stats.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.otherwise.clone());

        let mut watch = DropWatch(Some(Arc::clone(&self.stats)));
        let result = match behavior {
            Behavior::Answer(text) => Ok(Completion::new(text).with_usage(TokenUsage::new(8, 3))),
            Behavior::Fail(kind) => Err(BackendError::new(kind, format!("{} failed", self.id))),
            Behavior::SlowAnswer(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(Completion::new(text))
            }
            Behavior::Hang => std::future::pending().await,
        };
        watch.0 = None;
        result
    }
}

/// Profile with a generous call timeout
pub fn profile(id: &str, speed: u8, quality: u8, cost: u8) -> BackendProfile {
    BackendProfile::new(id)
        .with_scores(speed, quality, cost)
        .with_call_timeout(Duration::from_secs(10))
}

/// Builder pre-loaded with `(profile, backend)` pairs
pub fn builder(backends: &[(BackendProfile, &FakeBackend)]) -> DispatcherBuilder {
    backends
        .iter()
        .fold(Dispatcher::builder(), |b, (profile, fake)| {
            b.backend(profile.clone(), fake.adapter())
        })
}

/// Route dispatcher logs to the test harness; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dispatcher_core=debug")),
        )
        .with_test_writer()
        .try_init();
}
