//! Scripted Backend Test Utilities
//!
//! A [`BackendAdapter`] that replays a script of outcomes instead of calling a
//! provider, counting calls and noticing when an in-flight call is dropped.
//!
//! # Usage
//!
//! ```ignore
//! let backend = ScriptedBackend::new("fast-a")
//!     .then(Step::Fail(ErrorKind::TransientNetwork))
//!     .then(Step::reply("ok"));
//! assert_eq!(backend.calls(), 0);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{BackendAdapter, BackendError, Completion, ErrorKind, TokenUsage};

/// One scripted call outcome
#[derive(Clone, Debug)]
pub enum Step {
    /// Answer immediately
    Reply(String),
    /// Fail immediately
    Fail(ErrorKind),
    /// Wait, then play the inner step
    After(Duration, Box<Step>),
    /// Never answer
    Hang,
}

impl Step {
    /// Immediate answer
    pub fn reply(text: &str) -> Self {
        Step::Reply(text.to_string())
    }

    /// `step` after `delay`
    pub fn after(delay: Duration, step: Step) -> Self {
        Step::After(delay, Box::new(step))
    }
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicUsize,
    cancelled: AtomicUsize,
}

/// Adapter replaying scripted outcomes, then its default step once the script runs out
#[derive(Clone)]
pub struct ScriptedBackend {
    name: String,
    script: Arc<Mutex<VecDeque<Step>>>,
    default: Step,
    counters: Arc<Counters>,
}

impl ScriptedBackend {
    /// Backend that answers "response from {name}" unless scripted otherwise
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            default: Step::Reply(format!("response from {name}")),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Backend that always plays `step`
    pub fn always(name: &str, step: Step) -> Self {
        let mut backend = Self::new(name);
        backend.default = step;
        backend
    }

    /// Append a step to the script
    #[must_use]
    pub fn then(self, step: Step) -> Self {
        self.script.lock().push_back(step);
        self
    }

    /// As a trait object
    pub fn shared(&self) -> Arc<dyn BackendAdapter> {
        Arc::new(self.clone())
    }

    /// Calls started
    pub fn calls(&self) -> usize {
        self.counters.calls.load(Ordering::SeqCst)
    }

    /// Calls dropped before they finished
    pub fn cancelled(&self) -> usize {
        self.counters.cancelled.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

struct CancelGuard {
    counters: Arc<Counters>,
    armed: bool,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.counters.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

async fn play(step: Step) -> Result<Completion, BackendError> {
    let mut step = step;
    loop {
        match step {
            Step::Reply(text) => {
                return Ok(Completion::new(text).with_usage(TokenUsage::new(4, 2)));
            }
            Step::Fail(kind) => return Err(BackendError::new(kind, "scripted failure")),
            Step::After(delay, inner) => {
                tokio::time::sleep(delay).await;
                step = *inner;
            }
            Step::Hang => return std::future::pending().await,
        }
    }
}

#[async_trait]
impl BackendAdapter for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, _prompt: &str, _timeout: Duration) -> Result<Completion, BackendError> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        let mut guard = CancelGuard {
            counters: Arc::clone(&self.counters),
            armed: true,
        };
        let result = play(self.next_step()).await;
        guard.armed = false;
        result
    }
}
