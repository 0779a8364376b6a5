//! Dispatcher Core - Multi-Backend AI Inference Dispatch
//!
//! Routes each query to the most suitable of several interchangeable
//! inference backends, fails over when a backend errors or runs out of time,
//! and answers with a clearly labelled templated response when no backend
//! can.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Dispatcher                            │
//! │                                                               │
//! │  QueryDescriptor ──► SelectionPolicy ──► DispatchExecutor ──┐ │
//! │                         ▲       ▲              │             │ │
//! │                         │       │              ▼             │ │
//! │              BackendRegistry  HealthTracker ◄── attempts     │ │
//! │                                                 │            │ │
//! │                                  FallbackResponder (exhausted)│ │
//! │                                                               │
//! └───────────────────────────────┬──────────────────────────────┘
//!                                 │  BackendAdapter
//!            ┌────────────────────┼────────────────────┐
//!            ▼                    ▼                    ▼
//!      ┌──────────┐        ┌───────────┐        ┌──────────┐
//!      │  OpenAI  │        │ Anthropic │        │  Ollama  │
//!      └──────────┘        └───────────┘        └──────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Dispatcher`]: Entry point; owns the health tracker and composes the rest
//! - [`QueryDescriptor`]: Prompt, size estimate, complexity hint, and deadline
//! - [`DispatchResult`]: Success or fallback envelope with the attempt log
//! - [`BackendAdapter`](backend::BackendAdapter): Uniform backend contract
//!
//! # Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use dispatcher_core::{config, Dispatcher, QueryDescriptor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = config::load_config()?;
//!     let dispatcher = Dispatcher::from_config(&config)?;
//!
//!     let query = QueryDescriptor::with_timeout("Summarize RFC 9110", Duration::from_secs(20));
//!     let result = dispatcher.dispatch(query).await?;
//!     if !result.is_ai_generated() {
//!         eprintln!("no backend could answer");
//!     }
//!     println!("{}", result.content());
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: Adapter trait, error classification, provider clients
//! - [`config`]: TOML, environment, and CLI configuration layering
//! - [`query`]: Query descriptors and complexity estimation
//! - [`result`]: Dispatch result envelopes
//! - [`routing`]: Registry, health, policy, executor, fallback, metrics

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
mod dispatcher;
pub mod query;
pub mod result;
pub mod routing;

pub use backend::{BackendAdapter, BackendError, Completion, ErrorKind, TokenUsage};
pub use config::{ConfigError, ConfigOverrides, ConfigSource, DispatcherConfig};
pub use dispatcher::{BuildError, DispatchError, Dispatcher, DispatcherBuilder};
pub use query::{estimate_tokens, ComplexityHint, QueryDescriptor};
pub use result::{AttemptRecord, DispatchOutcome, DispatchResult, ExhaustionReason};
pub use routing::{
    BackendProfile, HealthConfig, HealthStatus, PolicyConfig, RankedCandidate, FALLBACK_BANNER,
};
