//! Dispatcher CLI - Operator Command Line for the Multi-Backend Dispatcher
//!
//! Loads the dispatcher configuration, shows how a query would be routed,
//! and sends one-off queries through the full failover path.
//!
//! # Usage
//!
//! ```bash
//! # Validate configuration and show the backend table
//! dispatcher check --config ~/.config/dispatcher/dispatcher.toml
//!
//! # Dry-run ranking (no network calls)
//! dispatcher rank --complexity complex --tokens 12000
//!
//! # Send a query; JSON envelope on stdout
//! dispatcher ask "Explain the borrow checker in two sentences"
//! echo "hello" | dispatcher ask --timeout-ms 5000
//!
//! # Verbose logging (stderr)
//! RUST_LOG=dispatcher_core=debug dispatcher ask "hi"
//! ```
//!
//! # Exit Codes
//!
//! - `0`: a backend answered
//! - `1`: configuration or usage error
//! - `2`: no backend answered; the output is a fallback or empty
//! - `130`: interrupted with Ctrl+C

mod render;

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{info, warn};

use dispatcher_core::backend::build_adapter;
use dispatcher_core::config::{self, ConfigOverrides, DispatcherConfig};
use dispatcher_core::routing::{BackendRegistry, SelectionPolicy};
use dispatcher_core::{
    estimate_tokens, ComplexityHint, DispatchResult, Dispatcher, QueryDescriptor, FALLBACK_BANNER,
};

/// Exit code when the answer did not come from a model
const EXIT_NOT_AI: u8 = 2;

/// Exit code after Ctrl+C
const EXIT_INTERRUPTED: u8 = 130;

/// Dispatcher - route queries across AI backends with health-aware failover
#[derive(Parser, Debug)]
#[command(name = "dispatcher")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(
        short = 'c',
        long,
        env = "DISPATCHER_CONFIG",
        value_name = "FILE",
        global = true
    )]
    config: Option<PathBuf>,

    /// Produce the templated fallback when every backend fails
    #[arg(long, global = true, conflicts_with = "no_fallback")]
    fallback: bool,

    /// Return an empty exhausted result instead of the fallback template
    #[arg(long, global = true)]
    no_fallback: bool,

    /// Consecutive failures before a backend is parked
    #[arg(long, global = true, value_name = "N")]
    failure_threshold: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short = 'l',
        long,
        env = "DISPATCHER_LOG_LEVEL",
        default_value = "info",
        global = true
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate configuration, then print the backend table
    Check,

    /// Show the ranking a query would get, without calling any backend
    Rank {
        /// Complexity hint (simple, moderate, complex); estimated from the prompt if omitted
        #[arg(long)]
        complexity: Option<ComplexityHint>,

        /// Prompt size in tokens; estimated from the prompt if omitted
        #[arg(long, value_name = "N")]
        tokens: Option<u32>,

        /// Prompt used for estimation
        prompt: Option<String>,
    },

    /// Dispatch a query and print the result envelope as JSON
    Ask {
        /// Complexity hint (simple, moderate, complex); estimated from the prompt if omitted
        #[arg(long)]
        complexity: Option<ComplexityHint>,

        /// Overall deadline for the request
        #[arg(long, value_name = "MS", default_value_t = 30_000)]
        timeout_ms: u64,

        /// Print the metrics snapshot to stderr afterwards
        #[arg(long)]
        metrics: bool,

        /// Prompt text; read from stdin when omitted
        prompt: Option<String>,
    },
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if self.no_fallback {
            overrides = overrides.with_fallback_enabled(false);
        } else if self.fallback {
            overrides = overrides.with_fallback_enabled(true);
        }
        if let Some(threshold) = self.failure_threshold {
            overrides = overrides.with_failure_threshold(threshold);
        }
        overrides
    }
}

/// Initialize logging on stderr so stdout stays machine-readable
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "dispatcher_cli={level},dispatcher_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file and environment, then apply CLI overrides
fn load(path: Option<PathBuf>, overrides: &ConfigOverrides) -> Result<DispatcherConfig> {
    let mut config = match path {
        Some(path) => config::load_config_from_path(Some(path.clone()))
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => config::load_config().context("Failed to load configuration")?,
    };
    overrides.apply(&mut config);
    config
        .validate()
        .context("Command-line overrides produced an invalid configuration")?;

    info!(
        source = %config.source(),
        path = ?config.config_file_path,
        backends = config.backends.len(),
        "Configuration resolved"
    );
    Ok(config)
}

fn check(config: &DispatcherConfig) -> ExitCode {
    let statuses: Vec<Result<(), String>> = config
        .backends
        .iter()
        .map(|entry| {
            build_adapter(&entry.profile.id, &entry.adapter)
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .collect();

    if config.backends.is_empty() {
        println!("no backends configured");
    } else {
        print!("{}", render::backend_table(config, &statuses));
    }
    println!(
        "fallback: {}  failure_threshold: {}  degraded_penalty: {}  source: {}",
        if config.fallback_enabled { "on" } else { "off" },
        config.health.failure_threshold,
        config.policy.degraded_penalty,
        config.source()
    );

    if statuses.iter().any(Result::is_err) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn rank(
    config: &DispatcherConfig,
    complexity: Option<ComplexityHint>,
    tokens: Option<u32>,
    prompt: Option<&str>,
) -> Result<ExitCode> {
    let profiles = config.backends.iter().map(|e| e.profile.clone());
    let registry = BackendRegistry::new(profiles).context("Invalid backend table")?;
    let policy = SelectionPolicy::new(Arc::new(registry), config.policy.clone());

    let prompt = prompt.unwrap_or_default();
    let query = QueryDescriptor::with_timeout(prompt, Duration::from_secs(1))
        .with_complexity(complexity.unwrap_or_else(|| ComplexityHint::estimate(prompt)))
        .with_estimated_tokens(tokens.unwrap_or_else(|| estimate_tokens(prompt)));

    println!(
        "complexity: {}  estimated_tokens: {}",
        query.complexity_hint, query.estimated_tokens
    );
    let ranked = policy.rank_scored_at(&query, &HashMap::new(), Instant::now());
    print!("{}", render::ranking_table(&ranked));
    Ok(ExitCode::SUCCESS)
}

async fn read_prompt(prompt: Option<String>) -> Result<String> {
    if let Some(prompt) = prompt {
        return Ok(prompt);
    }
    let mut buf = String::new();
    tokio::io::stdin()
        .read_to_string(&mut buf)
        .await
        .context("Failed to read prompt from stdin")?;
    Ok(buf)
}

async fn write_result(result: &DispatchResult) -> Result<()> {
    let mut json = serde_json::to_string_pretty(result).context("Failed to encode result")?;
    json.push('\n');
    let mut stdout = tokio::io::stdout();
    stdout.write_all(json.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

async fn ask(
    config: &DispatcherConfig,
    complexity: Option<ComplexityHint>,
    timeout_ms: u64,
    show_metrics: bool,
    prompt: Option<String>,
) -> Result<ExitCode> {
    let dispatcher = Dispatcher::from_config(config).context("Failed to build dispatcher")?;
    let prompt = read_prompt(prompt).await?;
    let hint = complexity.unwrap_or_else(|| ComplexityHint::estimate(&prompt));
    let query = QueryDescriptor::with_timeout(prompt, Duration::from_millis(timeout_ms))
        .with_complexity(hint);

    let result = tokio::select! {
        result = dispatcher.dispatch(query) => result.context("Dispatch rejected")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling dispatch");
            dispatcher.shutdown();
            return Ok(ExitCode::from(EXIT_INTERRUPTED));
        }
    };

    write_result(&result).await?;

    if show_metrics {
        let snapshot = serde_json::to_string_pretty(&dispatcher.metrics().snapshot())
            .context("Failed to encode metrics")?;
        eprintln!("{snapshot}");
    }

    if result.is_ai_generated() {
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("{FALLBACK_BANNER} (outcome: {})", result.outcome());
        Ok(ExitCode::from(EXIT_NOT_AI))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let overrides = args.overrides();
    let config = load(args.config.clone(), &overrides)?;

    match args.command {
        Command::Check => Ok(check(&config)),
        Command::Rank {
            complexity,
            tokens,
            prompt,
        } => rank(&config, complexity, tokens, prompt.as_deref()),
        Command::Ask {
            complexity,
            timeout_ms,
            metrics,
            prompt,
        } => ask(&config, complexity, timeout_ms, metrics, prompt).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_args_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_fallback_flags_map_to_overrides() {
        let args = Args::parse_from(["dispatcher", "--no-fallback", "check"]);
        assert_eq!(args.overrides().fallback_enabled, Some(false));

        let args = Args::parse_from(["dispatcher", "check", "--fallback"]);
        assert_eq!(args.overrides().fallback_enabled, Some(true));

        let args = Args::parse_from(["dispatcher", "check"]);
        assert_eq!(args.overrides().fallback_enabled, None);

        assert!(Args::try_parse_from(["dispatcher", "--fallback", "--no-fallback", "check"]).is_err());
    }

    #[test]
    fn test_ask_arguments() {
        let args = Args::parse_from([
            "dispatcher",
            "ask",
            "--complexity",
            "complex",
            "--timeout-ms",
            "500",
            "--failure-threshold",
            "5",
            "why?",
        ]);
        assert_eq!(args.overrides().failure_threshold, Some(5));
        match args.command {
            Command::Ask {
                complexity,
                timeout_ms,
                prompt,
                ..
            } => {
                assert_eq!(complexity, Some(ComplexityHint::Complex));
                assert_eq!(timeout_ms, 500);
                assert_eq!(prompt.as_deref(), Some("why?"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_bad_complexity_rejected() {
        assert!(Args::try_parse_from(["dispatcher", "rank", "--complexity", "epic"]).is_err());
    }

    #[test]
    fn test_load_applies_cli_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            b"[fallback]\nenabled = true\n\n[[backends]]\nid = \"local\"\n\n[backends.adapter]\nkind = \"ollama\"\nmodel = \"llama3.2\"\n",
        )
        .unwrap();

        let overrides = ConfigOverrides::new()
            .with_fallback_enabled(false)
            .with_failure_threshold(4);
        let config = load(Some(file.path().to_path_buf()), &overrides).unwrap();

        assert!(!config.fallback_enabled);
        assert_eq!(config.health.failure_threshold, 4);
        assert_eq!(config.backends.len(), 1);
    }

    #[test]
    fn test_load_rejects_invalid_override() {
        let file = NamedTempFile::new().unwrap();
        let overrides = ConfigOverrides::new().with_failure_threshold(0);
        assert!(load(Some(file.path().to_path_buf()), &overrides).is_err());
    }
}
