//! Plain-text tables for `check` and `rank`

use std::fmt::Write;

use dispatcher_core::config::DispatcherConfig;
use dispatcher_core::RankedCandidate;

/// Backend table with adapter bindings and a per-row status column
pub fn backend_table(config: &DispatcherConfig, statuses: &[Result<(), String>]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<16} {:>5} {:>7} {:>4} {:>9} {:>10}  {:<10} {:<24} STATUS",
        "BACKEND", "SPEED", "QUALITY", "COST", "CONTEXT", "TIMEOUT_MS", "ADAPTER", "MODEL"
    );
    for (entry, status) in config.backends.iter().zip(statuses) {
        let p = &entry.profile;
        let status = match status {
            Ok(()) => "ok".to_string(),
            Err(e) => format!("error: {e}"),
        };
        let _ = writeln!(
            out,
            "{:<16} {:>5} {:>7} {:>4} {:>9} {:>10}  {:<10} {:<24} {}",
            p.id,
            p.speed_score,
            p.quality_score,
            p.cost_score,
            p.max_context_tokens,
            p.call_timeout.as_millis(),
            entry.adapter.kind(),
            entry.adapter.model(),
            status
        );
    }
    out
}

/// Ranked candidates, best first
pub fn ranking_table(ranked: &[RankedCandidate]) -> String {
    if ranked.is_empty() {
        return "no eligible backends\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(out, "{:>4}  {:<16} {:>8}  STATUS", "RANK", "BACKEND", "SCORE");
    for (i, candidate) in ranked.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>4}  {:<16} {:>8.3}  {}",
            i + 1,
            candidate.backend_id,
            candidate.score,
            candidate.status
        );
    }
    out
}
