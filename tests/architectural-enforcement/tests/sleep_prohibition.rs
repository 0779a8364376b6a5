//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production dispatcher code MUST NOT call sleep methods.
//! Waiting on a backend is done with `tokio::time::timeout` around the call
//! itself, and backoff is expressed as a `retry_after` instant checked at
//! ranking time, never as a sleep.
//!
//! **Exceptions**: test code (`#[cfg(test)] mod tests`, `test_utils.rs`)

use architectural_enforcement::{code_part, production_sources};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n✅ INSTEAD:");
        eprintln!("  - tokio::time::timeout around the awaited call");
        eprintln!("  - a retry_after instant compared against Instant::now()");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep as poor man's synchronization");
        eprintln!("  - Sleep between failover attempts");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all sleep() calls in production code
fn find_sleep_violations() -> Vec<String> {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (idx, line) in file.lines.iter().enumerate() {
            if is_sleep_call(code_part(line)) {
                violations.push(format!(
                    "{}:{} - {}",
                    file.path.display(),
                    idx + 1,
                    line.trim()
                ));
            }
        }
    }

    violations
}

fn is_sleep_call(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until(")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_violation_detection() {
        assert!(is_sleep_call("    tokio::time::sleep(Duration::from_millis(10)).await;"));
        assert!(is_sleep_call("    std::thread::sleep(delay);"));
        assert!(is_sleep_call("    tokio::time::sleep_until(deadline).await;"));
        assert!(!is_sleep_call("    tokio::time::timeout(budget, call).await"));
    }

    #[test]
    fn test_commented_sleep_ignored() {
        assert!(!is_sleep_call(code_part("let x = 1; // tokio::time::sleep(d)")));
    }
}
