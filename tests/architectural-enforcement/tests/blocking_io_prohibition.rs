//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Production dispatcher code MUST NOT block inside async code.
//! **Required**: `reqwest` async client, `tokio::io` for stdin/stdout,
//! `tokio::fs` when a file is read after the runtime is serving requests.
//!
//! Blocking file reads are acceptable in non-async functions, such as
//! configuration loading before the first dispatch.

use architectural_enforcement::{code_part, enclosing_fn, in_async_block, production_sources, FnKind};

/// Test that production code does not use blocking I/O in async context
#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in async production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n❌ FORBIDDEN blocking I/O:");
        eprintln!("  - std::fs::*, std::net::*, std::process::Command in async fns");
        eprintln!("  - std::io::stdin() / std::io::stdout() in async fns");
        eprintln!("  - reqwest::blocking::* anywhere");
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs, tokio::io::stdin(), tokio::io::stdout()");
        eprintln!("  - reqwest::Client (async)");
        eprintln!("\n✅ ACCEPTABLE blocking I/O:");
        eprintln!("  - Non-async functions (configuration loading)");
        eprintln!("  - Test code");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all blocking I/O calls in production code
fn find_blocking_io_violations() -> Vec<String> {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (idx, line) in file.lines.iter().enumerate() {
            let code = code_part(line);

            // Never acceptable, sync or async
            if code.contains("reqwest::blocking") {
                violations.push(format!(
                    "{}:{} - Blocking HTTP client: {}",
                    file.path.display(),
                    idx + 1,
                    line.trim()
                ));
                continue;
            }

            let Some(what) = blocking_call(code) else {
                continue;
            };
            let is_async = enclosing_fn(&file.lines, idx) == Some(FnKind::Async)
                || in_async_block(&file.lines, idx);
            if is_async {
                violations.push(format!(
                    "{}:{} - {what}: {}",
                    file.path.display(),
                    idx + 1,
                    line.trim()
                ));
            }
        }
    }

    violations
}

/// Kind of blocking call on the line, if any
fn blocking_call(code: &str) -> Option<&'static str> {
    if code.contains("std::fs::") {
        Some("Blocking file I/O")
    } else if code.contains("std::net::") {
        Some("Blocking network I/O")
    } else if code.contains("std::process::Command") {
        Some("Blocking process I/O")
    } else if code.contains("std::io::stdin()") || code.contains("std::io::stdout()") {
        Some("Blocking stdin/stdout")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| (*l).to_string()).collect()
    }

    #[test]
    fn test_blocking_io_detection() {
        let code = owned(&[
            "pub async fn bad_function() {",
            "    let contents = std::fs::read_to_string(\"file.txt\")?;",
            "}",
        ]);
        assert_eq!(enclosing_fn(&code, 1), Some(FnKind::Async));
        assert_eq!(blocking_call(&code[1]), Some("Blocking file I/O"));
    }

    #[test]
    fn test_non_async_function_detection() {
        let code = owned(&[
            "pub fn load_config() {",
            "    let contents = std::fs::read_to_string(\"config.toml\")?;",
            "}",
        ]);
        assert_eq!(enclosing_fn(&code, 1), Some(FnKind::Sync));
        assert!(!in_async_block(&code, 1));
    }

    #[test]
    fn test_async_stdio_is_fine() {
        assert_eq!(blocking_call("tokio::io::stdin().read_to_string(&mut s)"), None);
    }
}
