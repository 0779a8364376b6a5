//! Architectural Enforcement Integration Tests
//!
//! Source scanners shared by the tests in `tests/`, which enforce:
//! - No sleep() calls in production code
//! - No blocking I/O inside async functions
//!
//! Production code is everything under the scanned `src/` trees except
//! `#[cfg(test)] mod tests` blocks and test-only helper modules.

use std::fs;
use std::path::{Path, PathBuf};

/// Source trees holding production code, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["dispatcher/core/src", "dispatcher/cli/src"];

/// Files compiled only under `cfg(test)`
const TEST_ONLY_FILES: &[&str] = &["test_utils.rs"];

/// One production source file, truncated before its test module
#[derive(Debug)]
pub struct SourceFile {
    /// Path on disk
    pub path: PathBuf,
    /// Production lines, in order
    pub lines: Vec<String>,
}

/// Workspace root, derived from this crate's manifest directory
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Load every production `.rs` file under [`PRODUCTION_DIRS`]
///
/// Panics if a directory is missing so that a moved tree cannot make the
/// scan pass vacuously.
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        assert!(path.exists(), "missing source tree: {}", path.display());

        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let file_path = entry.path();
            if file_path.extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let is_test_only = file_path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| TEST_ONLY_FILES.contains(&n));
            if is_test_only {
                continue;
            }
            let Ok(content) = fs::read_to_string(file_path) else {
                continue;
            };
            files.push(SourceFile {
                path: file_path.to_path_buf(),
                lines: production_lines(&content),
            });
        }
    }

    files
}

/// Lines before the file's `#[cfg(test)] mod tests` block
pub fn production_lines(content: &str) -> Vec<String> {
    let lines: Vec<&str> = content.lines().collect();
    let end = lines
        .windows(2)
        .position(|pair| {
            pair[0].trim() == "#[cfg(test)]" && pair[1].trim_start().starts_with("mod tests")
        })
        .unwrap_or(lines.len());
    lines[..end].iter().map(|l| (*l).to_string()).collect()
}

/// Code part of a line, with any `//` comment removed
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Whether the line opens a function, and if so whether it is async
///
/// Visibility and qualifier prefixes (`pub`, `pub(crate)`, `const`,
/// `unsafe`) are accepted.
pub fn fn_signature(line: &str) -> Option<FnKind> {
    let mut rest = line.trim();
    loop {
        let stripped = ["pub(crate) ", "pub(super) ", "pub ", "const ", "unsafe "]
            .iter()
            .find_map(|prefix| rest.strip_prefix(prefix));
        match stripped {
            Some(s) => rest = s,
            None => break,
        }
    }
    if rest.starts_with("async fn ") {
        Some(FnKind::Async)
    } else if rest.starts_with("fn ") {
        Some(FnKind::Sync)
    } else {
        None
    }
}

/// Flavor of an enclosing function
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FnKind {
    /// `fn`
    Sync,
    /// `async fn`
    Async,
}

/// Nearest function signature at or above `current_idx`
pub fn enclosing_fn(lines: &[String], current_idx: usize) -> Option<FnKind> {
    for i in (0..=current_idx).rev() {
        let line = lines[i].trim();

        if let Some(kind) = fn_signature(line) {
            return Some(kind);
        }

        // Stop at module boundaries
        if line.starts_with("mod ") || (line.starts_with("impl ") && line.contains('{')) {
            return None;
        }
    }
    None
}

/// Whether `current_idx` sits inside an `async move` / `async {` block
pub fn in_async_block(lines: &[String], current_idx: usize) -> bool {
    for i in (0..=current_idx).rev() {
        let line = code_part(&lines[i]);
        if line.contains("async move") || line.contains("async {") {
            return true;
        }
        if fn_signature(line).is_some() {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| (*l).to_string()).collect()
    }

    #[test]
    fn test_fn_signature_accepts_visibility() {
        assert_eq!(fn_signature("pub fn load() {"), Some(FnKind::Sync));
        assert_eq!(fn_signature("  pub(crate) async fn send() {"), Some(FnKind::Async));
        assert_eq!(fn_signature("async fn run() {"), Some(FnKind::Async));
        assert_eq!(fn_signature("let f = 1;"), None);
    }

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let content = "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n";
        assert_eq!(production_lines(content), vec!["fn a() {}".to_string()]);
    }

    #[test]
    fn test_cfg_test_module_declaration_is_kept() {
        let content = "#[cfg(test)]\npub(crate) mod test_utils;\npub use a::B;\n";
        assert_eq!(production_lines(content).len(), 3);
    }

    #[test]
    fn test_enclosing_fn() {
        let lines = owned(&[
            "pub async fn dispatch() {",
            "    let x = 1;",
            "}",
            "fn read() {",
            "    let y = 2;",
        ]);
        assert_eq!(enclosing_fn(&lines, 1), Some(FnKind::Async));
        assert_eq!(enclosing_fn(&lines, 4), Some(FnKind::Sync));
    }

    #[test]
    fn test_async_block_detection() {
        let lines = owned(&["fn spawn() {", "    tokio::spawn(async move {", "        go();"]);
        assert!(in_async_block(&lines, 2));
        assert!(!in_async_block(&lines, 0));
    }
}
