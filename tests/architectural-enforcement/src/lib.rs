//! Architectural Enforcement Integration Tests
//!
//! Source-scanning checks for the rules the runtime design depends on:
//! - The render loop never blocks (no sleeps, no `block_on`)
//! - Pipeline I/O is async (no blocking HTTP, no `std::fs` inside `async fn`)
//! - Cycles run on background tasks, never inline on the render loop
//!
//! This crate holds the shared scanner; the rules live in `tests/`.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots, relative to the workspace root
pub const PRODUCTION_ROOTS: &[&str] = &["tui/src", "vision/core/src"];

/// One line of production code
#[derive(Debug, Clone)]
pub struct SourceLine {
    pub path: PathBuf,
    pub number: usize,
    /// The line with any trailing `//` comment removed
    pub code: String,
    /// Whether the innermost enclosing `fn` is `async`
    pub in_async_fn: bool,
}

impl std::fmt::Display for SourceLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.number, self.code.trim())
    }
}

/// Workspace root (two levels above this crate)
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// All production lines under the given roots
///
/// Comment lines are skipped and each file is cut at its first
/// `#[cfg(test)]`, so test modules are exempt.
pub fn production_lines(roots: &[&str]) -> Vec<SourceLine> {
    let base = workspace_root();
    let mut lines = Vec::new();

    for root in roots {
        let dir = base.join(root);
        if !dir.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&dir)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                scan_file(entry.path(), &mut lines);
            }
        }
    }

    lines
}

fn scan_file(path: &Path, out: &mut Vec<SourceLine>) {
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };

    let mut in_async_fn = false;
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }

        let code = line.split("//").next().unwrap_or(line).to_string();
        if let Some(is_async) = fn_signature(&code) {
            in_async_fn = is_async;
        }

        out.push(SourceLine {
            path: path.to_path_buf(),
            number: idx + 1,
            code,
            in_async_fn,
        });
    }
}

/// `Some(is_async)` when the line opens a function
fn fn_signature(code: &str) -> Option<bool> {
    let trimmed = code.trim_start();
    let is_fn = trimmed.starts_with("fn ")
        || trimmed.contains(" fn ")
        || trimmed.starts_with("async fn ");
    if !is_fn || trimmed.contains("fn(") {
        return None;
    }
    Some(trimmed.contains("async fn "))
}

/// Lines whose code contains any of `patterns`
pub fn find(lines: &[SourceLine], patterns: &[&str]) -> Vec<String> {
    lines
        .iter()
        .filter(|line| patterns.iter().any(|p| line.code.contains(p)))
        .map(ToString::to_string)
        .collect()
}

/// Report violations and fail
pub fn assert_clean(rule: &str, violations: &[String]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n❌ {rule}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!("\nFound {} violation(s): {rule}", violations.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_signature() {
        assert_eq!(fn_signature("    pub async fn fetch(&self) {"), Some(true));
        assert_eq!(fn_signature("fn main() {"), Some(false));
        assert_eq!(fn_signature("    pub(crate) fn record(&self) {"), Some(false));
        assert_eq!(fn_signature("let f: fn(u8) -> u8 = id;"), None);
        assert_eq!(fn_signature("let x = 1;"), None);
    }

    #[test]
    fn test_roots_exist() {
        for root in PRODUCTION_ROOTS {
            assert!(workspace_root().join(root).exists(), "missing {root}");
        }
    }

    #[test]
    fn test_scanner_sees_production_code() {
        let lines = production_lines(PRODUCTION_ROOTS);
        assert!(lines.iter().any(|l| l.code.contains("pub struct UpdateScheduler")));
        assert!(lines.iter().any(|l| l.code.contains("pub struct App")));
        assert!(!lines.iter().any(|l| l.code.contains("mod tests {")));
    }
}
