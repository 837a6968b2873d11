//! Architectural Enforcement
//!
//! Source scanners used by the tests in `tests/` to keep the orchestration core
//! honest about its concurrency model:
//! - No sleeping in production code (wait on channels and watches instead)
//! - No blocking I/O inside `async fn` bodies
//!
//! The scanners are line based. Comments are ignored and everything from the
//! first `#[cfg(test)]` attribute onwards is treated as test code, matching the
//! convention that unit test modules sit at the end of each file.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Calls that put a thread or task to sleep
pub const SLEEP_PATTERNS: &[&str] = &["::sleep(", ".sleep(", "sleep_until("];

/// Blocking calls that must not appear in async code
pub const BLOCKING_PATTERNS: &[&str] = &[
    "std::fs::",
    "std::net::",
    "std::process::Command",
    "std::thread::sleep",
    "reqwest::blocking",
    ".blocking_recv(",
    ".blocking_send(",
    ".blocking_lock(",
];

/// A rule violation at a source location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the violation
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Offending source line, trimmed
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Workspace root, two levels above this crate
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// All `.rs` files below `dir` (relative to the workspace root)
pub fn rust_sources(dir: &str) -> Vec<PathBuf> {
    let root = workspace_root().join(dir);
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(&root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect();
    files.sort();
    files
}

/// Production lines of a file as `(index, code)` with comments stripped
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|(idx, line)| (idx, strip_comment(line)))
        .filter(|(_, code)| !code.trim().is_empty())
        .collect()
}

fn strip_comment(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Sleep calls in production code
pub fn find_sleep_calls(path: &Path, content: &str) -> Vec<Violation> {
    let lines: Vec<&str> = content.lines().collect();
    production_lines(content)
        .into_iter()
        .filter(|(_, code)| SLEEP_PATTERNS.iter().any(|p| code.contains(p)))
        .map(|(idx, _)| violation(path, idx, lines[idx]))
        .collect()
}

/// Blocking calls made from inside an `async fn`
pub fn find_blocking_io(path: &Path, content: &str) -> Vec<Violation> {
    let lines: Vec<&str> = content.lines().collect();
    production_lines(content)
        .into_iter()
        .filter(|(_, code)| BLOCKING_PATTERNS.iter().any(|p| code.contains(p)))
        .filter(|(idx, _)| enclosing_fn_is_async(&lines, *idx))
        .map(|(idx, _)| violation(path, idx, lines[idx]))
        .collect()
}

/// Whether the nearest function signature above `idx` is `async`
pub fn enclosing_fn_is_async(lines: &[&str], idx: usize) -> bool {
    lines[..=idx]
        .iter()
        .rev()
        .map(|line| strip_comment(line).trim())
        .find(|code| is_fn_signature(code))
        .is_some_and(|signature| signature.contains("async fn "))
}

fn is_fn_signature(code: &str) -> bool {
    let code = code
        .strip_prefix("pub(crate) ")
        .or_else(|| code.strip_prefix("pub "))
        .unwrap_or(code);
    code.starts_with("fn ") || code.starts_with("async fn ")
}

fn violation(path: &Path, idx: usize, line: &str) -> Violation {
    Violation {
        path: path.to_path_buf(),
        line: idx + 1,
        text: line.trim().to_string(),
    }
}

/// Run a scanner over every source file below `dir`
pub fn scan(dir: &str, scanner: fn(&Path, &str) -> Vec<Violation>) -> Vec<Violation> {
    rust_sources(dir)
        .iter()
        .filter_map(|path| fs::read_to_string(path).ok().map(|c| scanner(path, &c)))
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
fn load() {
    let _ = std::fs::read_to_string("config.toml");
}

async fn fetch() {
    // std::fs::read is mentioned in a comment only
    let text = std::fs::read_to_string("history.json");
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[cfg(test)]
mod tests {
    async fn helper() {
        std::thread::sleep(Duration::from_millis(1));
    }
}
"#;

    #[test]
    fn test_sleep_detected_outside_tests_only() {
        let found = find_sleep_calls(Path::new("sample.rs"), SAMPLE);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line, 9);
        assert!(found[0].text.starts_with("tokio::time::sleep"));
    }

    #[test]
    fn test_blocking_io_flagged_in_async_fn_only() {
        let found = find_blocking_io(Path::new("sample.rs"), SAMPLE);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line, 8);
    }

    #[test]
    fn test_fn_signature_detection() {
        let lines = ["pub(crate) async fn run(&self) {", "    work();", "}"];
        assert!(enclosing_fn_is_async(&lines, 1));

        let lines = ["pub fn run() {", "    work();"];
        assert!(!enclosing_fn_is_async(&lines, 1));
    }
}
