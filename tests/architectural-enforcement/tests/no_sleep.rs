//! Sleep Prohibition
//!
//! **Policy**: production code in the orchestration core never sleeps. Ordering,
//! persistence and idleness are awaited through channels and watches.

use architectural_enforcement::{find_sleep_calls, rust_sources, scan};

const SOURCE_DIRS: &[&str] = &["conductor/core/src"];

#[test]
fn test_no_sleep_in_production_code() {
    let violations: Vec<_> = SOURCE_DIRS
        .iter()
        .flat_map(|dir| scan(dir, find_sleep_calls))
        .collect();

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nWait on a watch, Notify or channel instead.");
        panic!("Found {} sleep violation(s)", violations.len());
    }
}

#[test]
fn test_source_tree_is_scanned() {
    let sources = rust_sources(SOURCE_DIRS[0]);
    assert!(
        sources.iter().any(|p| p.ends_with("processor/queue.rs")),
        "expected the core sources under {}",
        SOURCE_DIRS[0]
    );
}
