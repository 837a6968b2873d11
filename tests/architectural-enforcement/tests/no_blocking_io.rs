//! Blocking I/O Prohibition
//!
//! **Policy**: `async fn` bodies in the orchestration core use async I/O only.
//! Synchronous helpers (configuration loading before the runtime starts) may
//! still read files with `std::fs`.

use architectural_enforcement::{find_blocking_io, scan};

#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = scan("conductor/core/src", find_blocking_io);

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found in async code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse tokio::fs, tokio::net or move the work out of the async path.");
        panic!("Found {} blocking I/O violation(s)", violations.len());
    }
}
