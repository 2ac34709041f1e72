//! Integration Test: Blocking Call Prohibition
//!
//! The render loop ticks at a fixed rate and the pipeline shares the same
//! runtime, so production code must never park a runtime thread.
//!
//! **Forbidden**: thread sleeps, `block_on`, `reqwest::blocking`, raw OS
//! threads (blocking work goes through `tokio::task::spawn_blocking`).
//!
//! Test code is exempt.

use architectural_enforcement::{assert_clean, find, production_lines, PRODUCTION_ROOTS};

#[test]
fn test_no_sleep_in_production_code() {
    let lines = production_lines(PRODUCTION_ROOTS);
    let violations = find(&lines, &["std::thread::sleep", "thread::sleep("]);
    assert_clean(
        "thread sleeps in production code (use tokio::time::interval or sleep().await)",
        &violations,
    );
}

#[test]
fn test_no_block_on_in_production_code() {
    let lines = production_lines(PRODUCTION_ROOTS);
    let violations = find(&lines, &["block_on(", "futures::executor"]);
    assert_clean("blocking on futures in production code", &violations);
}

#[test]
fn test_no_blocking_http_client() {
    let lines = production_lines(PRODUCTION_ROOTS);
    let violations = find(&lines, &["reqwest::blocking"]);
    assert_clean("blocking HTTP client in production code", &violations);
}

#[test]
fn test_no_raw_os_threads() {
    let lines = production_lines(PRODUCTION_ROOTS);
    let violations = find(&lines, &["std::thread::spawn", "thread::Builder"]);
    assert_clean(
        "raw OS threads in production code (use tokio::spawn or spawn_blocking)",
        &violations,
    );
}

#[test]
fn test_no_blocking_fs_inside_async_fn() {
    let lines = production_lines(PRODUCTION_ROOTS);
    let violations: Vec<String> = lines
        .iter()
        .filter(|line| line.in_async_fn && line.code.contains("std::fs::"))
        .map(ToString::to_string)
        .collect();
    assert_clean("std::fs inside async fn (use tokio::fs)", &violations);
}
