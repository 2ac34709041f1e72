//! Integration Test: Render Loop Isolation
//!
//! The terminal surface may only start cycles on a background task and read
//! their results from the mailboxes. Driving a cycle inline would stall the
//! crossfade for the whole fetch and synthesis.

use architectural_enforcement::{assert_clean, find, production_lines};

#[test]
fn test_surface_never_runs_cycles_inline() {
    let lines = production_lines(&["tui/src"]);
    let violations = find(
        &lines,
        &["run_cycle(", "run_to_completion(", "RefreshCycle::new(", ".step("],
    );
    assert_clean(
        "refresh cycles driven inline by the surface (use RefreshPipeline::spawn)",
        &violations,
    );
}

#[test]
fn test_surface_never_awaits_collaborators() {
    let lines = production_lines(&["tui/src"]);
    let violations = find(&lines, &[".fetch().await", ".synthesize("]);
    assert_clean("collaborator calls from the surface", &violations);
}

#[test]
fn test_surface_spawns_cycles() {
    let lines = production_lines(&["tui/src"]);
    assert!(
        lines.iter().any(|l| l.code.contains("pipeline.spawn(")),
        "the render loop should start cycles with RefreshPipeline::spawn"
    );
}
