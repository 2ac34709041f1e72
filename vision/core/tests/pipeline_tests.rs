//! Integration tests for the refresh pipeline
//!
//! These drive the scheduler, the pipeline and the mailboxes together with
//! scripted collaborators. Tests cover:
//! - Completed cycles (synthesized and chart-only)
//! - Degraded mode on fetch failure, and aborts when no cache exists
//! - Aborts on synthesis failure and on collaborator panics
//! - Single-flight while a cycle is running
//! - The per-tick staged strategy (`RefreshCycle::step`)

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::Notify;

use stockvision_core::{
    Artifact, ArtifactOrigin, Collaborators, CrossfadeEngine, CycleOutcome, CycleStage, DataSource,
    DisplayBackground, ImageSynthesizer, PricePoint, Prompt, PromptDeriver, RefreshCycle,
    RefreshError, RefreshPipeline, StockSnapshot, Synthesized, TriggerReason, UpdateScheduler,
    VisualRenderer,
};

// =============================================================================
// Scripted collaborators
// =============================================================================

#[derive(Clone, Copy, Debug)]
enum Fetch {
    Price(f64),
    Fail,
    Empty,
    Panic,
}

fn snapshot_at(price: f64) -> StockSnapshot {
    let bar = |day, close: f64| PricePoint {
        date: NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
        open: close,
        high: close,
        low: close,
        close,
        volume: 10,
    };
    StockSnapshot::from_history("TEST", "Test Corp", vec![bar(3, price - 1.0), bar(4, price)])
}

/// Plays back a script of fetch results, repeating the last one
struct ScriptedSource {
    script: Mutex<VecDeque<Fetch>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    fn new(script: &[Fetch]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.iter().copied().collect()),
            calls: AtomicUsize::new(0),
        })
    }

    fn next(&self) -> Fetch {
        let mut script = self.script.lock();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            *script.front().unwrap()
        }
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self) -> anyhow::Result<StockSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next() {
            Fetch::Price(price) => Ok(snapshot_at(price)),
            Fetch::Fail => anyhow::bail!("connection refused"),
            Fetch::Empty => Ok(StockSnapshot::from_history("TEST", "Test Corp", Vec::new())),
            Fetch::Panic => panic!("source exploded"),
        }
    }
}

/// Paints the whole visual with the snapshot price as grey level
#[derive(Default)]
struct PriceRenderer {
    seen: Mutex<Vec<f64>>,
    panic: bool,
}

impl VisualRenderer for PriceRenderer {
    fn render(&self, snapshot: &StockSnapshot) -> anyhow::Result<RgbImage> {
        assert!(!self.panic, "renderer exploded");
        self.seen.lock().push(snapshot.current_price);
        let level = snapshot.current_price.clamp(0.0, 255.0) as u8;
        Ok(RgbImage::from_pixel(8, 8, Rgb([level, level, level])))
    }
}

struct EchoPrompts;

impl PromptDeriver for EchoPrompts {
    fn derive(&self, snapshot: &StockSnapshot) -> Prompt {
        Prompt::new(format!("price {}", snapshot.current_price)).with_negative("noise")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Synth {
    Invert,
    Fail,
    Panic,
}

/// Inverts the visual, optionally waiting on a gate first
struct InvertSynth {
    behaviour: Synth,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl InvertSynth {
    fn new(behaviour: Synth) -> Arc<Self> {
        Arc::new(Self::build(behaviour, None))
    }

    fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self::build(Synth::Invert, Some(gate)))
    }

    fn build(behaviour: Synth, gate: Option<Arc<Notify>>) -> Self {
        Self {
            behaviour,
            gate,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ImageSynthesizer for InvertSynth {
    fn name(&self) -> &str {
        "invert"
    }

    async fn synthesize(&self, visual: &RgbImage, prompt: &Prompt) -> anyhow::Result<Synthesized> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        self.prompts.lock().push(prompt.text.clone());

        if let Some(gate) = &self.gate {
            gate.notified().await;
        } else {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        match self.behaviour {
            Synth::Invert => {
                let mut image = visual.clone();
                image.pixels_mut().for_each(|p| p.0 = p.0.map(|c| 255 - c));
                Ok(Synthesized { image, seed: 7 })
            }
            Synth::Fail => anyhow::bail!("out of GPU memory"),
            Synth::Panic => panic!("synthesizer exploded"),
        }
    }
}

struct Harness {
    scheduler: Arc<UpdateScheduler>,
    pipeline: Arc<RefreshPipeline>,
    source: Arc<ScriptedSource>,
    renderer: Arc<PriceRenderer>,
    synth: Arc<InvertSynth>,
}

impl Harness {
    fn new(script: &[Fetch], synth: Arc<InvertSynth>) -> Self {
        Self::with_renderer(script, synth, PriceRenderer::default())
    }

    fn with_renderer(script: &[Fetch], synth: Arc<InvertSynth>, renderer: PriceRenderer) -> Self {
        let source = ScriptedSource::new(script);
        let renderer = Arc::new(renderer);
        let collaborators = Collaborators {
            source: source.clone(),
            renderer: renderer.clone(),
            prompts: Arc::new(EchoPrompts),
            synthesizer: synth.clone(),
        };
        Self {
            scheduler: Arc::new(UpdateScheduler::new(Duration::from_secs(60))),
            pipeline: Arc::new(RefreshPipeline::new(collaborators)),
            source,
            renderer,
            synth,
        }
    }

    async fn run(&self, reason: TriggerReason) -> CycleOutcome {
        let permit = self.scheduler.acquire(reason).expect("scheduler busy");
        let report = self.pipeline.run_cycle(permit).await;
        assert!(!self.scheduler.in_flight(), "flight not released");
        report.outcome
    }
}

fn level(image: &RgbImage) -> u8 {
    image.get_pixel(0, 0).0[0]
}

// =============================================================================
// Completed cycles
// =============================================================================

#[tokio::test]
async fn test_cycle_publishes_synthesized_artifact() {
    let h = Harness::new(&[Fetch::Price(100.0)], InvertSynth::new(Synth::Invert));

    let outcome = h.run(TriggerReason::Periodic).await;

    assert_eq!(
        outcome,
        CycleOutcome::Completed {
            origin: ArtifactOrigin::Synthesized { seed: 7 },
            degraded: false,
        }
    );
    let artifact = h.pipeline.artifacts().take_if_present().unwrap();
    assert_eq!(level(artifact.image()), 155);
    assert_eq!(h.synth.prompts.lock().as_slice(), ["price 100"]);

    let snapshot = h.pipeline.snapshots().take_if_present().unwrap();
    assert!((snapshot.current_price - 100.0).abs() < f64::EPSILON);

    let stats = h.pipeline.stats();
    assert_eq!((stats.started(), stats.completed(), stats.aborted()), (1, 1, 0));
    assert_eq!(h.pipeline.current_stage(), CycleStage::Idle);
}

#[tokio::test]
async fn test_synthesis_disabled_publishes_chart() {
    let h = Harness::new(&[Fetch::Price(80.0)], InvertSynth::new(Synth::Invert));
    h.pipeline.set_synthesis_enabled(false);

    let outcome = h.run(TriggerReason::Forced).await;

    assert_eq!(
        outcome,
        CycleOutcome::Completed {
            origin: ArtifactOrigin::Chart,
            degraded: false,
        }
    );
    let artifact = h.pipeline.artifacts().take_if_present().unwrap();
    assert_eq!(level(artifact.image()), 80);
    assert_eq!(h.synth.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_toggle_applies_to_next_cycle() {
    let h = Harness::new(&[Fetch::Price(50.0)], InvertSynth::new(Synth::Invert));

    assert!(!h.pipeline.toggle_synthesis());
    h.run(TriggerReason::Forced).await;
    assert_eq!(
        h.pipeline.artifacts().take_if_present().unwrap().origin(),
        ArtifactOrigin::Chart
    );

    assert!(h.pipeline.toggle_synthesis());
    h.run(TriggerReason::Forced).await;
    assert_eq!(
        h.pipeline.artifacts().take_if_present().unwrap().origin(),
        ArtifactOrigin::Synthesized { seed: 7 }
    );
}

// =============================================================================
// Fetch failures
// =============================================================================

#[tokio::test]
async fn test_fetch_failure_falls_back_to_cached_snapshot() {
    let h = Harness::new(&[Fetch::Price(100.0), Fetch::Fail], InvertSynth::new(Synth::Invert));
    h.pipeline.set_synthesis_enabled(false);

    h.run(TriggerReason::Periodic).await;
    h.pipeline.artifacts().take_if_present().unwrap();

    let outcome = h.run(TriggerReason::Forced).await;

    assert_eq!(
        outcome,
        CycleOutcome::Completed {
            origin: ArtifactOrigin::Chart,
            degraded: true,
        }
    );
    let artifact = h.pipeline.artifacts().take_if_present().unwrap();
    assert_eq!(level(artifact.image()), 100);
    assert_eq!(h.renderer.seen.lock().as_slice(), [100.0, 100.0]);
    assert_eq!(h.pipeline.stats().degraded(), 1);
}

#[tokio::test]
async fn test_primed_cache_covers_first_failure() {
    let h = Harness::new(&[Fetch::Fail], InvertSynth::new(Synth::Invert));
    h.pipeline.prime_cache(snapshot_at(100.0));

    let outcome = h.run(TriggerReason::Periodic).await;

    assert!(outcome.is_completed());
    assert_eq!(h.renderer.seen.lock().as_slice(), [100.0]);
    assert_eq!(h.synth.prompts.lock().as_slice(), ["price 100"]);
}

#[tokio::test]
async fn test_fetch_failure_without_cache_aborts() {
    let h = Harness::new(&[Fetch::Fail], InvertSynth::new(Synth::Invert));

    let outcome = h.run(TriggerReason::Periodic).await;

    assert_eq!(
        outcome,
        CycleOutcome::Aborted {
            stage: CycleStage::FetchingData,
            cause: RefreshError::Fetch("connection refused".to_string()),
        }
    );
    assert!(!h.pipeline.artifacts().has_pending());
    assert!(!h.pipeline.snapshots().has_pending());
    assert!(h.renderer.seen.lock().is_empty());
    assert_eq!(h.pipeline.stats().aborted(), 1);
    assert_eq!(
        h.pipeline.stats().last_error().as_deref(),
        Some("data fetch failed: connection refused")
    );
    assert_eq!(h.pipeline.current_stage(), CycleStage::Aborted);
}

#[tokio::test]
async fn test_empty_snapshot_counts_as_fetch_failure() {
    let h = Harness::new(&[Fetch::Empty], InvertSynth::new(Synth::Invert));

    let outcome = h.run(TriggerReason::Periodic).await;

    assert!(matches!(
        outcome,
        CycleOutcome::Aborted {
            cause: RefreshError::Fetch(_),
            ..
        }
    ));
    assert!(h.pipeline.cached_snapshot().is_none());
}

#[tokio::test]
async fn test_source_panic_is_contained() {
    let h = Harness::new(&[Fetch::Panic], InvertSynth::new(Synth::Invert));

    let outcome = h.run(TriggerReason::Periodic).await;

    match outcome {
        CycleOutcome::Aborted {
            stage: CycleStage::FetchingData,
            cause: RefreshError::Fetch(reason),
        } => assert!(reason.contains("source exploded"), "{reason}"),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

// =============================================================================
// Synthesis failures and panics
// =============================================================================

#[tokio::test]
async fn test_synthesis_failure_publishes_nothing() {
    let h = Harness::new(&[Fetch::Price(120.0)], InvertSynth::new(Synth::Fail));
    let engine = CrossfadeEngine::from_tick_rate(30, Duration::from_secs(1));
    let mut display = DisplayBackground::new();
    let shown = Artifact::new(RgbImage::new(8, 8), ArtifactOrigin::Chart);
    engine.on_new_artifact(&mut display, shown.clone());

    let outcome = h.run(TriggerReason::Periodic).await;

    assert_eq!(
        outcome,
        CycleOutcome::Aborted {
            stage: CycleStage::SynthesizingImage,
            cause: RefreshError::Synthesis("out of GPU memory".to_string()),
        }
    );
    // The chart is not substituted
    assert!(h.pipeline.artifacts().take_if_present().is_none());
    assert!(display.current().unwrap().same_as(&shown));
    assert!(display.previous().is_none());
}

#[tokio::test]
async fn test_renderer_panic_releases_flight() {
    let renderer = PriceRenderer {
        panic: true,
        ..PriceRenderer::default()
    };
    let h = Harness::with_renderer(&[Fetch::Price(10.0)], InvertSynth::new(Synth::Invert), renderer);

    let outcome = h.run(TriggerReason::Periodic).await;

    match outcome {
        CycleOutcome::Aborted {
            stage: CycleStage::RenderingVisual,
            cause: RefreshError::Unexpected { stage, reason },
        } => {
            assert_eq!(stage, CycleStage::RenderingVisual);
            assert!(reason.contains("renderer exploded"), "{reason}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(h.scheduler.try_start(TriggerReason::Forced));
}

#[tokio::test]
async fn test_synthesizer_panic_releases_flight() {
    let h = Harness::new(&[Fetch::Price(10.0)], InvertSynth::new(Synth::Panic));

    let outcome = h.run(TriggerReason::Periodic).await;

    assert!(matches!(
        outcome,
        CycleOutcome::Aborted {
            stage: CycleStage::SynthesizingImage,
            cause: RefreshError::Unexpected { .. },
        }
    ));
    assert!(!h.pipeline.artifacts().has_pending());
}

// =============================================================================
// Single-flight with a background worker
// =============================================================================

#[tokio::test]
async fn test_forced_refresh_is_noop_while_cycle_in_flight() {
    let gate = Arc::new(Notify::new());
    let h = Harness::new(&[Fetch::Price(30.0)], InvertSynth::gated(gate.clone()));
    let mut stages = h.pipeline.subscribe_stage();

    let started = Instant::now();
    let permit = h
        .scheduler
        .acquire_at(TriggerReason::Periodic, started)
        .unwrap();
    let handle = h.pipeline.spawn(permit);

    stages
        .wait_for(|stage| *stage == CycleStage::SynthesizingImage)
        .await
        .unwrap();

    assert!(!h.scheduler.try_start(TriggerReason::Forced));
    assert!(!h.scheduler.due_periodic(started + Duration::from_secs(3600)));
    assert_eq!(h.scheduler.status().last_attempt_at, Some(started));
    assert!(!h.pipeline.artifacts().has_pending());

    gate.notify_one();
    let report = tokio_test::assert_ok!(handle.await);
    assert!(report.outcome.is_completed());
    assert_eq!(report.reason, TriggerReason::Periodic);

    // Honoured immediately after the cycle finished
    assert!(h.scheduler.try_start(TriggerReason::Forced));
}

#[tokio::test]
async fn test_ticks_never_overlap_cycles() {
    let h = Harness::new(&[Fetch::Price(60.0)], InvertSynth::new(Synth::Invert));
    h.scheduler.set_interval(Duration::ZERO);

    let mut handles = Vec::new();
    for _ in 0..200 {
        if h.scheduler.due_periodic(Instant::now()) {
            if let Some(permit) = h.scheduler.acquire(TriggerReason::Periodic) {
                handles.push(h.pipeline.spawn(permit));
            }
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(h.synth.calls.load(Ordering::SeqCst) >= 1);
    assert_eq!(h.synth.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.pipeline.stats().started(),
        h.source.calls.load(Ordering::SeqCst) as u64
    );
}

#[tokio::test]
async fn test_unread_artifact_is_superseded() {
    let h = Harness::new(&[Fetch::Price(10.0), Fetch::Price(20.0)], InvertSynth::new(Synth::Invert));
    h.pipeline.set_synthesis_enabled(false);

    h.run(TriggerReason::Periodic).await;
    h.run(TriggerReason::Forced).await;

    let artifact = h.pipeline.artifacts().take_if_present().unwrap();
    assert_eq!(level(artifact.image()), 20);
    assert_eq!(h.pipeline.artifacts().superseded(), 1);
    assert!(h.pipeline.artifacts().take_if_present().is_none());
}

// =============================================================================
// Per-tick staged strategy
// =============================================================================

#[tokio::test]
async fn test_step_advances_one_stage_per_call() {
    let h = Harness::new(&[Fetch::Price(40.0)], InvertSynth::new(Synth::Invert));
    let permit = h.scheduler.acquire(TriggerReason::Forced).unwrap();
    let mut cycle = RefreshCycle::new(&h.pipeline, permit);

    assert_eq!(cycle.stage(), CycleStage::FetchingData);
    let expected = [
        CycleStage::RenderingVisual,
        CycleStage::GeneratingPrompt,
        CycleStage::SynthesizingImage,
        CycleStage::Applying,
    ];
    for stage in expected {
        assert_eq!(cycle.step(&h.pipeline).await, stage);
        assert_eq!(h.pipeline.current_stage(), stage);
        assert!(h.scheduler.in_flight());
        assert!(!h.pipeline.artifacts().has_pending());
    }
    assert_eq!(cycle.prompt().unwrap().text, "price 40");

    assert_eq!(cycle.step(&h.pipeline).await, CycleStage::Idle);
    assert!(cycle.is_finished());
    assert!(!h.scheduler.in_flight());
    assert!(h.pipeline.artifacts().has_pending());

    // Terminal stages are absorbing
    assert_eq!(cycle.step(&h.pipeline).await, CycleStage::Idle);
    assert_eq!(h.source.calls.load(Ordering::SeqCst), 1);
    assert!(cycle.into_report().outcome.is_completed());
}

#[tokio::test]
async fn test_dropping_unfinished_cycle_releases_flight() {
    let h = Harness::new(&[Fetch::Price(40.0)], InvertSynth::new(Synth::Invert));
    let permit = h.scheduler.acquire(TriggerReason::Forced).unwrap();
    let mut cycle = RefreshCycle::new(&h.pipeline, permit);

    cycle.step(&h.pipeline).await;
    assert!(h.scheduler.in_flight());

    let report = cycle.into_report();
    assert!(!report.outcome.is_completed());
    assert!(!h.scheduler.in_flight());
}

// =============================================================================
// Debug dumps
// =============================================================================

#[tokio::test]
async fn test_debug_dir_receives_visual_and_generated_images() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new(&[Fetch::Price(90.0)]);
    let pipeline = Arc::new(
        RefreshPipeline::new(Collaborators {
            source,
            renderer: Arc::new(PriceRenderer::default()),
            prompts: Arc::new(EchoPrompts),
            synthesizer: InvertSynth::new(Synth::Invert),
        })
        .with_debug_dir(Some(dir.path().join("dumps"))),
    );
    let scheduler = Arc::new(UpdateScheduler::new(Duration::from_secs(60)));

    let report = pipeline
        .run_cycle(scheduler.acquire(TriggerReason::Forced).unwrap())
        .await;
    assert!(report.outcome.is_completed());

    let mut names: Vec<String> = std::fs::read_dir(dir.path().join("dumps"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 2);
    assert!(names.iter().any(|n| n.ends_with("_cycle1_visual.png")));
    assert!(names.iter().any(|n| n.ends_with("_cycle1_generated.png")));
}
