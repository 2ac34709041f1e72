//! Render loop integration tests
//!
//! Drives `App::run_frame` against a ratatui `TestBackend` with fast mock
//! collaborators, letting the background cycles run between ticks.
//!
//! Covers:
//! - Loading screen, then the first artifact on screen
//! - Forced refresh while a cycle is in flight
//! - Every spawned cycle is reaped, even when flights overlap
//! - Crossfade progression through the loop
//! - Synthesis failure keeps the current picture
//! - Control handling and output sizing

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use image::{Rgb, RgbImage};
use pretty_assertions::assert_eq;
use ratatui::backend::{Backend, TestBackend};
use ratatui::layout::Rect;
use ratatui::Terminal;
use tokio::sync::Notify;

use stockvision_core::{
    Collaborators, Control, CycleStage, DataSource, ImageSynthesizer, PricePoint, Prompt,
    PromptDeriver, StockSnapshot, Synthesized, VisionConfig, VisualRenderer,
};
use stockvision_tui::App;

// ============================================================================
// Mock collaborators
// ============================================================================

/// Price goes up by one on every fetch
struct CountingSource {
    fetches: AtomicU64,
}

#[async_trait]
impl DataSource for CountingSource {
    fn name(&self) -> &str {
        "counting"
    }

    async fn fetch(&self) -> anyhow::Result<StockSnapshot> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst);
        let close = 100.0 + n as f64;
        let bar = |day, close| PricePoint {
            date: NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1,
        };
        Ok(StockSnapshot::from_history(
            "TEST",
            "Test Corp",
            vec![bar(3, 99.0), bar(4, close)],
        ))
    }
}

struct GreyRenderer;

impl VisualRenderer for GreyRenderer {
    fn render(&self, snapshot: &StockSnapshot) -> anyhow::Result<RgbImage> {
        let level = snapshot.current_price.clamp(0.0, 255.0) as u8;
        Ok(RgbImage::from_pixel(8, 8, Rgb([level, level, level])))
    }
}

struct FixedPrompt;

impl PromptDeriver for FixedPrompt {
    fn derive(&self, _snapshot: &StockSnapshot) -> Prompt {
        Prompt::new("test scene")
    }
}

#[derive(Default)]
struct MockSynth {
    fail: AtomicBool,
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl ImageSynthesizer for MockSynth {
    fn name(&self) -> &str {
        "mock"
    }

    async fn synthesize(&self, visual: &RgbImage, _prompt: &Prompt) -> anyhow::Result<Synthesized> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("out of GPU memory");
        }
        Ok(Synthesized {
            image: visual.clone(),
            seed: 1,
        })
    }
}

fn config() -> VisionConfig {
    let mut config = VisionConfig::default();
    config.stock.symbol = "TEST".to_string();
    config.display.tick_rate_hz = 10;
    config.display.transition_duration = Duration::from_secs(1);
    config
}

fn app_with(config: VisionConfig, synth: Arc<MockSynth>) -> App {
    App::new(
        config,
        Collaborators {
            source: Arc::new(CountingSource {
                fetches: AtomicU64::new(0),
            }),
            renderer: Arc::new(GreyRenderer),
            prompts: Arc::new(FixedPrompt),
            synthesizer: synth,
        },
    )
}

fn terminal() -> Terminal<TestBackend> {
    Terminal::new(TestBackend::new(80, 20)).unwrap()
}

fn screen(terminal: &Terminal<TestBackend>) -> String {
    terminal
        .backend()
        .buffer()
        .content
        .iter()
        .map(|cell| cell.symbol())
        .collect()
}

/// Tick until `done` holds, giving the background cycle time to run
async fn pump_until<B: Backend>(
    app: &mut App,
    terminal: &mut Terminal<B>,
    what: &str,
    done: impl Fn(&App) -> bool,
) {
    for _ in 0..2000 {
        tokio_test::assert_ok!(app.run_frame(terminal, Instant::now()));
        if done(app) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("timed out waiting for {what}");
}

// ============================================================================
// Start-up
// ============================================================================

#[tokio::test]
async fn test_loading_screen_until_first_artifact() {
    let mut app = app_with(config(), Arc::new(MockSynth::default()));
    let mut terminal = terminal();

    app.run_frame(&mut terminal, Instant::now()).unwrap();

    assert!(app.scheduler().in_flight(), "first tick starts a cycle");
    assert!(!app.display().has_content());
    let text = screen(&terminal);
    assert!(text.contains("stockvision · TEST"));
    assert!(!text.contains('▀'));

    pump_until(&mut app, &mut terminal, "first artifact", |app| {
        app.display().has_content()
    })
    .await;

    let text = screen(&terminal);
    assert!(text.contains('▀'));
    assert!(text.contains("Test Corp"));
    assert!(text.contains("$100.00"));
    assert_eq!(app.cycles_completed(), 1);
    assert!(!app.display().is_transitioning(), "first artifact is shown settled");
}

// ============================================================================
// Scheduling
// ============================================================================

#[tokio::test]
async fn test_forced_refresh_while_in_flight_is_noop() {
    let gate = Arc::new(Notify::new());
    let synth = Arc::new(MockSynth {
        gate: Some(gate.clone()),
        ..MockSynth::default()
    });
    let mut app = app_with(config(), synth);
    let mut terminal = terminal();

    pump_until(&mut app, &mut terminal, "synthesis stage", |app| {
        app.pipeline().current_stage() == CycleStage::SynthesizingImage
    })
    .await;
    assert!(screen(&terminal).contains("Synthesizing image…"));

    app.handle_control(Control::ForceRefresh);
    app.run_frame(&mut terminal, Instant::now()).unwrap();

    assert_eq!(app.notice(), Some("Refresh already in progress"));
    assert_eq!(app.pipeline().stats().started(), 1);

    gate.notify_one();
    pump_until(&mut app, &mut terminal, "first cycle", |app| {
        !app.scheduler().in_flight()
    })
    .await;
    assert_eq!(app.cycles_completed(), 1);

    // Honoured once the flight is over
    app.handle_control(Control::ForceRefresh);
    app.run_frame(&mut terminal, Instant::now()).unwrap();
    assert!(app.scheduler().in_flight());
    assert_eq!(app.pipeline().stats().started(), 2);
    gate.notify_one();
}

#[tokio::test]
async fn test_overlapping_workers_are_all_reaped() {
    let gate = Arc::new(Notify::new());
    let synth = Arc::new(MockSynth {
        gate: Some(gate.clone()),
        ..MockSynth::default()
    });
    let mut app = app_with(config(), synth);
    let mut terminal = terminal();

    pump_until(&mut app, &mut terminal, "synthesis stage", |app| {
        app.pipeline().current_stage() == CycleStage::SynthesizingImage
    })
    .await;

    // The flight is released before the first task hands back its report
    app.scheduler().finish();
    app.handle_control(Control::ForceRefresh);
    app.run_frame(&mut terminal, Instant::now()).unwrap();
    assert!(app.scheduler().in_flight(), "second cycle started");
    assert_eq!(app.notice(), None);

    for _ in 0..2000 {
        gate.notify_one();
        app.run_frame(&mut terminal, Instant::now()).unwrap();
        if app.cycles_reported() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert_eq!(app.cycles_reported(), 2);
    assert_eq!(app.cycles_completed(), 2);
}

// ============================================================================
// Crossfade
// ============================================================================

#[tokio::test]
async fn test_new_artifact_crossfades_in() {
    let mut app = app_with(config(), Arc::new(MockSynth::default()));
    let mut terminal = terminal();

    pump_until(&mut app, &mut terminal, "first artifact", |app| {
        app.display().has_content()
    })
    .await;
    let first = app.display().current().unwrap().clone();

    app.handle_control(Control::ForceRefresh);
    pump_until(&mut app, &mut terminal, "second artifact", |app| {
        app.display().is_transitioning()
    })
    .await;

    assert!(app.display().previous().unwrap().same_as(&first));
    assert!(!app.display().current().unwrap().same_as(&first));

    let budget = app.engine().frames_per_transition();
    let mut frames = 0;
    while app.display().is_transitioning() {
        let before = app.display().transition_progress();
        app.run_frame(&mut terminal, Instant::now()).unwrap();
        assert!(app.display().transition_progress() >= before);
        frames += 1;
        assert!(frames <= budget, "transition did not settle in {budget} frames");
    }
    assert!(app.display().previous().is_none());
}

#[tokio::test]
async fn test_synthesis_failure_keeps_picture() {
    let synth = Arc::new(MockSynth::default());
    let mut app = app_with(config(), synth.clone());
    let mut terminal = terminal();

    pump_until(&mut app, &mut terminal, "first artifact", |app| {
        app.display().has_content()
    })
    .await;
    let shown = app.display().current().unwrap().clone();

    synth.fail.store(true, Ordering::SeqCst);
    app.handle_control(Control::ForceRefresh);
    pump_until(&mut app, &mut terminal, "aborted cycle", |app| {
        app.pipeline().stats().aborted() == 1 && !app.scheduler().in_flight()
    })
    .await;
    app.run_frame(&mut terminal, Instant::now()).unwrap();

    assert!(app.display().current().unwrap().same_as(&shown));
    assert!(!app.display().is_transitioning());
    let text = screen(&terminal);
    assert!(text.contains('▀'));
    assert!(text.contains("image synthesis failed: out of GPU memory"));
}

// ============================================================================
// Controls
// ============================================================================

#[tokio::test]
async fn test_controls() {
    let mut app = app_with(config(), Arc::new(MockSynth::default()));

    app.handle_control(Control::ToggleOverlay);
    assert!(app.overlay().details_visible());

    assert!(app.pipeline().synthesis_enabled());
    app.handle_control(Control::ToggleSynthesis);
    assert!(!app.pipeline().synthesis_enabled());
    assert!(app.notice().unwrap().contains("off"));

    assert!(app.is_running());
    app.handle_control(Control::Quit);
    assert!(!app.is_running());
}

#[tokio::test]
async fn test_notice_expires() {
    let mut app = app_with(config(), Arc::new(MockSynth::default()));
    app.handle_control(Control::ToggleSynthesis);
    assert!(app.notice().is_some());

    app.tick(Instant::now() + Duration::from_secs(60));
    assert!(app.notice().is_none());
}

#[tokio::test]
async fn test_output_size_follows_terminal() {
    let app = app_with(config(), Arc::new(MockSynth::default()));
    assert_eq!(app.output_size(Rect::new(0, 0, 40, 12)), (40, 24));

    let mut fixed = config();
    fixed.display.output_width = 64;
    let app = app_with(fixed, Arc::new(MockSynth::default()));
    assert_eq!(app.output_size(Rect::new(0, 0, 40, 12)), (64, 24));
}
