//! Main Application
//!
//! The App is the render loop: the consumer side of the refresh core. It owns
//! the [`DisplayBackground`] and talks to the background pipeline only through
//! the scheduler and the two mailboxes.
//!
//! # Tick
//!
//! ```text
//!  input ──► Control ──► handle_control        (between ticks)
//!                             │
//!  interval.tick() ──► schedule ──► adopt ──► frame ──► draw
//!                        │           │          │
//!                 UpdateScheduler  Mailboxes  CrossfadeEngine
//!                        │
//!                 RefreshPipeline::spawn (background task)
//! ```
//!
//! Nothing on this path awaits the pipeline. A hung collaborator only delays
//! the next cycle; the picture keeps crossfading and the keys keep working.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::event::{Event, EventStream};
use futures::{FutureExt, StreamExt};
use ratatui::backend::Backend;
use ratatui::layout::Rect;
use ratatui::style::Style;
use ratatui::{Frame, Terminal};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use stockvision_core::{
    Collaborators, Control, CrossfadeEngine, CycleOutcome, CycleReport, DisplayBackground,
    RefreshPipeline, TriggerReason, UpdateScheduler, VisionConfig,
};

use crate::input;
use crate::overlay::{OverlayStatus, StockOverlay};
use crate::theme;
use crate::widgets::Picture;

/// How long a notice stays on the status line
const NOTICE_DURATION: Duration = Duration::from_secs(4);

struct Notice {
    text: String,
    until: Instant,
}

/// Main application state
pub struct App {
    // === Core State ===
    /// Is the app still running?
    running: bool,
    /// Resolved configuration
    config: VisionConfig,

    // === Refresh Core ===
    scheduler: Arc<UpdateScheduler>,
    pipeline: Arc<RefreshPipeline>,
    /// Background cycles spawned and not yet reaped
    ///
    /// A cycle releases its flight just before it returns its report, so a
    /// new cycle can start while the previous handle is still unfinished.
    workers: Vec<JoinHandle<CycleReport>>,
    /// Cycle reports collected from finished workers
    reports: u64,
    /// A forced refresh was requested since the last tick
    forced_pending: bool,

    // === Display ===
    engine: CrossfadeEngine,
    display: DisplayBackground,
    overlay: StockOverlay,
    notice: Option<Notice>,

    // === Misc State ===
    /// Ticks rendered so far
    frames: u64,
}

impl App {
    /// Create the app and its refresh core
    ///
    /// Must be called inside a tokio runtime; cycles are spawned onto it.
    pub fn new(config: VisionConfig, collaborators: Collaborators) -> Self {
        let scheduler = Arc::new(UpdateScheduler::new(config.refresh.interval));
        let pipeline = Arc::new(
            RefreshPipeline::new(collaborators)
                .with_synthesis(config.refresh.synthesis_enabled)
                .with_debug_dir(config.refresh.debug_dir.clone()),
        );
        let engine = CrossfadeEngine::from_tick_rate(
            config.display.tick_rate_hz,
            config.display.transition_duration,
        )
        .with_carryover(config.display.transition_carryover);

        tracing::info!(
            symbol = %config.stock.symbol,
            tick_rate_hz = config.display.tick_rate_hz,
            interval_secs = config.refresh.interval.as_secs(),
            synthesis = config.refresh.synthesis_enabled,
            frames_per_transition = engine.frames_per_transition(),
            "App created"
        );

        Self {
            running: true,
            config,
            scheduler,
            pipeline,
            workers: Vec::new(),
            reports: 0,
            forced_pending: false,
            engine,
            display: DisplayBackground::new(),
            overlay: StockOverlay::new(),
            notice: None,
            frames: 0,
        }
    }

    /// Main event loop
    pub async fn run<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> anyhow::Result<()> {
        let mut events = EventStream::new();
        let mut ticker = tokio::time::interval(self.config.display.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while self.running {
            tokio::select! {
                biased;

                maybe_event = events.next() => match maybe_event {
                    Some(Ok(Event::Key(key))) => {
                        if let Some(control) = input::control_for(key) {
                            self.handle_control(control);
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => tracing::warn!(error = %e, "Terminal event error"),
                    None => {
                        tracing::info!("Terminal event stream closed");
                        self.running = false;
                    }
                },

                _ = ticker.tick() => {
                    self.run_frame(terminal, Instant::now())?;
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// One tick: schedule, adopt, then draw the frame
    pub fn run_frame<B: Backend>(&mut self, terminal: &mut Terminal<B>, now: Instant) -> anyhow::Result<()> {
        self.tick(now);
        terminal.draw(|frame| self.render(frame))?;
        self.frames += 1;
        Ok(())
    }

    /// Apply a control signal
    pub fn handle_control(&mut self, control: Control) {
        tracing::debug!(%control, "Control received");
        match control {
            Control::Quit => self.running = false,
            Control::ForceRefresh => self.forced_pending = true,
            Control::ToggleOverlay => {
                self.overlay.toggle_debug();
            }
            Control::ToggleSynthesis => {
                let enabled = self.pipeline.toggle_synthesis();
                let text = if enabled {
                    "Image synthesis on (from the next refresh)"
                } else {
                    "Image synthesis off (from the next refresh)"
                };
                self.show_notice(text, Instant::now());
            }
        }
    }

    /// Non-drawing part of a tick
    pub fn tick(&mut self, now: Instant) {
        self.reap_workers();
        self.schedule(now);
        self.adopt();

        if self.notice.as_ref().is_some_and(|n| now >= n.until) {
            self.notice = None;
        }
    }

    fn schedule(&mut self, now: Instant) {
        if std::mem::take(&mut self.forced_pending) && !self.start_cycle(TriggerReason::Forced, now) {
            self.show_notice("Refresh already in progress", now);
        }
        if self.scheduler.due_periodic(now) {
            self.start_cycle(TriggerReason::Periodic, now);
        }
    }

    fn start_cycle(&mut self, reason: TriggerReason, now: Instant) -> bool {
        let Some(permit) = self.scheduler.acquire_at(reason, now) else {
            return false;
        };
        self.workers.push(self.pipeline.spawn(permit));
        true
    }

    /// Collect the reports of finished background cycles, oldest first
    fn reap_workers(&mut self) {
        let (finished, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.workers)
            .into_iter()
            .partition(JoinHandle::is_finished);
        self.workers = pending;

        for handle in finished {
            match handle.now_or_never() {
                Some(Ok(report)) => {
                    self.reports += 1;
                    self.on_report(&report);
                }
                Some(Err(e)) => tracing::error!(error = %e, "Refresh task failed"),
                None => {}
            }
        }
    }

    fn on_report(&mut self, report: &CycleReport) {
        match &report.outcome {
            CycleOutcome::Completed { origin, degraded } => {
                tracing::info!(
                    cycle = report.id,
                    %origin,
                    degraded,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Cycle report"
                );
                if *degraded {
                    self.show_notice("Market data unavailable, showing cached data", Instant::now());
                }
            }
            CycleOutcome::Aborted { stage, cause } => {
                tracing::info!(cycle = report.id, %stage, error = %cause, "Cycle report");
            }
        }
    }

    /// Drain both mailboxes
    fn adopt(&mut self) {
        if let Some(snapshot) = self.pipeline.snapshots().take_if_present() {
            self.overlay.update(snapshot);
        }
        if let Some(artifact) = self.pipeline.artifacts().take_if_present() {
            self.engine.on_new_artifact(&mut self.display, artifact);
        }
    }

    /// Pixel size of the frame for a terminal area
    ///
    /// A configured size of 0 follows the terminal: one pixel per column and
    /// two per row (half blocks).
    #[must_use]
    pub fn output_size(&self, area: Rect) -> (u32, u32) {
        let width = match self.config.display.output_width {
            0 => u32::from(area.width),
            w => w,
        };
        let height = match self.config.display.output_height {
            0 => u32::from(area.height) * 2,
            h => h,
        };
        (width, height)
    }

    fn render(&mut self, frame: &mut Frame) {
        let area = frame.area();
        let status = self.overlay_status(Instant::now());
        let (width, height) = self.output_size(area);

        let buf = frame.buffer_mut();
        buf.set_style(area, Style::default().bg(theme::rgb(self.config.display.background_color)));

        match self.engine.frame(&mut self.display, width, height) {
            Some(image) => {
                frame.render_widget(Picture::new(image), area);
                self.overlay.draw(frame.buffer_mut(), area, &status);
            }
            None => {
                self.overlay
                    .draw_loading(frame.buffer_mut(), area, &self.config.stock.symbol, &status);
                self.overlay.draw(frame.buffer_mut(), area, &status);
            }
        }
    }

    /// Gather what the overlay reports this tick
    #[must_use]
    pub fn overlay_status(&self, now: Instant) -> OverlayStatus {
        let stats = self.pipeline.stats();
        OverlayStatus {
            stage: self.pipeline.current_stage(),
            synthesis_enabled: self.pipeline.synthesis_enabled(),
            notice: self.notice.as_ref().map(|n| n.text.clone()),
            last_error: stats.last_error(),
            cycles_completed: stats.completed(),
            cycles_aborted: stats.aborted(),
            next_refresh_in: self.scheduler.time_until_due(now),
            showing: self.display.current().map(|a| a.origin().to_string()),
        }
    }

    fn show_notice(&mut self, text: &str, now: Instant) {
        tracing::debug!(notice = text, "Notice");
        self.notice = Some(Notice {
            text: text.to_string(),
            until: now + NOTICE_DURATION,
        });
    }

    fn shutdown(&mut self) {
        if self.workers.drain(..).any(|handle| !handle.is_finished()) {
            tracing::info!(stage = %self.pipeline.current_stage(), "Leaving with a cycle in flight");
        }
        tracing::info!(frames = self.frames, "Render loop stopped");
    }

    // === Accessors ===

    /// Is the app still running?
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn scheduler(&self) -> &Arc<UpdateScheduler> {
        &self.scheduler
    }

    pub fn pipeline(&self) -> &Arc<RefreshPipeline> {
        &self.pipeline
    }

    pub fn engine(&self) -> &CrossfadeEngine {
        &self.engine
    }

    pub fn display(&self) -> &DisplayBackground {
        &self.display
    }

    pub fn overlay(&self) -> &StockOverlay {
        &self.overlay
    }

    /// Current notice text, if any
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_ref().map(|n| n.text.as_str())
    }

    /// Ticks rendered so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Cycle reports collected by the loop
    pub fn cycles_reported(&self) -> u64 {
        self.reports
    }

    /// Cycles completed, as counted by the pipeline
    pub fn cycles_completed(&self) -> u64 {
        self.pipeline.stats().completed()
    }
}
