//! Refresh Pipeline
//!
//! The producer side of the system. A [`RefreshPipeline`] owns the
//! collaborators, the snapshot cache and the two hand-off mailboxes, and runs
//! one [`RefreshCycle`] at a time on a background task.
//!
//! # Design
//!
//! ```text
//!  UpdateScheduler ──FlightPermit──► RefreshPipeline::spawn
//!                                          │  tokio::spawn
//!                                          ▼
//!                                   RefreshCycle::run_to_completion
//!                                     fetch ─► render ─► prompt ─► synthesize
//!                                          │                │
//!                        Mailbox<Arc<StockSnapshot>>   Mailbox<Artifact>
//!                                          │                │
//!                                          └─► render loop ◄┘
//! ```
//!
//! The render loop only ever sees the mailboxes, the stage channel and the
//! counters in [`PipelineStats`]. Failures never cross that boundary as
//! errors: they end the cycle and show up as "no new artifact".

mod cycle;
mod traits;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use image::{ImageFormat, RgbImage};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use cycle::{CycleOutcome, CycleReport, CycleStage, RefreshCycle};
pub use traits::{DataSource, ImageSynthesizer, Prompt, PromptDeriver, Synthesized, VisualRenderer};

use crate::artifact::Artifact;
use crate::error::RefreshError;
use crate::mailbox::Mailbox;
use crate::scheduler::FlightPermit;
use crate::snapshot::StockSnapshot;

/// The four interchangeable collaborators a pipeline drives
#[derive(Clone)]
pub struct Collaborators {
    /// Market data
    pub source: Arc<dyn DataSource>,
    /// Control visual
    pub renderer: Arc<dyn VisualRenderer>,
    /// Prompt wording
    pub prompts: Arc<dyn PromptDeriver>,
    /// Image model
    pub synthesizer: Arc<dyn ImageSynthesizer>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("source", &self.source.name())
            .field("synthesizer", &self.synthesizer.name())
            .finish_non_exhaustive()
    }
}

/// Cycle counters
#[derive(Debug, Default)]
pub struct PipelineStats {
    started: AtomicU64,
    completed: AtomicU64,
    aborted: AtomicU64,
    degraded: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl PipelineStats {
    /// Cycles started
    #[must_use]
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Cycles that published an artifact
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Cycles that ended without publishing
    #[must_use]
    pub fn aborted(&self) -> u64 {
        self.aborted.load(Ordering::Relaxed)
    }

    /// Completed cycles that ran on the cached snapshot
    #[must_use]
    pub fn degraded(&self) -> u64 {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Text of the most recent abort cause
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub(crate) fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self, degraded: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if degraded {
            self.degraded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_aborted(&self, cause: &RefreshError) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(truncate_error(&cause.to_string()));
    }
}

/// Longest abort cause kept for display
pub const MAX_ERROR_CHARS: usize = 240;

fn truncate_error(text: &str) -> String {
    match text.char_indices().nth(MAX_ERROR_CHARS) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// Background producer of artifacts
pub struct RefreshPipeline {
    collaborators: Collaborators,
    snapshot_cache: Mutex<Option<Arc<StockSnapshot>>>,
    synthesis_enabled: AtomicBool,
    artifacts: Mailbox<Artifact>,
    snapshots: Mailbox<Arc<StockSnapshot>>,
    stage_tx: watch::Sender<CycleStage>,
    stats: PipelineStats,
    next_cycle: AtomicU64,
    debug_dir: Option<PathBuf>,
}

impl RefreshPipeline {
    /// Create a pipeline with synthesis enabled
    #[must_use]
    pub fn new(collaborators: Collaborators) -> Self {
        let (stage_tx, _) = watch::channel(CycleStage::Idle);
        Self {
            collaborators,
            snapshot_cache: Mutex::new(None),
            synthesis_enabled: AtomicBool::new(true),
            artifacts: Mailbox::new(),
            snapshots: Mailbox::new(),
            stage_tx,
            stats: PipelineStats::default(),
            next_cycle: AtomicU64::new(1),
            debug_dir: None,
        }
    }

    /// Start with synthesis on or off
    #[must_use]
    pub fn with_synthesis(self, enabled: bool) -> Self {
        self.synthesis_enabled.store(enabled, Ordering::Relaxed);
        self
    }

    /// Dump every control visual and generated image into `dir`
    #[must_use]
    pub fn with_debug_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.debug_dir = dir;
        self
    }

    /// Run one cycle on a background task
    ///
    /// The permit travels with the cycle and is released when it finishes,
    /// or when the task unwinds.
    pub fn spawn(self: &Arc<Self>, permit: FlightPermit) -> JoinHandle<CycleReport> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move { pipeline.run_cycle(permit).await })
    }

    /// Run one cycle on the caller's task
    pub async fn run_cycle(&self, permit: FlightPermit) -> CycleReport {
        RefreshCycle::new(self, permit).run_to_completion(self).await
    }

    /// Hand-off slot for finished artifacts
    #[must_use]
    pub fn artifacts(&self) -> &Mailbox<Artifact> {
        &self.artifacts
    }

    /// Hand-off slot for the snapshot each cycle worked from
    #[must_use]
    pub fn snapshots(&self) -> &Mailbox<Arc<StockSnapshot>> {
        &self.snapshots
    }

    /// Cycle counters
    #[must_use]
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Collaborators
    #[must_use]
    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Whether the next cycle will run the synthesizer
    #[must_use]
    pub fn synthesis_enabled(&self) -> bool {
        self.synthesis_enabled.load(Ordering::Relaxed)
    }

    /// Enable or disable synthesis for subsequent cycles
    pub fn set_synthesis_enabled(&self, enabled: bool) {
        self.synthesis_enabled.store(enabled, Ordering::Relaxed);
        tracing::info!(enabled, "Synthesis toggled");
    }

    /// Flip synthesis and return the new setting
    pub fn toggle_synthesis(&self) -> bool {
        let enabled = !self.synthesis_enabled.fetch_xor(true, Ordering::Relaxed);
        tracing::info!(enabled, "Synthesis toggled");
        enabled
    }

    /// Watch the stage of the running cycle
    #[must_use]
    pub fn subscribe_stage(&self) -> watch::Receiver<CycleStage> {
        self.stage_tx.subscribe()
    }

    /// Stage of the running (or last) cycle
    #[must_use]
    pub fn current_stage(&self) -> CycleStage {
        *self.stage_tx.borrow()
    }

    /// Seed the fallback cache (e.g., with a snapshot restored at start-up)
    pub fn prime_cache(&self, snapshot: StockSnapshot) {
        self.cache_snapshot(Arc::new(snapshot));
    }

    /// Most recent successfully fetched snapshot
    #[must_use]
    pub fn cached_snapshot(&self) -> Option<Arc<StockSnapshot>> {
        self.snapshot_cache.lock().clone()
    }

    fn cache_snapshot(&self, snapshot: Arc<StockSnapshot>) {
        *self.snapshot_cache.lock() = Some(snapshot);
    }

    fn next_cycle_id(&self) -> u64 {
        self.next_cycle.fetch_add(1, Ordering::Relaxed)
    }

    fn publish_stage(&self, stage: CycleStage) {
        self.stage_tx.send_replace(stage);
    }

    /// Write `image` as a PNG into the debug directory, if one is set
    ///
    /// Failures are logged and otherwise ignored.
    async fn dump_debug_image(&self, cycle: u64, label: &str, image: &RgbImage) {
        let Some(dir) = &self.debug_dir else {
            return;
        };

        let image = image.clone();
        let encoded = tokio::task::spawn_blocking(move || {
            let mut cursor = std::io::Cursor::new(Vec::new());
            image.write_to(&mut cursor, ImageFormat::Png)?;
            Ok::<_, image::ImageError>(cursor.into_inner())
        })
        .await;

        let bytes = match encoded {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, label, "Failed to encode debug image");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, label, "Debug image encoder task failed");
                return;
            }
        };

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("{timestamp}_cycle{cycle}_{label}.png"));

        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            tracing::warn!(error = %e, dir = %dir.display(), "Failed to create debug directory");
            return;
        }
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => tracing::debug!(path = %path.display(), "Saved debug image"),
            Err(e) => tracing::warn!(error = %e, path = %path.display(), "Failed to save debug image"),
        }
    }
}

impl std::fmt::Debug for RefreshPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshPipeline")
            .field("collaborators", &self.collaborators)
            .field("synthesis_enabled", &self.synthesis_enabled())
            .field("stage", &self.current_stage())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
