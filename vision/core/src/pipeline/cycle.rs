//! Refresh Cycle State Machine
//!
//! One [`RefreshCycle`] is one run of the pipeline, from the moment the
//! scheduler authorises it until it reaches a terminal stage.
//!
//! ```text
//!   FetchingData ──► RenderingVisual ──┬─► GeneratingPrompt ──► SynthesizingImage ──┐
//!        │                 │           │          │                    │             │
//!        │                 │           └──────────┼────────────────────┼──► Applying ┴─► Idle
//!        ▼                 ▼                      ▼                    ▼
//!     Aborted ◄────────────┴──────────────────────┴────────────────────┘
//! ```
//!
//! `Idle` and `Aborted` are terminal. Reaching either drops the cycle's
//! [`FlightPermit`], which releases the scheduler's flight exactly once.
//! Nothing is retried, and nothing is published unless `Applying` is
//! reached.

use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbImage;
use tokio::task::JoinError;

use super::traits::Prompt;
use super::RefreshPipeline;
use crate::artifact::{Artifact, ArtifactOrigin};
use crate::error::RefreshError;
use crate::scheduler::{FlightPermit, TriggerReason};
use crate::snapshot::StockSnapshot;

/// Stage of a refresh cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CycleStage {
    /// No cycle running (also the terminal stage of a completed cycle)
    #[default]
    Idle,
    /// Waiting on the data source
    FetchingData,
    /// Rasterising the control visual
    RenderingVisual,
    /// Building the synthesis prompt
    GeneratingPrompt,
    /// Waiting on the image synthesizer
    SynthesizingImage,
    /// Publishing the artifact
    Applying,
    /// Terminal failure
    Aborted,
}

impl CycleStage {
    /// Lower-case description (used in logs and error messages)
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::FetchingData => "fetching data",
            Self::RenderingVisual => "rendering visual",
            Self::GeneratingPrompt => "generating prompt",
            Self::SynthesizingImage => "synthesizing image",
            Self::Applying => "applying",
            Self::Aborted => "aborted",
        }
    }

    /// Whether the stage ends a cycle
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Idle | Self::Aborted)
    }

    /// Whether a cycle is doing work in this stage
    #[must_use]
    pub fn is_running(self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for CycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// How a cycle ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// An artifact was published
    Completed {
        /// What was published
        origin: ArtifactOrigin,
        /// Whether the cached snapshot stood in for a failed fetch
        degraded: bool,
    },
    /// The cycle stopped without publishing anything
    Aborted {
        /// Stage that failed
        stage: CycleStage,
        /// Why
        cause: RefreshError,
    },
}

impl CycleOutcome {
    /// Whether an artifact was published
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Summary handed back once a cycle is over
#[derive(Clone, Debug)]
pub struct CycleReport {
    /// Cycle number (per pipeline, starting at 1)
    pub id: u64,
    /// What triggered the cycle
    pub reason: TriggerReason,
    /// Terminal outcome
    pub outcome: CycleOutcome,
    /// Wall time from authorisation to the terminal stage
    pub elapsed: Duration,
}

/// One run of the refresh pipeline
///
/// Owned by whoever drives it: normally the background task spawned by
/// [`RefreshPipeline::spawn`], or a render loop that calls
/// [`RefreshCycle::step`] once per tick.
#[derive(Debug)]
pub struct RefreshCycle {
    id: u64,
    reason: TriggerReason,
    stage: CycleStage,
    started_at: Instant,
    snapshot: Option<Arc<StockSnapshot>>,
    degraded: bool,
    synthesis: bool,
    visual: Option<Arc<RgbImage>>,
    prompt: Option<Prompt>,
    artifact: Option<Artifact>,
    outcome: Option<CycleOutcome>,
    permit: Option<FlightPermit>,
}

impl RefreshCycle {
    /// Start a cycle under `permit`
    ///
    /// The cycle begins in [`CycleStage::FetchingData`].
    pub fn new(pipeline: &RefreshPipeline, permit: FlightPermit) -> Self {
        let id = pipeline.next_cycle_id();
        let reason = permit.reason();
        let started_at = permit.started_at();

        pipeline.stats().record_started();
        pipeline.publish_stage(CycleStage::FetchingData);
        tracing::info!(cycle = id, %reason, "Refresh cycle started");

        Self {
            id,
            reason,
            stage: CycleStage::FetchingData,
            started_at,
            snapshot: None,
            degraded: false,
            synthesis: false,
            visual: None,
            prompt: None,
            artifact: None,
            outcome: None,
            permit: Some(permit),
        }
    }

    /// Cycle number
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current stage
    #[must_use]
    pub fn stage(&self) -> CycleStage {
        self.stage
    }

    /// What triggered the cycle
    #[must_use]
    pub fn reason(&self) -> TriggerReason {
        self.reason
    }

    /// When the cycle was authorised
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Snapshot the cycle is working from, once fetched
    #[must_use]
    pub fn snapshot(&self) -> Option<&Arc<StockSnapshot>> {
        self.snapshot.as_ref()
    }

    /// Prompt, once derived
    #[must_use]
    pub fn prompt(&self) -> Option<&Prompt> {
        self.prompt.as_ref()
    }

    /// Terminal outcome, once reached
    #[must_use]
    pub fn outcome(&self) -> Option<&CycleOutcome> {
        self.outcome.as_ref()
    }

    /// Whether the cycle reached `Idle` or `Aborted`
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Advance exactly one stage and return the new stage
    ///
    /// Calling this on a finished cycle does nothing.
    pub async fn step(&mut self, pipeline: &RefreshPipeline) -> CycleStage {
        if self.is_finished() {
            return self.stage;
        }

        let stage = self.stage;
        let result = match stage {
            CycleStage::FetchingData => self.fetch(pipeline).await,
            CycleStage::RenderingVisual => self.render(pipeline).await,
            CycleStage::GeneratingPrompt => self.derive_prompt(pipeline).await,
            CycleStage::SynthesizingImage => self.synthesize(pipeline).await,
            CycleStage::Applying => self.apply(pipeline),
            CycleStage::Idle | CycleStage::Aborted => {
                Err(RefreshError::unexpected(stage, "cycle resumed in a terminal stage"))
            }
        };

        match result {
            Ok(CycleStage::Idle) => self.complete(pipeline),
            Ok(next) => {
                tracing::debug!(cycle = self.id, from = %stage, to = %next, "Cycle advanced");
                self.stage = next;
                pipeline.publish_stage(next);
            }
            Err(cause) => self.abort(pipeline, stage, cause),
        }

        self.stage
    }

    /// Drive the cycle to its terminal stage and report
    pub async fn run_to_completion(mut self, pipeline: &RefreshPipeline) -> CycleReport {
        while !self.is_finished() {
            self.step(pipeline).await;
        }
        self.into_report()
    }

    /// Report for a finished cycle
    ///
    /// An unfinished cycle is reported as aborted in its current stage and
    /// releases its flight.
    #[must_use]
    pub fn into_report(mut self) -> CycleReport {
        let outcome = self.outcome.take().unwrap_or_else(|| CycleOutcome::Aborted {
            stage: self.stage,
            cause: RefreshError::unexpected(self.stage, "cycle dropped before finishing"),
        });
        CycleReport {
            id: self.id,
            reason: self.reason,
            outcome,
            elapsed: self.started_at.elapsed(),
        }
    }

    async fn fetch(&mut self, pipeline: &RefreshPipeline) -> Result<CycleStage, RefreshError> {
        let source = Arc::clone(&pipeline.collaborators().source);
        let joined = tokio::spawn(async move { source.fetch().await }).await;

        let failure = match joined {
            Ok(Ok(snapshot)) if !snapshot.is_empty() => {
                let snapshot = Arc::new(snapshot);
                tracing::debug!(
                    cycle = self.id,
                    symbol = %snapshot.symbol,
                    price = snapshot.current_price,
                    points = snapshot.history.len(),
                    "Fetched snapshot"
                );
                pipeline.cache_snapshot(Arc::clone(&snapshot));
                self.snapshot = Some(snapshot);
                return Ok(CycleStage::RenderingVisual);
            }
            Ok(Ok(_)) => "data source returned an empty snapshot".to_string(),
            Ok(Err(err)) => format!("{err:#}"),
            Err(err) => join_failure(err),
        };

        match pipeline.cached_snapshot() {
            Some(cached) => {
                tracing::warn!(
                    cycle = self.id,
                    error = %failure,
                    "Fetch failed, continuing with cached snapshot"
                );
                self.degraded = true;
                self.snapshot = Some(cached);
                Ok(CycleStage::RenderingVisual)
            }
            None => Err(RefreshError::Fetch(failure)),
        }
    }

    async fn render(&mut self, pipeline: &RefreshPipeline) -> Result<CycleStage, RefreshError> {
        let stage = CycleStage::RenderingVisual;
        let snapshot = self.require_snapshot(stage)?;
        pipeline.snapshots().publish(Arc::clone(&snapshot));

        let renderer = Arc::clone(&pipeline.collaborators().renderer);
        let visual = tokio::task::spawn_blocking(move || renderer.render(&snapshot))
            .await
            .map_err(|err| RefreshError::unexpected(stage, join_failure(err)))?
            .map_err(|err| RefreshError::unexpected(stage, format!("{err:#}")))?;

        pipeline.dump_debug_image(self.id, "visual", &visual).await;

        self.synthesis = pipeline.synthesis_enabled();
        if self.synthesis {
            self.visual = Some(Arc::new(visual));
            Ok(CycleStage::GeneratingPrompt)
        } else {
            tracing::debug!(cycle = self.id, "Synthesis disabled, publishing the chart");
            self.artifact = Some(Artifact::new(visual, ArtifactOrigin::Chart));
            Ok(CycleStage::Applying)
        }
    }

    async fn derive_prompt(&mut self, pipeline: &RefreshPipeline) -> Result<CycleStage, RefreshError> {
        let stage = CycleStage::GeneratingPrompt;
        let snapshot = self.require_snapshot(stage)?;

        let deriver = Arc::clone(&pipeline.collaborators().prompts);
        let prompt = tokio::task::spawn_blocking(move || deriver.derive(&snapshot))
            .await
            .map_err(|err| RefreshError::unexpected(stage, join_failure(err)))?;

        tracing::debug!(cycle = self.id, prompt = %prompt.text, "Derived prompt");
        self.prompt = Some(prompt);
        Ok(CycleStage::SynthesizingImage)
    }

    async fn synthesize(&mut self, pipeline: &RefreshPipeline) -> Result<CycleStage, RefreshError> {
        let stage = CycleStage::SynthesizingImage;
        let visual = self
            .visual
            .clone()
            .ok_or_else(|| RefreshError::unexpected(stage, "no visual to synthesize from"))?;
        let prompt = self
            .prompt
            .clone()
            .ok_or_else(|| RefreshError::unexpected(stage, "no prompt to synthesize with"))?;

        let synthesizer = Arc::clone(&pipeline.collaborators().synthesizer);
        let synthesized = tokio::spawn(async move { synthesizer.synthesize(&visual, &prompt).await })
            .await
            .map_err(|err| RefreshError::unexpected(stage, join_failure(err)))?
            .map_err(|err| RefreshError::Synthesis(format!("{err:#}")))?;

        pipeline
            .dump_debug_image(self.id, "generated", &synthesized.image)
            .await;

        self.visual = None;
        self.artifact = Some(Artifact::new(
            synthesized.image,
            ArtifactOrigin::Synthesized {
                seed: synthesized.seed,
            },
        ));
        Ok(CycleStage::Applying)
    }

    fn apply(&mut self, pipeline: &RefreshPipeline) -> Result<CycleStage, RefreshError> {
        let artifact = self
            .artifact
            .take()
            .ok_or_else(|| RefreshError::unexpected(CycleStage::Applying, "no artifact to apply"))?;

        tracing::debug!(cycle = self.id, artifact = %artifact.id(), "Publishing artifact");
        let origin = artifact.origin();
        pipeline.artifacts().publish(artifact);
        self.outcome = Some(CycleOutcome::Completed {
            origin,
            degraded: self.degraded,
        });
        Ok(CycleStage::Idle)
    }

    fn require_snapshot(&self, stage: CycleStage) -> Result<Arc<StockSnapshot>, RefreshError> {
        self.snapshot
            .clone()
            .ok_or_else(|| RefreshError::unexpected(stage, "no snapshot available"))
    }

    fn complete(&mut self, pipeline: &RefreshPipeline) {
        self.stage = CycleStage::Idle;
        pipeline.stats().record_completed(self.degraded);
        tracing::info!(
            cycle = self.id,
            degraded = self.degraded,
            synthesis = self.synthesis,
            elapsed_ms = self.started_at.elapsed().as_millis() as u64,
            "Refresh cycle completed"
        );
        self.release(pipeline);
    }

    fn abort(&mut self, pipeline: &RefreshPipeline, stage: CycleStage, cause: RefreshError) {
        tracing::warn!(
            cycle = self.id,
            %stage,
            kind = cause.kind(),
            error = %cause,
            "Refresh cycle aborted"
        );
        pipeline.stats().record_aborted(&cause);
        self.stage = CycleStage::Aborted;
        self.outcome = Some(CycleOutcome::Aborted { stage, cause });
        self.artifact = None;
        self.visual = None;
        self.release(pipeline);
    }

    fn release(&mut self, pipeline: &RefreshPipeline) {
        pipeline.publish_stage(self.stage);
        // Dropping the permit ends the flight
        self.permit.take();
    }
}

fn join_failure(err: JoinError) -> String {
    if !err.is_panic() {
        return "collaborator task was cancelled".to_string();
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned());
    match message {
        Some(message) => format!("collaborator panicked: {message}"),
        None => "collaborator panicked".to_string(),
    }
}
