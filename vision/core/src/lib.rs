//! StockVision Core - Headless Refresh Pipeline
//!
//! This crate owns everything about keeping a full-screen picture fresh
//! without ever stalling the loop that draws it. It has no terminal or
//! windowing dependencies; a surface (the TUI in this workspace) drives it
//! once per tick.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── Render Loop (surface) ───────────────────────────┐
//! │  input ──► UpdateScheduler ──acquire()──► RefreshPipeline::spawn()           │
//! │                 ▲                                 │                          │
//! │           force / reset                           │ (background task)        │
//! │                                                   ▼                          │
//! │            DisplayBackground ◄── on_new_artifact ◄── Mailbox<Artifact>       │
//! │                 │                                                            │
//! │                 └─► CrossfadeEngine::frame() ──► draw + overlay              │
//! └──────────────────────────────────────────────────────────────────────────────┘
//!
//!  RefreshCycle: FetchingData → RenderingVisual → GeneratingPrompt
//!                → SynthesizingImage → Applying → Idle   (any stage → Aborted)
//! ```
//!
//! # Key Types
//!
//! - [`UpdateScheduler`]: single-flight gate plus the periodic timer
//! - [`Mailbox`]: last-write-wins hand-off slot between worker and render loop
//! - [`RefreshPipeline`] / [`RefreshCycle`]: the staged background computation
//! - [`CrossfadeEngine`] / [`DisplayBackground`]: tick-synchronised crossfade
//! - [`VisionConfig`]: TOML/env/CLI configuration
//!
//! # Module Overview
//!
//! - [`artifact`]: opaque displayable images handed between contexts
//! - [`config`]: configuration loading and validation
//! - [`crossfade`]: transition engine consumed every frame
//! - [`error`]: refresh failure taxonomy
//! - [`events`]: control signals a surface feeds back into the core
//! - [`mailbox`]: single-slot hand-off
//! - [`pipeline`]: collaborator traits, cycle state machine, worker spawning
//! - [`prompt`]: trend-driven prompt derivation
//! - [`scheduler`]: single-flight update scheduling
//! - [`snapshot`]: market data snapshot types
//! - [`sources`]: market data sources
//! - [`synthesis`]: image synthesis backends
//! - [`visual`]: chart rasterisation

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]

pub mod artifact;
pub mod config;
pub mod crossfade;
pub mod error;
pub mod events;
pub mod mailbox;
pub mod pipeline;
pub mod prompt;
pub mod scheduler;
pub mod snapshot;
pub mod sources;
pub mod synthesis;
pub mod visual;

// Re-exports for convenience
pub use artifact::{Artifact, ArtifactId, ArtifactOrigin};
pub use config::{
    default_config_path, load_config, load_config_from_path, ChartType, ConfigError,
    ConfigOverrides, ConfigSource, VisionConfig, VisionToml,
};
pub use crossfade::{BlendCarryover, CrossfadeEngine, DisplayBackground};
pub use error::RefreshError;
pub use events::Control;
pub use mailbox::Mailbox;
pub use pipeline::{
    Collaborators, CycleOutcome, CycleReport, CycleStage, DataSource, ImageSynthesizer,
    PipelineStats, Prompt, PromptDeriver, RefreshCycle, RefreshPipeline, Synthesized,
    VisualRenderer,
};
pub use prompt::MoodPromptDeriver;
pub use scheduler::{FlightPermit, SchedulerStatus, TriggerReason, UpdateScheduler};
pub use snapshot::{PricePoint, StockSnapshot, Trend};
pub use sources::YahooFinanceSource;
pub use synthesis::DiffusionHttpSynthesizer;
pub use visual::ChartRenderer;
