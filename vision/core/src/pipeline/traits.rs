//! Collaborator Traits
//!
//! The refresh pipeline only knows its collaborators through these traits.
//! The market data source, the chart style, the prompt wording and the image
//! model are all interchangeable: implement the trait and hand it to
//! [`Collaborators`](super::Collaborators).
//!
//! # Design Philosophy
//!
//! - Slow, I/O-bound steps are `async` ([`DataSource`], [`ImageSynthesizer`])
//! - CPU-bound steps are synchronous ([`VisualRenderer`], [`PromptDeriver`])
//!   and are moved onto blocking workers by the pipeline
//! - Failures are plain `anyhow` errors; the pipeline decides what they mean

use async_trait::async_trait;
use image::RgbImage;

use crate::snapshot::StockSnapshot;

/// Text prompt for the image synthesizer
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Prompt {
    /// What to generate
    pub text: String,
    /// What to avoid
    pub negative: String,
}

impl Prompt {
    /// Create a prompt with no negative text
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            negative: String::new(),
        }
    }

    /// Set the negative prompt
    #[must_use]
    pub fn with_negative(mut self, negative: impl Into<String>) -> Self {
        self.negative = negative.into();
        self
    }
}

/// Result of one synthesis call
#[derive(Clone, Debug)]
pub struct Synthesized {
    /// Generated image
    pub image: RgbImage,
    /// Seed the model used
    pub seed: u64,
}

/// Source of market data snapshots
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Source name for logs (e.g., "yahoo-finance")
    fn name(&self) -> &str;

    /// Fetch a fresh snapshot
    ///
    /// May be slow. An empty snapshot is treated like a failure.
    async fn fetch(&self) -> anyhow::Result<StockSnapshot>;
}

/// Turns a snapshot into the control visual
pub trait VisualRenderer: Send + Sync {
    /// Render the snapshot
    ///
    /// Deterministic for a given snapshot. Runs on a blocking worker.
    fn render(&self, snapshot: &StockSnapshot) -> anyhow::Result<RgbImage>;
}

/// Derives the synthesis prompt from a snapshot
pub trait PromptDeriver: Send + Sync {
    /// Build the prompt
    fn derive(&self, snapshot: &StockSnapshot) -> Prompt;
}

/// Generates the final image from the control visual and a prompt
#[async_trait]
pub trait ImageSynthesizer: Send + Sync {
    /// Synthesizer name for logs
    fn name(&self) -> &str;

    /// Generate an image
    ///
    /// The slow, resource-heavy stage. A failure aborts the cycle.
    async fn synthesize(&self, visual: &RgbImage, prompt: &Prompt) -> anyhow::Result<Synthesized>;
}
