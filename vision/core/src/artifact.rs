//! Displayable Artifacts
//!
//! An [`Artifact`] is the immutable result of a refresh cycle: an RGB image
//! plus where it came from. It is cheap to clone (one `Arc`) so the worker,
//! the mailbox and the display can all hold it without copying pixels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use image::RgbImage;
use serde::{Deserialize, Serialize};

static NEXT_ARTIFACT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique artifact identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactId(pub u64);

impl ArtifactId {
    fn next() -> Self {
        Self(NEXT_ARTIFACT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How an artifact was produced
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactOrigin {
    /// The rendered chart itself (synthesis disabled)
    Chart,
    /// Output of the image synthesizer
    Synthesized {
        /// Seed reported by the synthesizer
        seed: u64,
    },
    /// A composited crossfade frame carried over into a new transition
    Blend,
}

impl std::fmt::Display for ArtifactOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chart => write!(f, "chart"),
            Self::Synthesized { seed } => write!(f, "synthesized (seed {seed})"),
            Self::Blend => write!(f, "blend"),
        }
    }
}

#[derive(Debug)]
struct ArtifactInner {
    id: ArtifactId,
    image: RgbImage,
    origin: ArtifactOrigin,
    created_at: DateTime<Local>,
}

/// Immutable displayable image handed from the pipeline to the render loop
#[derive(Clone, Debug)]
pub struct Artifact {
    inner: Arc<ArtifactInner>,
}

impl Artifact {
    /// Wrap an image as a new artifact
    #[must_use]
    pub fn new(image: RgbImage, origin: ArtifactOrigin) -> Self {
        Self {
            inner: Arc::new(ArtifactInner {
                id: ArtifactId::next(),
                image,
                origin,
                created_at: Local::now(),
            }),
        }
    }

    /// Unique id
    #[must_use]
    pub fn id(&self) -> ArtifactId {
        self.inner.id
    }

    /// Pixels
    #[must_use]
    pub fn image(&self) -> &RgbImage {
        &self.inner.image
    }

    /// Origin
    #[must_use]
    pub fn origin(&self) -> ArtifactOrigin {
        self.inner.origin
    }

    /// Creation time
    #[must_use]
    pub fn created_at(&self) -> DateTime<Local> {
        self.inner.created_at
    }

    /// Image dimensions as `(width, height)`
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.inner.image.dimensions()
    }

    /// Whether two handles refer to the same artifact
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
