//! Crossfade Engine
//!
//! Turns the render loop's [`DisplayBackground`] into the frame to draw on
//! each tick. When a new artifact is adopted the old one becomes `previous`
//! and the engine blends from it to the new `current` over a fixed number of
//! ticks.
//!
//! # Design
//!
//! Progress advances by `frame_interval / transition_duration` per call to
//! [`CrossfadeEngine::frame`], not by wall-clock time, so a transition takes
//! the same number of frames regardless of load:
//!
//! ```text
//! tick:      0      1      2     ...    n-1     n
//! progress:  0.00   0.03   0.07  ...    0.97    1.00 ─► previous released
//! frame:     prev ──────── lerp(prev, cur, p) ───────► cur
//! ```
//!
//! Scaled copies of both layers are cached per output size. A settled
//! display returns the cached copy of `current` with no per-tick work.

use std::time::Duration;

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::artifact::{Artifact, ArtifactOrigin};

/// Float slack when deciding that a transition has reached 1
const SETTLE_EPSILON: f32 = 1e-4;

/// What becomes `previous` when an artifact arrives mid-transition
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendCarryover {
    /// The old `current` as it was before blending; the partial blend is lost
    #[default]
    Discard,
    /// The last composited frame, so the picture never jumps
    Composite,
}

impl std::fmt::Display for BlendCarryover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discard => write!(f, "discard"),
            Self::Composite => write!(f, "composite"),
        }
    }
}

/// An artifact plus its scaled copy for the last requested output size
#[derive(Debug)]
struct Layer {
    artifact: Artifact,
    scaled: Option<RgbImage>,
}

impl Layer {
    fn new(artifact: Artifact) -> Self {
        Self {
            artifact,
            scaled: None,
        }
    }

    fn prepare(&mut self, width: u32, height: u32) {
        if self.artifact.dimensions() == (width, height) {
            self.scaled = None;
            return;
        }
        let cached = self.scaled.as_ref().map(RgbImage::dimensions);
        if cached != Some((width, height)) {
            self.scaled = Some(imageops::resize(
                self.artifact.image(),
                width,
                height,
                FilterType::Triangle,
            ));
        }
    }

    fn view(&self) -> &RgbImage {
        self.scaled.as_ref().unwrap_or_else(|| self.artifact.image())
    }
}

/// The render loop's display state
///
/// Owned by the render loop and never shared with the refresh worker.
#[derive(Debug)]
pub struct DisplayBackground {
    current: Option<Layer>,
    previous: Option<Layer>,
    progress: f32,
    composite: RgbImage,
    composite_fresh: bool,
}

impl DisplayBackground {
    /// Empty display (nothing to show until the first artifact)
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: None,
            previous: None,
            progress: 1.0,
            composite: RgbImage::new(0, 0),
            composite_fresh: false,
        }
    }

    /// Artifact being faded in (or shown, once settled)
    #[must_use]
    pub fn current(&self) -> Option<&Artifact> {
        self.current.as_ref().map(|layer| &layer.artifact)
    }

    /// Artifact being faded out
    #[must_use]
    pub fn previous(&self) -> Option<&Artifact> {
        self.previous.as_ref().map(|layer| &layer.artifact)
    }

    /// Transition progress in `[0, 1]`; 1 whenever there is no `previous`
    #[must_use]
    pub fn transition_progress(&self) -> f32 {
        if self.previous.is_none() {
            1.0
        } else {
            self.progress
        }
    }

    /// Whether a crossfade is under way
    #[must_use]
    pub fn is_transitioning(&self) -> bool {
        self.previous.is_some() && self.progress < 1.0
    }

    /// Whether anything has been adopted yet
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.current.is_some()
    }
}

impl Default for DisplayBackground {
    fn default() -> Self {
        Self::new()
    }
}

/// Tick-synchronised crossfade between consecutive artifacts
#[derive(Clone, Copy, Debug)]
pub struct CrossfadeEngine {
    frame_interval: Duration,
    transition_duration: Duration,
    carryover: BlendCarryover,
}

impl CrossfadeEngine {
    /// Create an engine for a given tick interval and transition length
    #[must_use]
    pub fn new(frame_interval: Duration, transition_duration: Duration) -> Self {
        Self {
            frame_interval,
            transition_duration,
            carryover: BlendCarryover::default(),
        }
    }

    /// Create an engine from a tick rate in Hz
    #[must_use]
    pub fn from_tick_rate(tick_rate_hz: u32, transition_duration: Duration) -> Self {
        let frame_interval = Duration::from_secs(1) / tick_rate_hz.max(1);
        Self::new(frame_interval, transition_duration)
    }

    /// Set the mid-transition carryover policy
    #[must_use]
    pub fn with_carryover(mut self, carryover: BlendCarryover) -> Self {
        self.carryover = carryover;
        self
    }

    /// Progress added per frame (infinite for a zero-length transition)
    #[must_use]
    pub fn step(&self) -> f32 {
        if self.transition_duration.is_zero() {
            f32::INFINITY
        } else {
            self.frame_interval.as_secs_f32() / self.transition_duration.as_secs_f32()
        }
    }

    /// Frames a full transition takes
    #[must_use]
    pub fn frames_per_transition(&self) -> u32 {
        if self.transition_duration.is_zero() || self.frame_interval.is_zero() {
            return 1;
        }
        (self.transition_duration.as_secs_f64() / self.frame_interval.as_secs_f64())
            .round()
            .max(1.0) as u32
    }

    /// Carryover policy
    #[must_use]
    pub fn carryover(&self) -> BlendCarryover {
        self.carryover
    }

    /// Adopt a freshly published artifact
    ///
    /// The old `current` becomes `previous` and progress restarts at 0. With
    /// nothing on screen yet the artifact is shown settled. Mid-transition the
    /// partial blend is dropped, unless the engine uses
    /// [`BlendCarryover::Composite`], in which case the last composited frame
    /// is what fades out.
    pub fn on_new_artifact(&self, display: &mut DisplayBackground, artifact: Artifact) {
        let incoming = Layer::new(artifact);

        let Some(old_current) = display.current.take() else {
            display.current = Some(incoming);
            display.previous = None;
            display.progress = 1.0;
            display.composite_fresh = false;
            return;
        };

        let mid_transition = display.is_transitioning();
        display.previous = if mid_transition
            && self.carryover == BlendCarryover::Composite
            && display.composite_fresh
        {
            let blend = Artifact::new(display.composite.clone(), ArtifactOrigin::Blend);
            Some(Layer::new(blend))
        } else {
            Some(old_current)
        };

        tracing::debug!(
            artifact = %incoming.artifact.id(),
            mid_transition,
            carryover = %self.carryover,
            "Adopted new artifact"
        );

        display.current = Some(incoming);
        display.progress = 0.0;
        display.composite_fresh = false;
    }

    /// Compute the frame to draw this tick
    ///
    /// Returns `None` until the first artifact has been adopted. Every call
    /// during a transition advances it by one step.
    pub fn frame<'a>(
        &self,
        display: &'a mut DisplayBackground,
        width: u32,
        height: u32,
    ) -> Option<&'a RgbImage> {
        let width = width.max(1);
        let height = height.max(1);

        let DisplayBackground {
            current,
            previous,
            progress,
            composite,
            composite_fresh,
        } = display;

        let current = current.as_mut()?;
        current.prepare(width, height);

        let Some(prev) = previous.as_mut() else {
            *progress = 1.0;
            return Some(current.view());
        };

        if *progress < 1.0 {
            *progress = (*progress + self.step()).min(1.0);
            if *progress >= 1.0 - SETTLE_EPSILON {
                *progress = 1.0;
            }
        }

        if *progress >= 1.0 {
            *previous = None;
            *composite_fresh = false;
            return Some(current.view());
        }

        prev.prepare(width, height);
        if composite.dimensions() != (width, height) {
            *composite = RgbImage::new(width, height);
        }
        blend_into(composite, prev.view(), current.view(), *progress);
        *composite_fresh = true;

        Some(&*composite)
    }
}

/// `out = under + (over - under) * alpha`, per channel
fn blend_into(out: &mut RgbImage, under: &RgbImage, over: &RgbImage, alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    for ((dst, &a), &b) in out.iter_mut().zip(under.iter()).zip(over.iter()) {
        let a = f32::from(a);
        let b = f32::from(b);
        *dst = (a + (b - a) * alpha).round().clamp(0.0, 255.0) as u8;
    }
}
