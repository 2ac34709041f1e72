//! Trend-Driven Prompt Derivation
//!
//! [`MoodPromptDeriver`] turns the latest price move into a scene
//! description. The direction picks the mood, the size of the move picks how
//! dramatic the scene is:
//!
//! ```text
//! magnitude = min(10, |change %| / 2)
//!
//!             < 3          < 7            >= 7
//! rising      calm dawn    lift-off       spectacle
//! falling     drizzle      storm          collapse
//! flat        (still scenes)
//! ```
//!
//! A random setting is always added, a figure 40% of the time and an ambient
//! detail 70% of the time, followed by a fixed style suffix.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::pipeline::{Prompt, PromptDeriver};
use crate::snapshot::{StockSnapshot, Trend};

const STYLE_SUFFIX: &str = "hand-painted illustration, soft watercolor, warm lighting, highly detailed";

const FIGURE_PROBABILITY: f64 = 0.4;
const DETAIL_PROBABILITY: f64 = 0.7;

const RISING_SMALL: &[&str] = &[
    "gentle sunrise over",
    "spring blossoms opening in",
    "soft morning light across",
    "first green shoots in",
];
const RISING_MEDIUM: &[&str] = &[
    "hot air balloons lifting above",
    "paper lanterns rising from",
    "a sailing ship catching the wind near",
    "kites climbing over",
];
const RISING_LARGE: &[&str] = &[
    "a blazing comet streaking over",
    "fireworks bursting above",
    "a golden aurora crowning",
    "sunlit mountain peaks towering over",
];
const FALLING_SMALL: &[&str] = &[
    "light drizzle over",
    "autumn leaves drifting through",
    "a quiet dusk settling on",
    "low fog rolling through",
];
const FALLING_MEDIUM: &[&str] = &[
    "storm clouds gathering over",
    "a long staircase descending into",
    "a river running fast through",
    "heavy rain sweeping across",
];
const FALLING_LARGE: &[&str] = &[
    "a roaring waterfall plunging beside",
    "crumbling ruins overlooking",
    "a deep canyon swallowing",
    "lightning splitting the sky above",
];
const STEADY: &[&str] = &[
    "a tranquil afternoon in",
    "still waters reflecting",
    "a balanced, quiet moment in",
    "an unhurried evening in",
];

const SETTINGS: &[&str] = &[
    "a hillside village",
    "an old forest",
    "a harbour town",
    "a floating island",
    "a lakeside cabin",
    "a terraced garden",
    "a mountain valley",
    "a lighthouse on the cliffs",
    "a market street at night",
    "a greenhouse full of plants",
];
const FIGURES: &[&str] = &[
    "a lone traveller",
    "a curious fox",
    "a child with a red umbrella",
    "an old fisherman",
    "a cat on a windowsill",
    "a pair of cranes",
];
const DETAILS: &[&str] = &[
    "drifting clouds",
    "fireflies",
    "falling petals",
    "glowing windows",
    "wind in the tall grass",
    "ripples on the water",
    "steam rising from rooftops",
    "distant birds",
];

/// Strength of the latest move
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Intensity {
    Small,
    Medium,
    Large,
}

impl Intensity {
    fn from_change_pct(change_pct: f64) -> Self {
        let magnitude = (change_pct.abs() / 2.0).min(10.0);
        if magnitude < 3.0 {
            Self::Small
        } else if magnitude < 7.0 {
            Self::Medium
        } else {
            Self::Large
        }
    }
}

fn pick(rng: &mut StdRng, list: &[&'static str]) -> &'static str {
    list.choose(rng).copied().unwrap_or_default()
}

fn openings(trend: Trend, intensity: Intensity) -> &'static [&'static str] {
    match (trend, intensity) {
        (Trend::Rising, Intensity::Small) => RISING_SMALL,
        (Trend::Rising, Intensity::Medium) => RISING_MEDIUM,
        (Trend::Rising, Intensity::Large) => RISING_LARGE,
        (Trend::Falling, Intensity::Small) => FALLING_SMALL,
        (Trend::Falling, Intensity::Medium) => FALLING_MEDIUM,
        (Trend::Falling, Intensity::Large) => FALLING_LARGE,
        (Trend::Flat, _) => STEADY,
    }
}

/// Picks a scene from the price trend
#[derive(Debug)]
pub struct MoodPromptDeriver {
    negative: String,
    rng: Mutex<StdRng>,
}

impl MoodPromptDeriver {
    /// Create a deriver seeded from the OS
    pub fn new(negative: impl Into<String>) -> Self {
        Self {
            negative: negative.into(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create a deriver with a fixed seed (reproducible prompts)
    pub fn with_seed(negative: impl Into<String>, seed: u64) -> Self {
        Self {
            negative: negative.into(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl PromptDeriver for MoodPromptDeriver {
    fn derive(&self, snapshot: &StockSnapshot) -> Prompt {
        let trend = snapshot.trend();
        let intensity = Intensity::from_change_pct(snapshot.price_change_pct);

        let mut guard = self.rng.lock();
        let rng: &mut StdRng = &mut guard;

        let mut parts = vec![
            pick(rng, openings(trend, intensity)),
            pick(rng, SETTINGS),
        ];
        if rng.gen_bool(FIGURE_PROBABILITY) {
            parts.push(pick(rng, FIGURES));
        }
        if rng.gen_bool(DETAIL_PROBABILITY) {
            parts.push(pick(rng, DETAILS));
        }
        drop(guard);

        // The opening reads into the setting ("still waters reflecting a harbour town")
        let scene = format!("{} {}", parts[0], parts[1]);
        let mut text = std::iter::once(scene.as_str())
            .chain(parts[2..].iter().copied())
            .collect::<Vec<_>>()
            .join(", ");
        text.push_str(", ");
        text.push_str(STYLE_SUFFIX);

        Prompt::new(text).with_negative(self.negative.clone())
    }
}
