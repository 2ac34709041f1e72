//! Control Signals
//!
//! Discrete, payload-free events a surface feeds back into the core. The
//! surface maps its native input (keys, signals, buttons) onto these; the
//! core never sees raw input.

use serde::{Deserialize, Serialize};

/// A control signal from the surface
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Control {
    /// Stop the render loop
    Quit,
    /// Start a refresh cycle now, unless one is already running
    ForceRefresh,
    /// Show or hide the detailed overlay panel
    ToggleOverlay,
    /// Enable or disable the image synthesis stage
    ToggleSynthesis,
}

impl Control {
    /// Human-readable label (for logs and help lines)
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Quit => "quit",
            Self::ForceRefresh => "refresh",
            Self::ToggleOverlay => "details",
            Self::ToggleSynthesis => "synthesis",
        }
    }
}

impl std::fmt::Display for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}
