//! Refresh Failure Taxonomy
//!
//! Every failure a refresh cycle can hit is folded into [`RefreshError`].
//! None of these ever reach the render loop as an error value; they end the
//! owning cycle and are reported through its
//! [`CycleOutcome`](crate::pipeline::CycleOutcome).

use thiserror::Error;

use crate::pipeline::CycleStage;

/// Why a refresh cycle aborted
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RefreshError {
    /// The data source failed (or returned nothing) and no cached snapshot
    /// was available to fall back on
    #[error("data fetch failed: {0}")]
    Fetch(String),

    /// Image synthesis failed; no fallback artifact is published
    #[error("image synthesis failed: {0}")]
    Synthesis(String),

    /// Any other stage failure, including collaborator panics
    #[error("unexpected failure while {stage}: {reason}")]
    Unexpected {
        /// Stage that was running when the failure happened
        stage: CycleStage,
        /// Human-readable cause
        reason: String,
    },
}

impl RefreshError {
    /// Build an [`RefreshError::Unexpected`] from any displayable cause
    pub fn unexpected(stage: CycleStage, reason: impl std::fmt::Display) -> Self {
        Self::Unexpected {
            stage,
            reason: reason.to_string(),
        }
    }

    /// Short label for status lines and logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::Synthesis(_) => "synthesis",
            Self::Unexpected { .. } => "unexpected",
        }
    }
}
