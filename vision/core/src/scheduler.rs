//! Update Scheduler
//!
//! Decides when a refresh cycle may start and guarantees that at most one
//! runs at a time (single-flight). The state behind it is a flag, a
//! timestamp and an interval, all guarded by one mutex that is shared by the
//! scheduling decision and by the cycle's own start/finish transitions.
//! Critical sections are O(1): no I/O ever happens under the lock.
//!
//! # Usage
//!
//! ```ignore
//! let scheduler = Arc::new(UpdateScheduler::new(Duration::from_secs(900)));
//!
//! // Render loop, once per tick
//! if scheduler.due_periodic(Instant::now()) {
//!     if let Some(permit) = scheduler.acquire(TriggerReason::Periodic) {
//!         pipeline.spawn(permit); // permit calls finish() when dropped
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Why a cycle was requested
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerReason {
    /// The refresh interval elapsed
    Periodic,
    /// The user asked for a refresh
    Forced,
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Periodic => write!(f, "periodic"),
            Self::Forced => write!(f, "forced"),
        }
    }
}

/// Shared scheduling state; only reachable through [`UpdateScheduler`]
#[derive(Debug)]
struct SchedulerState {
    in_flight: bool,
    last_attempt_at: Option<Instant>,
    interval: Duration,
}

/// Read-only copy of the scheduler state (for status lines and tests)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerStatus {
    /// Whether a cycle is currently running
    pub in_flight: bool,
    /// When the most recent cycle started (`None` before the first one)
    pub last_attempt_at: Option<Instant>,
    /// Periodic refresh interval
    pub interval: Duration,
}

/// Single-flight refresh scheduler
#[derive(Debug)]
pub struct UpdateScheduler {
    state: Mutex<SchedulerState>,
}

impl UpdateScheduler {
    /// Create a scheduler with the given periodic interval
    ///
    /// No attempt has been made yet, so the first periodic check is due
    /// immediately.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                in_flight: false,
                last_attempt_at: None,
                interval,
            }),
        }
    }

    /// Try to start a cycle now
    ///
    /// See [`UpdateScheduler::try_start_at`].
    pub fn try_start(&self, reason: TriggerReason) -> bool {
        self.try_start_at(reason, Instant::now())
    }

    /// Try to start a cycle at `now`
    ///
    /// Returns `false` while a cycle is in flight, for forced triggers too:
    /// a forced refresh never preempts a running cycle. On success the
    /// in-flight flag is set and `last_attempt_at` becomes `now`, both under
    /// the same lock, so concurrent callers are linearised and exactly one of
    /// them wins a given flight.
    pub fn try_start_at(&self, reason: TriggerReason, now: Instant) -> bool {
        let mut state = self.state.lock();
        if state.in_flight {
            tracing::debug!(%reason, "Refresh already in flight, trigger ignored");
            return false;
        }
        state.in_flight = true;
        state.last_attempt_at = Some(now);
        drop(state);

        tracing::debug!(%reason, "Refresh cycle authorised");
        true
    }

    /// Mark the running cycle as finished
    ///
    /// Must be called exactly once per successful `try_start`. Calling it
    /// while idle is logged and otherwise ignored.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        if !state.in_flight {
            drop(state);
            tracing::warn!("finish() called with no cycle in flight");
            return;
        }
        state.in_flight = false;
    }

    /// Whether a periodic cycle should start at `now`
    #[must_use]
    pub fn due_periodic(&self, now: Instant) -> bool {
        let state = self.state.lock();
        !state.in_flight
            && state
                .last_attempt_at
                .map_or(true, |last| now.saturating_duration_since(last) >= state.interval)
    }

    /// Time left until the next periodic cycle is due
    ///
    /// `None` while a cycle is in flight; zero when already due.
    #[must_use]
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        let state = self.state.lock();
        if state.in_flight {
            return None;
        }
        Some(state.last_attempt_at.map_or(Duration::ZERO, |last| {
            state
                .interval
                .saturating_sub(now.saturating_duration_since(last))
        }))
    }

    /// Restart the periodic timer from `now` without starting a cycle
    pub fn reset_timer(&self, now: Instant) {
        self.state.lock().last_attempt_at = Some(now);
    }

    /// Change the periodic interval
    pub fn set_interval(&self, interval: Duration) {
        self.state.lock().interval = interval;
    }

    /// Whether a cycle is currently running
    #[must_use]
    pub fn in_flight(&self) -> bool {
        self.state.lock().in_flight
    }

    /// Copy of the current state
    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        let state = self.state.lock();
        SchedulerStatus {
            in_flight: state.in_flight,
            last_attempt_at: state.last_attempt_at,
            interval: state.interval,
        }
    }

    /// Try to start a cycle, returning a permit that finishes it on drop
    #[must_use]
    pub fn acquire(self: &Arc<Self>, reason: TriggerReason) -> Option<FlightPermit> {
        self.acquire_at(reason, Instant::now())
    }

    /// [`UpdateScheduler::acquire`] with an explicit start time
    #[must_use]
    pub fn acquire_at(self: &Arc<Self>, reason: TriggerReason, now: Instant) -> Option<FlightPermit> {
        self.try_start_at(reason, now).then(|| FlightPermit {
            scheduler: Arc::clone(self),
            reason,
            started_at: now,
        })
    }
}

/// Authorisation for exactly one refresh cycle
///
/// Dropping the permit calls [`UpdateScheduler::finish`], so every exit path
/// of the owning cycle (completion, abort, or a panic unwinding through the
/// worker) releases the flight exactly once.
#[derive(Debug)]
#[must_use = "dropping the permit immediately ends the flight"]
pub struct FlightPermit {
    scheduler: Arc<UpdateScheduler>,
    reason: TriggerReason,
    started_at: Instant,
}

impl FlightPermit {
    /// What triggered this flight
    #[must_use]
    pub fn reason(&self) -> TriggerReason {
        self.reason
    }

    /// When the flight was authorised
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        self.scheduler.finish();
    }
}
