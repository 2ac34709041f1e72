//! Handoff Mailbox
//!
//! A single-slot, overwrite-on-write buffer between the background worker
//! and the render loop. Only the newest value matters: a publish replaces
//! anything still unread, so stale intermediate results are never shown and
//! nothing queues up behind a slow consumer.
//!
//! Both operations hold the lock for one `Option` swap and nothing else, so
//! the render loop can call [`Mailbox::take_if_present`] every tick without
//! ever waiting on the producer.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Single-slot, last-write-wins hand-off
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
    /// Values overwritten before anyone read them
    superseded: AtomicU64,
}

impl<T> Mailbox<T> {
    /// Create an empty mailbox
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            superseded: AtomicU64::new(0),
        }
    }

    /// Store `value`, discarding any unread previous content
    pub fn publish(&self, value: T) {
        let replaced = self.slot.lock().replace(value);
        if replaced.is_some() {
            self.superseded.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Mailbox value superseded before it was read");
        }
        // `replaced` drops here, outside the lock
    }

    /// Atomically take and clear the pending value, if any
    pub fn take_if_present(&self) -> Option<T> {
        self.slot.lock().take()
    }

    /// Whether a value is waiting to be taken
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Number of values that were overwritten without being read
    #[must_use]
    pub fn superseded(&self) -> u64 {
        self.superseded.load(Ordering::Relaxed)
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
