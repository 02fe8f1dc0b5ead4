//! Trailing-edge debounce for bursty triggers.

use std::time::Duration;

use tokio::time::Instant;

/// Coalesces triggers: fires once `window` after the last trigger.
#[derive(Debug, Clone)]
pub struct Debounce {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Register a trigger; pushes the deadline out to `now + window`.
    pub fn trigger(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Consume the pending trigger if its deadline has passed.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}
