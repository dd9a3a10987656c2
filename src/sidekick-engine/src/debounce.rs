//! Trailing debounce.
//!
//! Every observed mutation moves the deadline to `now + quiet`; the window
//! fires once the deadline passes with no further mutation. A long enough
//! burst postpones the check indefinitely.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct DebounceWindow {
    quiet: Duration,
    last_mutation_at: Option<Instant>,
    deadline: Option<Instant>,
}

impl DebounceWindow {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            last_mutation_at: None,
            deadline: None,
        }
    }

    /// Record a mutation and re-arm.
    pub fn observe(&mut self, now: Instant) {
        self.last_mutation_at = Some(now);
        self.deadline = Some(now + self.quiet);
    }

    /// Arm without recording a mutation (initial check, re-check after an
    /// initialize). Keeps a later deadline if one is already set.
    pub fn arm(&mut self, now: Instant) {
        let deadline = now + self.quiet;
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.max(deadline)));
    }

    /// Replace the deadline with `now + delay`.
    pub fn arm_after(&mut self, now: Instant, delay: Duration) {
        self.deadline = Some(now + delay);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn last_mutation_at(&self) -> Option<Instant> {
        self.last_mutation_at
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Disarm and report `true` if the deadline has passed.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
