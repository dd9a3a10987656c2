//! Per-slot session state.

use std::time::Duration;

use tokio::time::Instant;

use crate::host::NodeId;

/// Everything the reconciler knows about its slot. Owned by the slot's task
/// and passed by reference to every handler.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Query the current answer belongs to.
    pub query: String,
    pub container: Option<NodeId>,
    pub initialized: bool,
    /// Re-entrancy lock held from the start of an initialize until the
    /// first network response.
    pub is_initializing: bool,
    pub manually_closed_at: Option<Instant>,
    /// Query that was showing when the user dismissed the container.
    pub dismissed_query: Option<String>,
    /// Last anchor-loss reinitialize.
    pub last_reinit_at: Option<Instant>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the initialize lock. Returns `false` when it is already held.
    pub fn try_begin_init(&mut self) -> bool {
        if self.is_initializing {
            return false;
        }
        self.is_initializing = true;
        true
    }

    pub fn end_init(&mut self) {
        self.is_initializing = false;
    }

    /// Whether a dismissal less than `window` ago still blocks recreation.
    pub fn is_suppressed(&self, now: Instant, window: Duration) -> bool {
        self.manually_closed_at
            .is_some_and(|at| now.saturating_duration_since(at) < window)
    }

    /// Whether the anchor-loss cooldown allows another reinitialize.
    pub fn reinit_allowed(&self, now: Instant, cooldown: Duration) -> bool {
        self.last_reinit_at
            .is_none_or(|at| now.saturating_duration_since(at) >= cooldown)
    }

    /// Record a manual dismissal.
    pub fn dismiss(&mut self, now: Instant) {
        self.manually_closed_at = Some(now);
        self.dismissed_query = Some(self.query.clone());
        self.container = None;
        self.initialized = false;
    }

    /// Whether `query` is the one the user dismissed.
    pub fn was_dismissed(&self, query: &str) -> bool {
        self.dismissed_query.as_deref() == Some(query)
    }
}
