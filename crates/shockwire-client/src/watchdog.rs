//! Connection watchdog -- silence detection for half-open links.
//!
//! Any inbound frame counts as activity. The same interval is used for the
//! check period and the silence threshold.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Watchdog {
    interval: Duration,
    last_activity: Instant,
}

impl Watchdog {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_activity: now,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Strictly longer than one interval without traffic.
    pub fn is_stale(&self, now: Instant) -> bool {
        self.silence(now) > self.interval
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
