use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
/// Admits at most one update per `interval`; everything in between is dropped.
pub struct ThrottleGate {
    interval: Duration,
    last_applied: Option<Instant>,
}

impl ThrottleGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_applied: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn admit(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_applied {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }
        self.last_applied = Some(now);
        true
    }

    pub fn reset(&mut self) {
        self.last_applied = None;
    }
}
