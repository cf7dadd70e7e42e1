//! Exponential reconnect backoff: `min(base * 2^attempt, cap)`.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub auto_reconnect: bool,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub cap_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            cap_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.cap_delay)
    }

    pub fn allows_attempt(&self, attempts_so_far: u32) -> bool {
        self.auto_reconnect && attempts_so_far < self.max_attempts
    }
}
