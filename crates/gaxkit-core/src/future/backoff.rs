//! Truncated exponential backoff between polls, without jitter.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay schedule for the polling loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollBackoff {
    /// Delay after the first unsuccessful poll.
    pub initial_delay: Duration,
    /// Growth factor applied after each further poll.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl PollBackoff {
    /// Delay to wait after the `attempt`-th poll (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exp);
        let cap_ms = self.max_delay.as_millis() as f64;
        Duration::from_millis(base_ms.min(cap_ms) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_one_second() {
        let backoff = PollBackoff::default();
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
    }

    #[test]
    fn capped_at_max() {
        let backoff = PollBackoff::default();
        assert_eq!(backoff.delay(6), Duration::from_secs(30));
        assert_eq!(backoff.delay(200), Duration::from_secs(30));
    }

    #[test]
    fn constant_schedule() {
        let backoff = PollBackoff {
            initial_delay: Duration::from_millis(10),
            multiplier: 1.0,
            max_delay: Duration::from_millis(10),
        };
        assert_eq!(backoff.delay(1), backoff.delay(50));
    }
}
