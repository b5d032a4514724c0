//! Reconnect backoff policy
//!
//! The delay doubles from the base each attempt and saturates at the
//! cap. The policy is serialized into the session hello frame so every
//! client backs off the same way; the server itself never waits on it,
//! it only tolerates reconnects as brand-new sessions.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client reconnect policy advertised in the hello frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    /// Attempt 0 is treated as the first attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // Exponent capped at 32 so the factor itself cannot overflow
        let exp = attempt.saturating_sub(1).min(32);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_from_base() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(4000));
    }

    #[test]
    fn delay_saturates_at_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(7), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for(100), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn attempt_zero_counts_as_first() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
    }
}
