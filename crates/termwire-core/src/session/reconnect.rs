//! Reconnection policy for termwire sessions.
//!
//! Counts consecutive failed attempts and decides whether, and after how
//! long, the next attempt runs. Delays are monotonic non-decreasing in the
//! attempt number and never exceed the configured maximum.

use std::time::Duration;

use tracing::debug;

use super::config::{BackoffStrategy, ReconnectConfig};

/// Decision taken after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule attempt `attempt + 1` after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Budget spent; the session becomes terminal.
    Exhausted { attempts: u32 },
}

/// Bounded retry budget with linear or exponential backoff.
#[derive(Debug, Clone)]
pub struct ReconnectionPolicy {
    config: ReconnectConfig,
    /// Consecutive failures since the last successful open.
    attempts: u32,
}

impl ReconnectionPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Consecutive failures since the last success or reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Delay before the retry that follows failure number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = self.config.base_delay;
        let delay = match self.config.strategy {
            BackoffStrategy::Linear => base.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                // 2^31 already overflows any sane cap.
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }
        };
        delay.min(self.config.max_delay)
    }

    /// Record a failed attempt and decide what happens next.
    pub fn record_failure(&mut self) -> RetryDecision {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= self.config.max_attempts {
            debug!(attempts = self.attempts, "Reconnection budget exhausted");
            return RetryDecision::Exhausted {
                attempts: self.attempts,
            };
        }
        let delay = self.delay_for(self.attempts);
        debug!(
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnection"
        );
        RetryDecision::Retry {
            attempt: self.attempts,
            delay,
        }
    }

    /// Reset the budget after a successful open or an explicit connect.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config(strategy: BackoffStrategy, max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts,
            strategy,
        }
    }

    #[test]
    fn linear_delays() {
        let policy = ReconnectionPolicy::new(config(BackoffStrategy::Linear, 5));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(3));
    }

    #[test]
    fn exponential_delays_capped() {
        let policy = ReconnectionPolicy::new(config(BackoffStrategy::Exponential, 50));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(16));
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
    }

    #[test]
    fn delays_monotonic_and_bounded() {
        for strategy in [BackoffStrategy::Linear, BackoffStrategy::Exponential] {
            let policy = ReconnectionPolicy::new(config(strategy, 100));
            let mut previous = Duration::ZERO;
            for attempt in 1..100 {
                let delay = policy.delay_for(attempt);
                assert!(delay >= previous, "{strategy:?} attempt {attempt}");
                assert!(delay <= Duration::from_secs(30));
                previous = delay;
            }
        }
    }

    #[test]
    fn budget_exhausts_after_max_attempts() {
        let mut policy = ReconnectionPolicy::new(config(BackoffStrategy::Linear, 3));

        assert_eq!(
            policy.record_failure(),
            RetryDecision::Retry {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            policy.record_failure(),
            RetryDecision::Retry {
                attempt: 2,
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(
            policy.record_failure(),
            RetryDecision::Exhausted { attempts: 3 }
        );
    }

    #[test]
    fn zero_budget_never_retries() {
        let mut policy = ReconnectionPolicy::new(config(BackoffStrategy::Linear, 0));
        assert_eq!(
            policy.record_failure(),
            RetryDecision::Exhausted { attempts: 1 }
        );
    }

    #[test]
    fn reset_restores_budget() {
        let mut policy = ReconnectionPolicy::new(config(BackoffStrategy::Linear, 2));
        policy.record_failure();
        assert_eq!(policy.attempts(), 1);

        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert!(matches!(
            policy.record_failure(),
            RetryDecision::Retry { attempt: 1, .. }
        ));
    }
}
