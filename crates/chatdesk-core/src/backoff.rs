//! Bounded retry schedule
//!
//! A pure description of "try at most N times, waiting a linearly growing,
//! capped delay in between". No timers live here; callers decide how to wait.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy with a linear, capped delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay growth per attempt in milliseconds
    pub step_ms: u64,
    /// Upper bound for a single delay in milliseconds
    pub cap_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            step_ms: 1000,
            cap_ms: 3000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let raw = u64::from(attempt).saturating_mul(self.step_ms);
        Duration::from_millis(raw.min(self.cap_ms))
    }

    /// Start a fresh retry sequence
    pub fn start(&self) -> RetryState {
        RetryState {
            policy: *self,
            attempts: 0,
        }
    }
}

/// Progress through a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetryState {
    /// Record a failed attempt.
    ///
    /// Returns the delay before the next attempt, or `None` once the policy is
    /// exhausted.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= self.policy.max_attempts {
            None
        } else {
            Some(self.policy.delay_after(self.attempts))
        }
    }

    /// Number of failed attempts recorded so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }
}
