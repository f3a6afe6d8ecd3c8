use std::time::Duration;

use serde::Deserialize;

/// Bounded exponential backoff for work that must wait on the engine.
///
/// Attempts are counted, not timed: once `max_attempts` delays have been
/// handed out the budget is exhausted and the caller gives up.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays. `1` gives a fixed interval.
    pub multiplier: u32,
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// A fixed interval, `max_attempts` times.
    pub fn fixed(delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            initial_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            multiplier: 1,
            max_attempts,
        }
    }

    pub fn budget(&self) -> RetryBudget {
        RetryBudget {
            policy: *self,
            attempts: 0,
            next_delay_ms: self.initial_delay_ms,
        }
    }

    /// Upper bound on the total time a full budget can spend waiting.
    pub fn worst_case_wait(&self) -> Duration {
        let mut budget = self.budget();
        let mut total = Duration::ZERO;
        while let Some(delay) = budget.next_delay() {
            total += delay;
        }
        total
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 4_000,
            multiplier: 2,
            max_attempts: 20,
        }
    }
}

/// The remaining attempts of one [`RetryPolicy`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryBudget {
    policy: RetryPolicy,
    attempts: u32,
    next_delay_ms: u64,
}

impl RetryBudget {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    /// Consumes one attempt and returns how long to wait before making it.
    ///
    /// Returns `None` once the budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;

        let delay = self.next_delay_ms;
        let cap = self.policy.max_delay_ms.max(self.policy.initial_delay_ms);
        self.next_delay_ms = delay
            .saturating_mul(u64::from(self.policy.multiplier.max(1)))
            .min(cap);
        Some(Duration::from_millis(delay))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RetryPolicy;

    #[test]
    fn delays_grow_until_capped() {
        let mut budget = RetryPolicy::default().budget();
        let delays: Vec<u64> = (0..6)
            .map(|_| budget.next_delay().unwrap().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![500, 1_000, 2_000, 4_000, 4_000, 4_000]);
        assert_eq!(budget.attempts(), 6);
    }

    #[test]
    fn budget_is_exhausted_after_max_attempts() {
        let mut budget = RetryPolicy::fixed(500, 2).budget();
        assert_eq!(budget.next_delay(), Some(Duration::from_millis(500)));
        assert_eq!(budget.next_delay(), Some(Duration::from_millis(500)));
        assert!(budget.is_exhausted());
        assert_eq!(budget.next_delay(), None);
    }

    #[test]
    fn zero_attempts_never_waits() {
        let policy = RetryPolicy::fixed(500, 0);
        assert!(policy.budget().is_exhausted());
        assert_eq!(policy.worst_case_wait(), Duration::ZERO);
    }

    #[test]
    fn worst_case_wait_sums_every_delay() {
        let policy = RetryPolicy {
            initial_delay_ms: 100,
            max_delay_ms: 300,
            multiplier: 2,
            max_attempts: 4,
        };
        // 100 + 200 + 300 + 300
        assert_eq!(policy.worst_case_wait(), Duration::from_millis(900));
    }
}
