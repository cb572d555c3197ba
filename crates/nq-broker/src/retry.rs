//! # Retry Policy Module
//!
//! Attempt budgets and delays for broker connects, publishes and in-place
//! handler retries.
//!
//! A policy counts *attempts*, including the first one. Broker operations use
//! a fixed spacing (`RETRY_COUNT` attempts, `RETRY_WAIT` apart); handler
//! retries use exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Retry policy configuration
///
/// # Examples
///
/// ```rust
/// use nq_broker::retry::RetryPolicy;
/// use std::time::Duration;
///
/// // Broker default: 3 attempts, 5s apart
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_attempts, 3);
///
/// // Exponential policy for handler retries
/// let policy = RetryPolicy::exponential(4, Duration::from_millis(200), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_delay: Duration,

    /// Maximum delay between attempts
    pub max_delay: Duration,

    /// Growth factor applied per attempt (1.0 keeps the spacing fixed)
    pub backoff_multiplier: f64,

    /// Whether to add jitter to delays
    pub use_jitter: bool,

    /// Jitter range as percentage (0.25 = ±25%)
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(crate::RETRY_COUNT, crate::RETRY_WAIT)
    }
}

impl RetryPolicy {
    /// Fixed spacing between attempts, no jitter
    pub fn fixed(max_attempts: u32, wait: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: wait,
            max_delay: wait,
            backoff_multiplier: 1.0,
            use_jitter: false,
            jitter_percent: 0.0,
        }
    }

    /// Exponential backoff (multiplier 2.0) with ±25% jitter
    pub fn exponential(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
            backoff_multiplier: 2.0,
            use_jitter: true,
            jitter_percent: 0.25,
        }
    }

    /// Disable jitter
    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Set custom jitter percentage (0.0 to 1.0)
    pub fn with_jitter_percent(mut self, percent: f64) -> Self {
        self.jitter_percent = percent.clamp(0.0, 1.0);
        self.use_jitter = self.jitter_percent > 0.0;
        self
    }

    /// Delay to wait after the given failed attempt (1-based)
    ///
    /// `delay = initial * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        let capped_delay_secs = base_delay_secs.min(self.max_delay.as_secs_f64());

        let final_delay_secs = if self.use_jitter {
            Self::add_jitter(capped_delay_secs, self.jitter_percent)
        } else {
            capped_delay_secs
        };

        Duration::from_secs_f64(final_delay_secs)
    }

    /// Whether another attempt is allowed after `attempt` attempts were made
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    fn add_jitter(delay_secs: f64, jitter_percent: f64) -> f64 {
        let jitter_range = delay_secs * jitter_percent;
        if jitter_range <= 0.0 {
            return delay_secs;
        }

        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(-jitter_range..=jitter_range);

        (delay_secs + jitter).max(0.0)
    }
}

/// Attempt counter driven by a policy
#[derive(Debug, Clone)]
pub struct RetryState {
    /// Attempts made so far
    pub attempts: u32,
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryState {
    pub fn new() -> Self {
        Self { attempts: 0 }
    }

    /// Record an attempt
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Whether the policy allows another attempt
    pub fn can_retry(&self, policy: &RetryPolicy) -> bool {
        policy.should_retry(self.attempts)
    }

    /// Delay before the next attempt
    pub fn next_delay(&self, policy: &RetryPolicy) -> Duration {
        policy.delay_after(self.attempts)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
