use rand::Rng;
use std::time::Duration;

/// Default number of attempts per request (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);

/// Default cap on a single backoff sleep.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

/// Default jitter factor (0.0 = no jitter, 1.0 = full jitter).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.3;

/// Exponent cap so `2^n` never overflows.
const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Bounded retry with exponential backoff and jitter for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is at least 1 and `max_delay` never
    /// drops below `base_delay`.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }

    /// Set the jitter factor, clamped to `0.0..=1.0`.
    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = if factor.is_finite() {
            factor.clamp(0.0, 1.0)
        } else {
            DEFAULT_JITTER_FACTOR
        };
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// True when a request that has already failed `attempts_made` times may
    /// be tried again.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Un-jittered delay after the given failed attempt (1-based), capped at
    /// `max_delay`. Non-decreasing in `attempt`.
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let multiplier = 2_u32.saturating_pow(exponent);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay to sleep after the given failed attempt (1-based).
    ///
    /// Jitter only shortens the sleep: the result lies in
    /// `[ceiling * (1 - jitter), ceiling]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt);
        if self.jitter_factor == 0.0 || ceiling.is_zero() {
            return ceiling;
        }
        let reduction = rand::thread_rng().gen_range(0.0..=self.jitter_factor);
        ceiling.mul_f64(1.0 - reduction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth_and_cap() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(policy.backoff_ceiling(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_ceiling(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_ceiling(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_ceiling(4), Duration::from_millis(500));
        assert_eq!(policy.backoff_ceiling(40), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1))
            .with_jitter_factor(0.5);
        for attempt in 1..=3 {
            let ceiling = policy.backoff_ceiling(attempt);
            for _ in 0..50 {
                let delay = policy.delay_for(attempt);
                assert!(delay <= ceiling);
                assert!(delay >= ceiling.mul_f64(0.5));
            }
        }
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let policy = RetryPolicy::new(3, Duration::from_millis(50), Duration::from_secs(1))
            .with_jitter_factor(0.0);
        assert_eq!(policy.delay_for(2), Duration::from_millis(100));
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10), Duration::from_millis(1));
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.should_retry(1));

        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
