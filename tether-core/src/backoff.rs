use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Stateful retry-delay calculator: exponential growth with jitter and a
/// ceiling.
///
/// Callers own the reset policy: an attempt that survives longer than
/// [`RetryConfig::reset_after`] "basically worked" and should reset the
/// backoff before the next retry; a shorter-lived failure advances it.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    step: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, step: 0 }
    }

    /// The delay to sleep before the next attempt. Advances the step
    /// counter up to the configured budget.
    pub fn next(&mut self) -> Duration {
        let delay = self.peek();
        if self.step < self.config.max_steps {
            self.step += 1;
        }
        delay
    }

    /// The delay `next()` would currently return, without advancing.
    pub fn peek(&self) -> Duration {
        let base = self.config.initial_delay_ms as f64 * self.config.factor.powi(self.step as i32);
        let capped = base.min(self.config.max_delay_ms as f64);
        let jitter = self.config.jitter_ratio.max(0.0);
        let unit = if jitter > 0.0 {
            rand::rng().random_range(-jitter..=jitter)
        } else {
            0.0
        };
        Duration::from_millis((capped * (1.0 + unit)).round().max(0.0) as u64)
    }

    /// Whether an attempt of the given duration should reset the policy.
    pub fn survived(&self, attempt: Duration) -> bool {
        attempt >= self.config.reset_after()
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }

    #[cfg(test)]
    pub(crate) fn step(&self) -> u32 {
        self.step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RetryConfig {
        RetryConfig::default()
    }

    #[test]
    fn delays_increase_strictly_below_the_ceiling() {
        let mut backoff = Backoff::new(config());
        // With factor 2.0 and jitter 0.1 the jitter bands of consecutive
        // steps cannot overlap, so strict ordering holds even with
        // randomness.
        let first = backoff.next();
        let second = backoff.next();
        let third = backoff.next();
        assert!(second > first, "{second:?} <= {first:?}");
        assert!(third > second, "{third:?} <= {second:?}");
    }

    #[test]
    fn delays_are_capped() {
        let mut backoff = Backoff::new(config());
        for _ in 0..32 {
            backoff.next();
        }
        let capped = backoff.next();
        let ceiling = Duration::from_millis((15_000f64 * 1.1).round() as u64);
        assert!(capped <= ceiling, "{capped:?} exceeds jittered cap");
        assert!(capped >= Duration::from_millis((15_000f64 * 0.9) as u64));
    }

    #[test]
    fn reset_returns_to_the_initial_delay() {
        let mut backoff = Backoff::new(config());
        backoff.next();
        backoff.next();
        backoff.reset();
        assert_eq!(backoff.step(), 0);
        let delay = backoff.next();
        assert!(delay <= Duration::from_millis((50f64 * 1.1).round() as u64));
    }

    #[test]
    fn long_lived_attempts_qualify_for_reset() {
        let backoff = Backoff::new(config());
        assert!(backoff.survived(Duration::from_millis(1_500)));
        assert!(!backoff.survived(Duration::from_millis(400)));
    }
}
