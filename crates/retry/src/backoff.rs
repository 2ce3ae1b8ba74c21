use std::time::Duration;

/// Delay schedule `initial * multiplier^attempt`, capped at `max`
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: 2.0,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay before retry number `attempt` (0-based), capped at `max`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial.min(self.max);
        }

        let multiplier = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let delay_ms = self.initial.as_millis() as f64 * multiplier;
        let delay_ms = delay_ms.min(self.max.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_progression() {
        let backoff = ExponentialBackoff::default();

        assert_eq!(backoff.delay_for_attempt(0), Duration::from_secs(60));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(120));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_secs(240));
    }

    #[test]
    fn test_exponential_backoff_max_cap() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(60), Duration::from_secs(600));

        assert_eq!(backoff.delay_for_attempt(3), Duration::from_secs(480));
        assert_eq!(backoff.delay_for_attempt(4), Duration::from_secs(600));
        assert_eq!(backoff.delay_for_attempt(40), Duration::from_secs(600));
    }

    #[test]
    fn test_exponential_backoff_custom_multiplier() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(10))
            .with_multiplier(3.0);

        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(300));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(900));
    }

    #[test]
    fn test_zero_initial_delay_stays_zero() {
        let backoff = ExponentialBackoff::new(Duration::ZERO, Duration::from_secs(10));
        assert_eq!(backoff.delay_for_attempt(5), Duration::ZERO);
    }
}
