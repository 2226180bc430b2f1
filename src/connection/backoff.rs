//! Bounded exponential reconnect delay.

use std::time::Duration;

/// Delay between reconnect attempts. Grows by `factor` after each use and
/// stays at `max` once reached.
#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    factor: u32,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, factor: u32) -> Self {
        Self {
            initial,
            max,
            factor,
            current: initial,
        }
    }

    /// The delay the next failure will wait.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Return the delay to wait now and grow the next one.
    pub fn advance(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(self.factor).min(self.max);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grows_until_ceiling() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(300), 2);
        let delays: Vec<u64> = (0..12).map(|_| backoff.advance().as_secs()).collect();
        assert_eq!(
            delays,
            vec![1, 2, 4, 8, 16, 32, 64, 128, 256, 300, 300, 300]
        );
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 3);
        backoff.advance();
        backoff.advance();
        assert_eq!(backoff.current(), Duration::from_millis(900));
        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_millis(100));
    }
}
