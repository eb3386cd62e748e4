//! Reconnect backoff schedule.
//!
//! Starts at 1 s, doubles on each consecutive failure, caps at the
//! configured maximum, and applies ±20 % jitter. The owning session resets
//! the schedule after a connection that held for at least
//! [`Backoff::RESET_AFTER`].

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Initial delay before the first retry.
    pub const INITIAL: Duration = Duration::from_secs(1);

    /// An `Open` that lasted at least this long resets the schedule.
    pub const RESET_AFTER: Duration = Duration::from_secs(10);

    #[must_use]
    pub const fn new(max: Duration) -> Self {
        Self {
            initial: Self::INITIAL,
            max,
            current: Self::INITIAL,
        }
    }

    /// The next base delay (no jitter): current value, then double for the
    /// following failure, bounded by the cap.
    pub fn next_base(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);
        base
    }

    /// The next delay with ±20 % jitter applied.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.next_base();
        let factor = rand::rng().random_range(0.8..=1.2);
        base.mul_f64(factor)
    }

    /// Back to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_the_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(60));
        let bases: Vec<u64> = (0..9).map(|_| backoff.next_base().as_secs()).collect();
        assert_eq!(bases, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn reset_returns_to_one_second() {
        let mut backoff = Backoff::new(Duration::from_secs(60));
        for _ in 0..5 {
            backoff.next_base();
        }
        backoff.reset();
        assert_eq!(backoff.next_base(), Duration::from_secs(1));
        assert_eq!(backoff.next_base(), Duration::from_secs(2));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let mut backoff = Backoff::new(Duration::from_secs(60));
        for _ in 0..50 {
            backoff.reset();
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(800), "delay {delay:?} too short");
            assert!(delay <= Duration::from_millis(1200), "delay {delay:?} too long");
        }
    }

    #[test]
    fn honors_a_custom_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(5));
        let bases: Vec<u64> = (0..4).map(|_| backoff.next_base().as_secs()).collect();
        assert_eq!(bases, vec![1, 2, 4, 5]);
    }
}
