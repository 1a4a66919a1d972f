//! # Retry Backoff
//!
//! Capped exponential delay used by every "block until available" wait:
//! input device acquisition and serial link (re)connection.

use std::time::Duration;

/// Doubling retry delay, capped at a maximum.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rover_bridge::retry::Backoff;
///
/// let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(1));
/// assert_eq!(backoff.next_delay(), Duration::from_millis(500));
/// assert_eq!(backoff.next_delay(), Duration::from_secs(1));
/// assert_eq!(backoff.next_delay(), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    max: Duration,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Creates a backoff starting at `initial`. A `max` below `initial` behaves as a fixed interval.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            max,
            current: initial,
            attempts: 0,
        }
    }

    /// Creates a backoff that always waits `interval`.
    #[must_use]
    pub fn fixed(interval: Duration) -> Self {
        Self::new(interval, interval)
    }

    /// Returns the delay to wait before the next attempt and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Number of delays handed out so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(700));
        let delays: Vec<_> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 700, 700]);
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn test_fixed_backoff_never_grows() {
        let mut backoff = Backoff::fixed(Duration::from_secs(2));
        for _ in 0..4 {
            assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        }
    }

    #[test]
    fn test_max_below_initial_is_fixed() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_attempts_count_from_zero() {
        let mut backoff = Backoff::fixed(Duration::from_secs(2));
        assert_eq!(backoff.attempts(), 0);
        backoff.next_delay();
        assert_eq!(backoff.attempts(), 1);
    }
}
