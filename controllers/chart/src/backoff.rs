//! # Exponential Backoff
//!
//! Provides a doubling backoff mechanism for reconciliation retries.
//! The sequence doubles from a minimum up to a ceiling, so transient cluster
//! errors are retried quickly at first and then progressively less often.
//!
//! Default sequence for reconciliation errors: 1m, 2m, 4m, 8m, 10m (max).

use std::time::Duration;

/// Exponential backoff calculator
///
/// Each backoff is double the previous one, capped at `max_seconds`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Minimum backoff value in seconds (for reset)
    min_seconds: u64,
    /// Current backoff value in seconds
    current_seconds: u64,
    /// Maximum backoff value in seconds
    max_seconds: u64,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with the given bounds in seconds.
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Get the next backoff duration in seconds and advance the sequence.
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_seconds;
        self.current_seconds = self
            .current_seconds
            .saturating_mul(2)
            .min(self.max_seconds);
        result
    }

    /// Get the next backoff duration as a `Duration` and advance the sequence.
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Reset the backoff to the initial state.
    pub fn reset(&mut self) {
        self.current_seconds = self.min_seconds;
    }

    /// Calculate the backoff duration for a given error count (stateless).
    ///
    /// Returns `min * 2^error_count`, capped at `max_seconds`. Useful for
    /// one-off calculations where no per-resource state is kept.
    #[must_use]
    pub fn for_error_count(error_count: u32, min_seconds: u64, max_seconds: u64) -> Duration {
        let factor = 1u64.checked_shl(error_count).unwrap_or(u64::MAX);
        let seconds = min_seconds.saturating_mul(factor).min(max_seconds);
        Duration::from_secs(seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let mut backoff = ExponentialBackoff::new(60, 600);

        // Reconciliation error sequence: 1m, 2m, 4m, 8m, 10m (max)
        assert_eq!(backoff.next_backoff_seconds(), 60);
        assert_eq!(backoff.next_backoff_seconds(), 120);
        assert_eq!(backoff.next_backoff_seconds(), 240);
        assert_eq!(backoff.next_backoff_seconds(), 480);
        assert_eq!(backoff.next_backoff_seconds(), 600);
    }

    #[test]
    fn test_exponential_backoff_max_cap() {
        let mut backoff = ExponentialBackoff::new(60, 600);

        for _ in 0..10 {
            backoff.next_backoff_seconds();
        }
        // Should stay at max
        assert_eq!(backoff.next_backoff_seconds(), 600);
        assert_eq!(backoff.next_backoff_seconds(), 600);
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff = ExponentialBackoff::new(60, 600);

        assert_eq!(backoff.next_backoff_seconds(), 60);
        assert_eq!(backoff.next_backoff_seconds(), 120);

        backoff.reset();

        // Should restart from the beginning after success
        assert_eq!(backoff.next_backoff_seconds(), 60);
        assert_eq!(backoff.next_backoff_seconds(), 120);
    }

    #[test]
    fn test_for_error_count() {
        assert_eq!(
            ExponentialBackoff::for_error_count(0, 60, 600),
            Duration::from_secs(60)
        );
        assert_eq!(
            ExponentialBackoff::for_error_count(2, 60, 600),
            Duration::from_secs(240)
        );
        // Capped at the ceiling, no overflow for absurd counts
        assert_eq!(
            ExponentialBackoff::for_error_count(40, 60, 600),
            Duration::from_secs(600)
        );
        assert_eq!(
            ExponentialBackoff::for_error_count(200, 60, 600),
            Duration::from_secs(600)
        );
    }
}
