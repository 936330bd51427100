//! Shared rate limiter for cluster API calls.
//!
//! Every call the apply engine issues goes through one of these, so a burst
//! of reconciliations cannot overwhelm the control plane. Callers queue on a
//! slot that advances by a fixed interval per acquisition.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default allowance for cluster API calls.
pub const DEFAULT_CALLS_PER_SECOND: u32 = 20;

#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(calls_per_second: u32) -> Self {
        Self {
            interval: Duration::from_secs(1) / calls_per_second.max(1),
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Waits until the caller may issue an API call.
    pub async fn acquire(&self) {
        let wake = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + self.interval;
            slot
        };
        tokio::time::sleep_until(wake).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_call_is_not_delayed() {
        let limiter = RateLimiter::new(10);
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn calls_are_spaced_by_the_interval() {
        let limiter = RateLimiter::new(10);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
