//! Sliding-window request rate limiter (§4.2).

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Limits requests to `capacity` tokens per `window`, sliding rather than
/// fixed-bucket: an `acquire` blocks until enough old timestamps have
/// aged out of the window to admit the new cost.
pub struct SlidingWindowLimiter {
    capacity: u32,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self { capacity, window, timestamps: Mutex::new(VecDeque::new()) }
    }

    /// Block until `cost` tokens are available, then consume them.
    pub async fn acquire(&self, cost: u32) {
        loop {
            let wait = {
                let mut timestamps = self.timestamps.lock().await;
                let now = Instant::now();
                while let Some(&front) = timestamps.front() {
                    if now.duration_since(front) > self.window {
                        timestamps.pop_front();
                    } else {
                        break;
                    }
                }
                if timestamps.len() as u32 + cost <= self.capacity {
                    for _ in 0..cost {
                        timestamps.push_back(now);
                    }
                    return;
                }
                // Wait until the oldest entry ages out.
                timestamps.front().map(|front| self.window.saturating_sub(now.duration_since(*front)))
            };
            match wait {
                Some(d) if !d.is_zero() => tokio::time::sleep(d).await,
                _ => tokio::task::yield_now().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_requests_up_to_capacity_without_blocking() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_millis(200));
        let start = Instant::now();
        limiter.acquire(1).await;
        limiter.acquire(1).await;
        limiter.acquire(1).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn blocks_until_window_clears() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_millis(50));
        limiter.acquire(1).await;
        let start = Instant::now();
        limiter.acquire(1).await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
