use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding-window rate limiter: at most `max_requests` per `window`.
///
/// Non-blocking by design. The federation skips a source that is out of
/// slots instead of queueing behind it, so `try_acquire` either claims a
/// slot or reports the source as momentarily rate limited.
pub struct RateLimiter {
    timestamps: Mutex<VecDeque<Instant>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Mutex::new(VecDeque::new()),
            max_requests,
            window,
        }
    }

    /// Claim a request slot, returning false when the window is full.
    pub fn try_acquire(&self) -> bool {
        let mut ts = self.timestamps.lock().expect("rate limiter poisoned");
        let now = Instant::now();

        while let Some(&front) = ts.front() {
            if now.duration_since(front) >= self.window {
                ts.pop_front();
            } else {
                break;
            }
        }

        if ts.len() < self.max_requests {
            ts.push_back(now);
            true
        } else {
            false
        }
    }

    /// Slots still open in the current window.
    pub fn available(&self) -> usize {
        let mut ts = self.timestamps.lock().expect("rate limiter poisoned");
        let now = Instant::now();
        while let Some(&front) = ts.front() {
            if now.duration_since(front) >= self.window {
                ts.pop_front();
            } else {
                break;
            }
        }
        self.max_requests.saturating_sub(ts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_and_reports_full_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.available(), 0);
    }

    #[test]
    fn window_expiry_frees_slots() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.try_acquire());
    }
}
