use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::clock::Clock;
use crate::config::RateLimit;

/// Sliding-window rate limiter.
///
/// Keeps the timestamps of prior admissions. Each check drops entries that
/// have aged out of the window, then admits only if fewer than `limit`
/// remain. The prune, count and append happen under one lock with no
/// suspension point, so concurrent callers can never push the window
/// above `limit`.
pub struct RateLimiter {
    limit: u32,
    interval: Duration,
    clock: Arc<dyn Clock>,
    window: Mutex<VecDeque<Duration>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub limit: u32,
    pub interval: Duration,
    /// Admissions still inside the trailing window.
    pub in_window: usize,
}

impl RateLimiter {
    pub fn new(rate_limit: &RateLimit, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit: rate_limit.limit,
            interval: rate_limit.interval,
            clock,
            window: Mutex::new(VecDeque::with_capacity(rate_limit.limit.min(1024) as usize)),
        }
    }

    pub fn is_allowed(&self) -> bool {
        let now = self.clock.now();
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        self.prune(&mut window, now);

        if window.len() < self.limit as usize {
            window.push_back(now);
            true
        } else {
            false
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        let now = self.clock.now();
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        self.prune(&mut window, now);
        RateLimiterStats {
            limit: self.limit,
            interval: self.interval,
            in_window: window.len(),
        }
    }

    // An entry exactly `interval` old is already outside the window, so a
    // zero interval empties it on every check.
    fn prune(&self, window: &mut VecDeque<Duration>, now: Duration) {
        while let Some(&oldest) = window.front() {
            if now.saturating_sub(oldest) >= self.interval {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}
