use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// Source of time for window pruning and backoff sleeps.
///
/// `now` is a monotonic offset from an arbitrary origin; only differences
/// between readings are meaningful.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
///
/// Honours `tokio::time::pause`, so tests using `start_paused` run
/// without real delays.
#[derive(Debug)]
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        Instant::now().duration_since(self.origin)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock for tests.
///
/// Time only moves when [`advance`](ManualClock::advance) is called or a
/// sleep is requested; every requested sleep is recorded and completes
/// immediately after advancing virtual time by its length.
///
/// Concurrent sleepers each push time forward independently, so racing a
/// timeout against a backoff sleep is decided by poll order, not by which
/// deadline is earlier. Use paused tokio time for that.
#[derive(Debug, Default)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    now: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now += by;
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.sleeps.clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).now
    }

    async fn sleep(&self, duration: Duration) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.now += duration;
            state.sleeps.push(duration);
        }
        tokio::task::yield_now().await;
    }
}
