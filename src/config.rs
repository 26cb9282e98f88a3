use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Sliding-window admission limit.
///
/// At most `limit` sends are admitted within any trailing `interval`.
/// `limit = 0` denies everything; `interval = 0` disables limiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub limit: u32,
    pub interval: Duration,
}

impl RateLimit {
    pub fn new(limit: u32, interval: Duration) -> Self {
        Self { limit, interval }
    }

    pub fn per_millis(limit: u32, interval_ms: u64) -> Self {
        Self::new(limit, Duration::from_millis(interval_ms))
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            limit: 100,
            interval: Duration::from_secs(1),
        }
    }
}

/// Exponential backoff applied between retries of the same backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,

    /// Growth factor applied after every failed attempt.
    pub multiplier: u32,

    /// Optional ceiling for a single delay.
    pub max: Option<Duration>,

    /// Uniform random jitter added on top of each delay.
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            multiplier: 2,
            max: None,
            jitter: Duration::ZERO,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            ..Default::default()
        }
    }

    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = Some(max);
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after the `failures`-th failed attempt on a backend
    /// (1-based), before retrying the same backend. Jitter excluded.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let ceiling = self.max.unwrap_or(Duration::MAX);
        let mut delay = self.base.min(ceiling);
        for _ in 1..failures {
            if delay >= ceiling || self.multiplier <= 1 {
                break;
            }
            delay = delay.saturating_mul(self.multiplier).min(ceiling);
        }
        delay
    }

    pub(crate) fn jittered_delay_for(&self, failures: u32) -> Duration {
        let delay = self.delay_for(failures);
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return delay;
        }
        delay.saturating_add(Duration::from_millis(fastrand::u64(0..=jitter_ms)))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.base.is_zero() {
            return Err(ConfigError::ZeroBackoffBase);
        }
        if self.multiplier == 0 {
            return Err(ConfigError::InvalidMultiplier {
                multiplier: self.multiplier,
            });
        }
        Ok(())
    }
}

/// Dispatcher configuration.
///
/// Backends are passed to the service separately: they are capabilities,
/// not data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Attempts allowed per backend before failing over.
    pub max_retries: u32,

    pub rate_limit: RateLimit,

    pub backoff: BackoffPolicy,

    /// Cancel a send that has not reached a terminal status in time.
    pub send_timeout: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            rate_limit: RateLimit::default(),
            backoff: BackoffPolicy::default(),
            send_timeout: None,
        }
    }
}

impl DispatcherConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_rate_limit(mut self, limit: u32, interval: Duration) -> Self {
        self.rate_limit = RateLimit::new(limit, interval);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        self.backoff.validate()
    }
}
