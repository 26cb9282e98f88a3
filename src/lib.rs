//! A best-effort, at-most-once message dispatcher.
//!
//! Given a message identity and a payload, the dispatcher tries an ordered
//! list of interchangeable delivery backends. Each backend gets a bounded
//! number of attempts with exponential backoff between them; when one is
//! exhausted the next takes over. A sliding-window rate limiter caps global
//! throughput, and an identity that was delivered once is never delivered
//! again.
//!
//! ## Guarantees
//! - At most one successful delivery per identity, even under concurrent
//!   `send` calls for the same identity
//! - Admitted sends within any trailing window never exceed the limit
//! - Backends tried strictly in priority order
//! - `send` always returns a status; delivery problems never become errors
//!
//! ## Non-Guarantees
//! - Delivery at all: `Failed`, `RateLimited` and `Cancelled` are normal
//!   outcomes
//! - Durability, unless a persistent [`Storage`] is supplied
//! - Distinguishing retryable from permanent backend failures
//!
//! Backends are supplied by the caller through the [`Backend`] trait.

mod backend;
mod clock;
mod config;
mod error;
mod failover;
mod rate_limiter;
mod service;
mod storage;
mod telemetry;
mod tracker;
mod types;

#[cfg(feature = "redis")]
mod storage_redis;

#[cfg(feature = "postgres")]
mod storage_postgres;

pub use backend::{Backend, SimulatedBackend};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{BackoffPolicy, DispatcherConfig, RateLimit};
pub use error::{ConfigError, TransientError};
pub use failover::{FailoverDispatcher, RetryPolicy};
pub use rate_limiter::{RateLimiter, RateLimiterStats};
pub use service::DispatchService;
pub use storage::{InMemoryStorage, Storage};
pub use tracker::{Claim, ClaimGuard, DeliveryTracker, InFlight};
pub use types::{BackendName, DeliveryReceipt, DeliveryStatus, MessageId};

pub use tokio_util::sync::CancellationToken;

#[cfg(feature = "http")]
pub use backend::HttpBackend;

#[cfg(feature = "redis")]
pub use storage_redis::RedisStorage;

#[cfg(feature = "postgres")]
pub use storage_postgres::PostgresStorage;
