use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::clock::{Clock, TokioClock};
use crate::config::DispatcherConfig;
use crate::error::ConfigError;
use crate::failover::{FailoverDispatcher, RetryPolicy};
use crate::rate_limiter::{RateLimiter, RateLimiterStats};
use crate::storage::{InMemoryStorage, Storage};
use crate::telemetry::{metric_inc, trace_event, trace_outcome};
use crate::tracker::{Claim, DeliveryTracker};
use crate::types::{BackendName, DeliveryStatus, MessageId};

/// Composition root: idempotency guard → rate limiter → failover.
///
/// Owns the rate limiter window and the status store for its whole
/// lifetime. All methods take `&self`; wrap the service in an `Arc` to
/// share it between tasks.
pub struct DispatchService {
    backends: Vec<Arc<dyn Backend>>,
    policy: RetryPolicy,
    send_timeout: Option<Duration>,
    rate_limiter: RateLimiter,
    tracker: Arc<DeliveryTracker>,
    failover: FailoverDispatcher,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl DispatchService {
    /// Build a service on the tokio clock with in-memory storage.
    pub fn new(
        config: DispatcherConfig,
        backends: Vec<Arc<dyn Backend>>,
    ) -> Result<Self, ConfigError> {
        Self::new_inner(
            config,
            backends,
            Arc::new(TokioClock::new()),
            Arc::new(InMemoryStorage::new()),
        )
    }

    pub fn new_with_clock(
        config: DispatcherConfig,
        backends: Vec<Arc<dyn Backend>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        Self::new_inner(config, backends, clock, Arc::new(InMemoryStorage::new()))
    }

    /// Build a service backed by `storage`, restoring every stored status.
    ///
    /// Identities already recorded as `Sent` stay short-circuited across
    /// restarts.
    pub async fn new_with_storage(
        config: DispatcherConfig,
        backends: Vec<Arc<dyn Backend>>,
        clock: Arc<dyn Clock>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, ConfigError> {
        let service = Self::new_inner(config, backends, clock, storage.clone())?;
        for (id, status) in storage.load_status().await {
            service.tracker.record_if_absent(&id, status);
        }
        Ok(service)
    }

    fn new_inner(
        config: DispatcherConfig,
        backends: Vec<Arc<dyn Backend>>,
        clock: Arc<dyn Clock>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, ConfigError> {
        if backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }
        let mut seen = HashSet::new();
        for backend in &backends {
            if !seen.insert(backend.name().clone()) {
                return Err(ConfigError::DuplicateBackend {
                    name: backend.name().clone(),
                });
            }
        }
        config.validate()?;

        Ok(Self {
            backends,
            policy: RetryPolicy::from(&config),
            send_timeout: config.send_timeout,
            rate_limiter: RateLimiter::new(&config.rate_limit, clock.clone()),
            tracker: Arc::new(DeliveryTracker::new()),
            failover: FailoverDispatcher::new(clock.clone()),
            storage,
            clock,
            shutdown: CancellationToken::new(),
        })
    }

    /// Deliver `payload` under `id`, at most once.
    ///
    /// Resolves once the message reaches a status for this call. Never
    /// fails: every delivery problem is reported through the status.
    pub async fn send(
        &self,
        id: impl Into<MessageId>,
        payload: impl AsRef<[u8]>,
    ) -> DeliveryStatus {
        self.send_with_cancel(id, payload, &CancellationToken::new()).await
    }

    /// Like [`send`](Self::send), but stops at the next attempt or backoff
    /// boundary once `cancel` fires, returning `Cancelled`.
    ///
    /// A call that finds `id` in flight elsewhere waits for that call
    /// without dispatching. `cancel`, shutdown and the send timeout still
    /// end the wait, returning `Cancelled { attempts: 0 }`. If the other
    /// call ends `Cancelled` or `RateLimited`, this one claims `id` itself.
    pub async fn send_with_cancel(
        &self,
        id: impl Into<MessageId>,
        payload: impl AsRef<[u8]>,
        cancel: &CancellationToken,
    ) -> DeliveryStatus {
        let id = id.into();
        metric_inc("dispatch.send.total");
        let deadline = self.send_timeout.map(|t| self.clock.now().saturating_add(t));

        let guard = loop {
            match self.tracker.try_claim(&id) {
                Claim::AlreadySent(status) => {
                    metric_inc("dispatch.send.short_circuit");
                    trace_event("already sent, skipping dispatch", &id);
                    return status;
                }
                Claim::InFlight(waiter) => {
                    trace_event("waiting on in-flight duplicate", &id);
                    let settled = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        _ = self.shutdown.cancelled() => None,
                        _ = self.sleep_until(deadline) => None,
                        status = waiter.wait() => Some(status),
                    };
                    match settled {
                        Some(status) if status.is_terminal() => return status,
                        // The owner was cancelled or denied admission;
                        // this call gets its own chance.
                        Some(_) => continue,
                        None => {
                            // The identity still belongs to the other call,
                            // so nothing is recorded for this one.
                            let status = DeliveryStatus::Cancelled { attempts: 0 };
                            metric_inc("dispatch.cancelled");
                            trace_outcome(&id, &status);
                            return status;
                        }
                    }
                }
                Claim::Claimed(guard) => break guard,
            }
        };

        if self.shutdown.is_cancelled() || cancel.is_cancelled() {
            let status = guard.settle(DeliveryStatus::Cancelled { attempts: 0 });
            return self.finish(&id, status).await;
        }

        if !self.rate_limiter.is_allowed() {
            metric_inc("dispatch.rate_limited");
            let status = guard.settle(DeliveryStatus::rate_limited());
            return self.finish(&id, status).await;
        }

        let token = cancel.child_token();
        let dispatch = self.failover.dispatch(
            guard,
            payload.as_ref(),
            &self.backends,
            &self.policy,
            &token,
        );
        let watcher = async {
            tokio::select! {
                _ = self.shutdown.cancelled() => {}
                _ = self.sleep_until(deadline) => {}
            }
            token.cancel();
            std::future::pending::<Infallible>().await
        };

        let status = tokio::select! {
            biased;
            status = dispatch => status,
            never = watcher => match never {},
        };
        self.finish(&id, status).await
    }

    /// Current status for `id`; `Unknown` if it was never sent.
    pub fn get_status(&self, id: impl Into<MessageId>) -> DeliveryStatus {
        self.tracker.get(&id.into())
    }

    pub fn statuses(&self) -> HashMap<MessageId, DeliveryStatus> {
        self.tracker.snapshot()
    }

    pub fn rate_limiter_stats(&self) -> RateLimiterStats {
        self.rate_limiter.stats()
    }

    pub fn backend_names(&self) -> Vec<BackendName> {
        self.backends.iter().map(|b| b.name().clone()).collect()
    }

    /// Cancel every in-flight send. Later sends return
    /// `Cancelled { attempts: 0 }` without dispatching.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Resolve once the send deadline passes; never without one.
    async fn sleep_until(&self, deadline: Option<Duration>) {
        match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_sub(self.clock.now());
                self.clock.sleep(remaining).await;
            }
            None => std::future::pending().await,
        }
    }

    async fn finish(&self, id: &MessageId, status: DeliveryStatus) -> DeliveryStatus {
        self.storage.record_status(id, &status).await;
        match &status {
            DeliveryStatus::Sent { .. } => metric_inc("dispatch.sent"),
            DeliveryStatus::Failed { .. } => metric_inc("dispatch.failed"),
            DeliveryStatus::Cancelled { .. } => metric_inc("dispatch.cancelled"),
            DeliveryStatus::RateLimited { .. } | DeliveryStatus::Unknown => {}
        }
        trace_outcome(id, &status);
        status
    }
}
