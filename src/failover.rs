use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::clock::Clock;
use crate::config::{BackoffPolicy, DispatcherConfig};
use crate::telemetry::{
    metric_inc, metric_inc_backend, trace_attempt_failed, trace_backoff, trace_event,
};
use crate::tracker::ClaimGuard;
use crate::types::DeliveryStatus;

/// Per-backend retry budget plus the delay schedule between retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per backend before failing over.
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
}

impl From<&DispatcherConfig> for RetryPolicy {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: config.backoff.clone(),
        }
    }
}

/// Drives one message through the ordered backend list.
///
/// For each backend in priority order, attempt up to `max_retries` times,
/// sleeping `backoff.delay_for(n)` after the n-th failure if another try on
/// the same backend remains. No delay precedes the first attempt or a
/// switch to the next backend. The first success ends the walk.
///
/// Holds no per-message state; everything arrives with the call.
pub struct FailoverDispatcher {
    clock: Arc<dyn Clock>,
}

impl FailoverDispatcher {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Run the retry/failover loop and settle the claim with the result.
    ///
    /// `cancel` is honoured before every attempt and during every backoff
    /// sleep; a backend call already in progress is allowed to finish.
    pub async fn dispatch(
        &self,
        mut claim: ClaimGuard,
        payload: &[u8],
        backends: &[Arc<dyn Backend>],
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> DeliveryStatus {
        let status = self.run(&mut claim, payload, backends, policy, cancel).await;
        claim.settle(status)
    }

    async fn run(
        &self,
        claim: &mut ClaimGuard,
        payload: &[u8],
        backends: &[Arc<dyn Backend>],
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> DeliveryStatus {
        let id = claim.id().clone();

        for (index, backend) in backends.iter().enumerate() {
            if index > 0 {
                metric_inc_backend("dispatch.failover", backend.name());
                trace_event("failing over to next backend", &id);
            }

            let mut attempt = 0u32;
            while attempt < policy.max_retries {
                if cancel.is_cancelled() {
                    return DeliveryStatus::Cancelled {
                        attempts: claim.attempts(),
                    };
                }

                attempt += 1;
                claim.record_attempt();

                match backend.attempt_delivery(payload).await {
                    Ok(receipt) => {
                        metric_inc_backend("dispatch.attempt.success", &receipt.backend_name);
                        return DeliveryStatus::Sent {
                            backend_name: receipt.backend_name,
                            attempts: attempt,
                        };
                    }
                    Err(err) => {
                        metric_inc_backend("dispatch.attempt.failure", backend.name());
                        trace_attempt_failed(&id, backend.name(), attempt, &err);

                        if attempt < policy.max_retries {
                            let delay = policy.backoff.jittered_delay_for(attempt);
                            trace_backoff(&id, backend.name(), delay);
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => {
                                    return DeliveryStatus::Cancelled {
                                        attempts: claim.attempts(),
                                    };
                                }
                                _ = self.clock.sleep(delay) => {}
                            }
                        }
                    }
                }
            }
        }

        metric_inc("dispatch.exhausted");
        // Every backend is charged its full budget.
        let backend_count = u32::try_from(backends.len()).unwrap_or(u32::MAX);
        DeliveryStatus::Failed {
            attempts: policy.max_retries.saturating_mul(backend_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::clock::ManualClock;
    use crate::error::TransientError;
    use crate::tracker::{Claim, DeliveryTracker};
    use crate::types::{BackendName, DeliveryReceipt, MessageId};

    /// Replays a fixed script of outcomes, then keeps failing.
    struct Scripted {
        name: BackendName,
        script: Mutex<VecDeque<bool>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(name: &str, script: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                name: BackendName::new(name),
                script: Mutex::new(script.iter().copied().collect()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Backend for Scripted {
        fn name(&self) -> &BackendName {
            &self.name
        }

        async fn attempt_delivery(&self, _payload: &[u8]) -> Result<DeliveryReceipt, TransientError> {
            *self.calls.lock().unwrap() += 1;
            let ok = self.script.lock().unwrap().pop_front().unwrap_or(false);
            if ok {
                Ok(DeliveryReceipt {
                    backend_name: self.name.clone(),
                })
            } else {
                Err(TransientError::new("scripted failure"))
            }
        }
    }

    fn claim(tracker: &Arc<DeliveryTracker>, id: &str) -> ClaimGuard {
        match tracker.try_claim(&MessageId::new(id)) {
            Claim::Claimed(guard) => guard,
            _ => panic!("identity should be free"),
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: BackoffPolicy::default(),
        }
    }

    #[tokio::test]
    async fn first_attempt_success_needs_no_sleep() {
        let clock = Arc::new(ManualClock::new());
        let dispatcher = FailoverDispatcher::new(clock.clone());
        let tracker = Arc::new(DeliveryTracker::new());
        let a = Scripted::new("a", &[true]);
        let backends: Vec<Arc<dyn Backend>> = vec![a.clone()];

        let status = dispatcher
            .dispatch(claim(&tracker, "m"), b"x", &backends, &policy(3), &CancellationToken::new())
            .await;

        assert_eq!(status, DeliveryStatus::sent("a", 1));
        assert!(clock.sleeps().is_empty());
        assert_eq!(tracker.get(&MessageId::new("m")), status);
    }

    #[tokio::test]
    async fn attempts_reset_per_backend() {
        let clock = Arc::new(ManualClock::new());
        let dispatcher = FailoverDispatcher::new(clock.clone());
        let tracker = Arc::new(DeliveryTracker::new());
        let a = Scripted::new("a", &[]);
        let b = Scripted::new("b", &[false, true]);
        let backends: Vec<Arc<dyn Backend>> = vec![a.clone(), b.clone()];

        let status = dispatcher
            .dispatch(claim(&tracker, "m"), b"x", &backends, &policy(3), &CancellationToken::new())
            .await;

        assert_eq!(status, DeliveryStatus::sent("b", 2));
        assert_eq!(a.calls(), 3);
        assert_eq!(b.calls(), 2);
        // Two sleeps on `a`, none on the switch, one on `b`.
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(100),
            ]
        );
    }

    #[tokio::test]
    async fn exhaustion_charges_full_budget_per_backend() {
        let clock = Arc::new(ManualClock::new());
        let dispatcher = FailoverDispatcher::new(clock.clone());
        let tracker = Arc::new(DeliveryTracker::new());
        let backends: Vec<Arc<dyn Backend>> =
            vec![Scripted::new("a", &[]), Scripted::new("b", &[]), Scripted::new("c", &[])];

        let status = dispatcher
            .dispatch(claim(&tracker, "m"), b"x", &backends, &policy(4), &CancellationToken::new())
            .await;

        assert_eq!(status, DeliveryStatus::Failed { attempts: 12 });
        let per_backend = vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
        ];
        assert_eq!(clock.sleeps(), per_backend.repeat(3));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_attempt() {
        let clock = Arc::new(ManualClock::new());
        let dispatcher = FailoverDispatcher::new(clock);
        let tracker = Arc::new(DeliveryTracker::new());
        let a = Scripted::new("a", &[true]);
        let backends: Vec<Arc<dyn Backend>> = vec![a.clone()];
        let cancel = CancellationToken::new();
        cancel.cancel();

        let status = dispatcher
            .dispatch(claim(&tracker, "m"), b"x", &backends, &policy(3), &cancel)
            .await;

        assert_eq!(status, DeliveryStatus::Cancelled { attempts: 0 });
        assert_eq!(a.calls(), 0);
        assert!(!tracker.is_in_flight(&MessageId::new("m")));
    }
}
