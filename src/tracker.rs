use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

use crate::types::{DeliveryStatus, MessageId};

/// Identity → status store with an atomic in-flight claim.
///
/// A stored `Sent` is never overwritten. Every other status may be
/// replaced by a later dispatch of the same identity.
#[derive(Default)]
pub struct DeliveryTracker {
    entries: Mutex<HashMap<MessageId, Entry>>,
}

#[derive(Default)]
struct Entry {
    status: Option<DeliveryStatus>,
    in_flight: Option<watch::Sender<Option<DeliveryStatus>>>,
}

/// Result of [`DeliveryTracker::try_claim`].
pub enum Claim {
    /// The identity was already delivered; this is the stored status.
    AlreadySent(DeliveryStatus),

    /// Another caller owns the identity right now.
    InFlight(InFlight),

    /// The caller now owns the identity and must settle it.
    Claimed(ClaimGuard),
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically check the identity and, if it is neither sent nor in
    /// flight, mark it in flight for the caller.
    pub fn try_claim(self: &Arc<Self>, id: &MessageId) -> Claim {
        let mut entries = self.lock();
        let entry = entries.entry(id.clone()).or_default();

        if let Some(status @ DeliveryStatus::Sent { .. }) = &entry.status {
            return Claim::AlreadySent(status.clone());
        }

        if let Some(sender) = &entry.in_flight {
            return Claim::InFlight(InFlight {
                tracker: self.clone(),
                id: id.clone(),
                rx: sender.subscribe(),
            });
        }

        let (tx, _rx) = watch::channel(None);
        entry.in_flight = Some(tx);
        Claim::Claimed(ClaimGuard {
            tracker: self.clone(),
            id: id.clone(),
            attempts: 0,
            settled: false,
        })
    }

    /// Store `status` only if nothing is recorded or claimed for `id`.
    ///
    /// Returns whether this call performed the write. `Unknown` is never
    /// stored.
    pub fn record_if_absent(&self, id: &MessageId, status: DeliveryStatus) -> bool {
        if status == DeliveryStatus::Unknown {
            return false;
        }

        let mut entries = self.lock();
        let entry = entries.entry(id.clone()).or_default();
        if entry.status.is_some() || entry.in_flight.is_some() {
            return false;
        }
        entry.status = Some(status);
        true
    }

    pub fn get(&self, id: &MessageId) -> DeliveryStatus {
        self.lock()
            .get(id)
            .and_then(|entry| entry.status.clone())
            .unwrap_or(DeliveryStatus::Unknown)
    }

    pub fn has_succeeded(&self, id: &MessageId) -> bool {
        self.get(id).is_sent()
    }

    pub fn is_in_flight(&self, id: &MessageId) -> bool {
        self.lock()
            .get(id)
            .map(|entry| entry.in_flight.is_some())
            .unwrap_or(false)
    }

    /// Every stored status.
    pub fn snapshot(&self) -> HashMap<MessageId, DeliveryStatus> {
        self.lock()
            .iter()
            .filter_map(|(id, entry)| entry.status.clone().map(|s| (id.clone(), s)))
            .collect()
    }

    /// Release the claim on `id`, storing `status` and waking waiters.
    ///
    /// Returns the status that is now authoritative for the identity.
    fn settle(&self, id: &MessageId, status: DeliveryStatus) -> DeliveryStatus {
        let (effective, waiter) = {
            let mut entries = self.lock();
            let entry = entries.entry(id.clone()).or_default();
            let waiter = entry.in_flight.take();

            let effective = match entry.status.clone() {
                Some(stored) if stored.is_sent() => stored,
                stored if status == DeliveryStatus::Unknown => {
                    stored.unwrap_or(DeliveryStatus::Unknown)
                }
                _ => {
                    entry.status = Some(status.clone());
                    status
                }
            };

            if entry.status.is_none() && entry.in_flight.is_none() {
                entries.remove(id);
            }
            (effective, waiter)
        };

        if let Some(waiter) = waiter {
            waiter.send_replace(Some(effective.clone()));
        }
        effective
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<MessageId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive ownership of an in-flight identity.
///
/// Dropping the guard without settling it records `Cancelled`, so an
/// abandoned send never leaves the identity claimed.
pub struct ClaimGuard {
    tracker: Arc<DeliveryTracker>,
    id: MessageId,
    attempts: u32,
    settled: bool,
}

impl ClaimGuard {
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Count one backend attempt against this claim.
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn settle(mut self, status: DeliveryStatus) -> DeliveryStatus {
        self.settled = true;
        self.tracker.settle(&self.id, status)
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.tracker.settle(
                &self.id,
                DeliveryStatus::Cancelled {
                    attempts: self.attempts,
                },
            );
        }
    }
}

/// Handle for waiting on another caller's in-flight dispatch.
pub struct InFlight {
    tracker: Arc<DeliveryTracker>,
    id: MessageId,
    rx: watch::Receiver<Option<DeliveryStatus>>,
}

impl InFlight {
    /// Wait for the owner to settle and return its status.
    pub async fn wait(mut self) -> DeliveryStatus {
        let settled = match self.rx.wait_for(Option::is_some).await {
            Ok(status) => status.clone(),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| self.tracker.get(&self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> MessageId {
        MessageId::new(value)
    }

    #[test]
    fn unseen_identity_is_unknown() {
        let tracker = DeliveryTracker::new();
        assert_eq!(tracker.get(&id("nope")), DeliveryStatus::Unknown);
        assert!(!tracker.has_succeeded(&id("nope")));
        assert!(tracker.snapshot().is_empty());
    }

    #[test]
    fn record_if_absent_writes_once() {
        let tracker = DeliveryTracker::new();
        assert!(tracker.record_if_absent(&id("a"), DeliveryStatus::Failed { attempts: 3 }));
        assert!(!tracker.record_if_absent(&id("a"), DeliveryStatus::sent("b", 1)));
        assert_eq!(tracker.get(&id("a")), DeliveryStatus::Failed { attempts: 3 });
        assert!(!tracker.record_if_absent(&id("x"), DeliveryStatus::Unknown));
        assert_eq!(tracker.get(&id("x")), DeliveryStatus::Unknown);
    }

    #[test]
    fn second_claim_sees_in_flight() {
        let tracker = Arc::new(DeliveryTracker::new());
        let first = tracker.try_claim(&id("m"));
        assert!(matches!(first, Claim::Claimed(_)));
        assert!(tracker.is_in_flight(&id("m")));
        assert!(matches!(tracker.try_claim(&id("m")), Claim::InFlight(_)));
        drop(first);
        assert!(!tracker.is_in_flight(&id("m")));
    }

    #[test]
    fn sent_is_never_overwritten() {
        let tracker = Arc::new(DeliveryTracker::new());
        let Claim::Claimed(guard) = tracker.try_claim(&id("m")) else {
            panic!("expected claim");
        };
        guard.settle(DeliveryStatus::sent("primary", 2));

        match tracker.try_claim(&id("m")) {
            Claim::AlreadySent(status) => assert_eq!(status, DeliveryStatus::sent("primary", 2)),
            _ => panic!("sent identity must short-circuit"),
        }
        assert!(tracker.has_succeeded(&id("m")));
    }

    #[test]
    fn failed_identity_can_be_claimed_again() {
        let tracker = Arc::new(DeliveryTracker::new());
        let Claim::Claimed(guard) = tracker.try_claim(&id("m")) else {
            panic!("expected claim");
        };
        guard.settle(DeliveryStatus::Failed { attempts: 6 });
        assert!(matches!(tracker.try_claim(&id("m")), Claim::Claimed(_)));
    }

    #[test]
    fn dropped_guard_records_cancelled_with_attempts() {
        let tracker = Arc::new(DeliveryTracker::new());
        let Claim::Claimed(mut guard) = tracker.try_claim(&id("m")) else {
            panic!("expected claim");
        };
        guard.record_attempt();
        guard.record_attempt();
        drop(guard);
        assert_eq!(tracker.get(&id("m")), DeliveryStatus::Cancelled { attempts: 2 });
    }

    #[tokio::test]
    async fn waiter_receives_owner_status() {
        let tracker = Arc::new(DeliveryTracker::new());
        let Claim::Claimed(guard) = tracker.try_claim(&id("m")) else {
            panic!("expected claim");
        };
        let Claim::InFlight(waiter) = tracker.try_claim(&id("m")) else {
            panic!("expected in-flight");
        };

        let waiting = tokio::spawn(waiter.wait());
        tokio::task::yield_now().await;
        guard.settle(DeliveryStatus::sent("primary", 1));

        assert_eq!(waiting.await.unwrap(), DeliveryStatus::sent("primary", 1));
    }
}
