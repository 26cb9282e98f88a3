use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::types::{DeliveryStatus, MessageId};

/// Persistence for status records.
///
/// Writes are best-effort: implementations swallow their own I/O errors,
/// the in-process tracker stays authoritative.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn record_status(&self, id: &MessageId, status: &DeliveryStatus);
    async fn load_status(&self) -> HashMap<MessageId, DeliveryStatus>;
}

/// In-memory storage for lightweight deployments.
#[derive(Default)]
pub struct InMemoryStorage {
    status: Mutex<HashMap<MessageId, DeliveryStatus>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn record_status(&self, id: &MessageId, status: &DeliveryStatus) {
        let mut guard = self.status.lock().await;
        if guard.get(id).is_some_and(DeliveryStatus::is_sent) {
            return;
        }
        guard.insert(id.clone(), status.clone());
    }

    async fn load_status(&self) -> HashMap<MessageId, DeliveryStatus> {
        self.status.lock().await.clone()
    }
}
