#[cfg(feature = "postgres")]
use async_trait::async_trait;
#[cfg(feature = "postgres")]
use std::collections::HashMap;
#[cfg(feature = "postgres")]
use tokio_postgres::Client;

#[cfg(feature = "postgres")]
use crate::storage::Storage;
#[cfg(feature = "postgres")]
use crate::types::{DeliveryStatus, MessageId};

#[cfg(feature = "postgres")]
const CREATE_STATUS_TABLE: &str = "CREATE TABLE IF NOT EXISTS dispatch_status (
    id TEXT PRIMARY KEY,
    sent BOOLEAN NOT NULL DEFAULT FALSE,
    payload JSONB NOT NULL
)";

/// Status records in a `dispatch_status` table.
#[cfg(feature = "postgres")]
pub struct PostgresStorage {
    client: Client,
}

#[cfg(feature = "postgres")]
impl PostgresStorage {
    pub async fn new(client: Client) -> Result<Self, tokio_postgres::Error> {
        client.execute(CREATE_STATUS_TABLE, &[]).await?;
        Ok(Self { client })
    }
}

#[cfg(feature = "postgres")]
#[async_trait]
impl Storage for PostgresStorage {
    async fn record_status(&self, id: &MessageId, status: &DeliveryStatus) {
        let payload = match serde_json::to_value(status) {
            Ok(p) => p,
            Err(_) => return,
        };
        // Rows already marked sent are never replaced.
        let _ = self.client.execute(
            "INSERT INTO dispatch_status (id, sent, payload)
             VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE
                SET sent = EXCLUDED.sent, payload = EXCLUDED.payload
                WHERE dispatch_status.sent = FALSE",
            &[&id.as_str(), &status.is_sent(), &payload],
        ).await;
    }

    async fn load_status(&self) -> HashMap<MessageId, DeliveryStatus> {
        let rows = self.client
            .query("SELECT id, payload FROM dispatch_status", &[])
            .await
            .unwrap_or_default();

        rows.into_iter()
            .filter_map(|row| {
                let id: String = row.try_get(0).ok()?;
                let payload: serde_json::Value = row.try_get(1).ok()?;
                let status = serde_json::from_value::<DeliveryStatus>(payload).ok()?;
                Some((MessageId(id), status))
            })
            .collect()
    }
}
