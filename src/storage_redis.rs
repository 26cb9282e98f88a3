#[cfg(feature = "redis")]
use async_trait::async_trait;
#[cfg(feature = "redis")]
use redis::AsyncCommands;
#[cfg(feature = "redis")]
use std::collections::HashMap;

#[cfg(feature = "redis")]
use crate::storage::Storage;
#[cfg(feature = "redis")]
use crate::types::{DeliveryStatus, MessageId};

/// Leading bytes of a serialized `DeliveryStatus::Sent`.
#[cfg(feature = "redis")]
const SENT_PREFIX: &str = r#"{"Sent""#;

/// Check-and-set in one round trip: leave a stored `Sent` untouched,
/// otherwise write the new record. KEYS[1] = hash, ARGV = field, value,
/// sent prefix.
#[cfg(feature = "redis")]
const RECORD_STATUS_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if current and string.sub(current, 1, string.len(ARGV[3])) == ARGV[3] then
    return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
return 1
"#;

/// Status records kept in a single Redis hash, one JSON value per identity.
#[cfg(feature = "redis")]
pub struct RedisStorage {
    client: redis::Client,
    prefix: String,
    record_script: redis::Script,
}

#[cfg(feature = "redis")]
impl RedisStorage {
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
            record_script: redis::Script::new(RECORD_STATUS_SCRIPT),
        }
    }

    fn status_key(&self) -> String {
        format!("{}:status", self.prefix)
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl Storage for RedisStorage {
    async fn record_status(&self, id: &MessageId, status: &DeliveryStatus) {
        let mut conn = match self.client.get_tokio_connection().await {
            Ok(c) => c,
            Err(_) => return,
        };
        let payload = match serde_json::to_string(status) {
            Ok(p) => p,
            Err(_) => return,
        };
        let _: redis::RedisResult<i64> = self
            .record_script
            .key(self.status_key())
            .arg(id.as_str())
            .arg(payload)
            .arg(SENT_PREFIX)
            .invoke_async(&mut conn)
            .await;
    }

    async fn load_status(&self) -> HashMap<MessageId, DeliveryStatus> {
        let mut conn = match self.client.get_tokio_connection().await {
            Ok(c) => c,
            Err(_) => return HashMap::new(),
        };
        let map: HashMap<String, String> =
            conn.hgetall(self.status_key()).await.unwrap_or_default();
        map.into_iter()
            .filter_map(|(id, value)| {
                let status = serde_json::from_str::<DeliveryStatus>(&value).ok()?;
                Some((MessageId(id), status))
            })
            .collect()
    }
}
