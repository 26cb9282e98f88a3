use std::fmt;

use serde::{Deserialize, Serialize};

/// Caller-supplied identity of a logical message.
///
/// Uniqueness is a caller contract; the dispatcher never validates it.
/// Two `send` calls with the same identity are the *same* message as far
/// as idempotency is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Human-readable backend name, used only for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendName(pub String);

impl BackendName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BackendName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for BackendName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proof of a successful delivery, produced by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub backend_name: BackendName,
}

impl DeliveryReceipt {
    pub fn new(backend_name: impl Into<String>) -> Self {
        Self {
            backend_name: BackendName(backend_name.into()),
        }
    }
}

/// Outcome of a `send`, and the value held by the status store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Delivered. `attempts` counts tries on the successful backend only.
    Sent {
        backend_name: BackendName,
        attempts: u32,
    },

    /// Every backend exhausted its retry budget.
    Failed { attempts: u32 },

    /// Admission was denied. Always carries `attempts: 0`.
    RateLimited { attempts: u32 },

    /// Cancelled or timed out between attempts.
    Cancelled { attempts: u32 },

    /// Identity never seen. Returned by lookups, never stored.
    Unknown,
}

impl DeliveryStatus {
    pub fn sent(backend_name: impl Into<String>, attempts: u32) -> Self {
        DeliveryStatus::Sent {
            backend_name: BackendName(backend_name.into()),
            attempts,
        }
    }

    pub fn rate_limited() -> Self {
        DeliveryStatus::RateLimited { attempts: 0 }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, DeliveryStatus::Sent { .. })
    }

    /// `Sent` and `Failed` end dispatching for the identity.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Sent { .. } | DeliveryStatus::Failed { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryStatus::Sent { attempts, .. }
            | DeliveryStatus::Failed { attempts }
            | DeliveryStatus::RateLimited { attempts }
            | DeliveryStatus::Cancelled { attempts } => *attempts,
            DeliveryStatus::Unknown => 0,
        }
    }

    /// Short lowercase name of the variant, for logs and metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent { .. } => "sent",
            DeliveryStatus::Failed { .. } => "failed",
            DeliveryStatus::RateLimited { .. } => "rate_limited",
            DeliveryStatus::Cancelled { .. } => "cancelled",
            DeliveryStatus::Unknown => "unknown",
        }
    }
}
