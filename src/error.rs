use std::fmt;

use crate::types::BackendName;

/// Errors returned when a dispatcher is *constructed* with an unusable
/// configuration.
///
/// Delivery problems are never reported through this type; they surface
/// as a [`DeliveryStatus`](crate::DeliveryStatus).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The backend list is empty.
    NoBackends,

    /// `max_retries` must allow at least one attempt per backend.
    ZeroRetries,

    /// Backoff base delay must be positive.
    ZeroBackoffBase,

    /// Backoff multiplier must be at least 1.
    InvalidMultiplier {
        multiplier: u32,
    },

    /// Two backends share a name, which would make status reports ambiguous.
    DuplicateBackend {
        name: BackendName,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoBackends =>
                write!(f, "at least one backend is required"),
            ConfigError::ZeroRetries =>
                write!(f, "max_retries must be greater than zero"),
            ConfigError::ZeroBackoffBase =>
                write!(f, "backoff base delay must be greater than zero"),
            ConfigError::InvalidMultiplier { multiplier } =>
                write!(f, "backoff multiplier must be >= 1, got {}", multiplier),
            ConfigError::DuplicateBackend { name } =>
                write!(f, "duplicate backend name: {}", name),
        }
    }
}

impl std::error::Error for ConfigError {}

/// A recoverable failure reported by a backend.
///
/// Drives retry and failover. Never returned to the caller of `send`;
/// only reflected in attempt counts and the terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientError {
    pub message: String,
}

impl TransientError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for TransientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transient delivery failure: {}", self.message)
    }
}

impl std::error::Error for TransientError {}
