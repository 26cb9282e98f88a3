//! Feature-gated logging and metrics hooks.
//!
//! Without the `tracing` / `metrics` features every helper is a no-op.

use std::time::Duration;

use crate::types::{BackendName, DeliveryStatus, MessageId};

#[cfg(feature = "metrics")]
pub(crate) fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn metric_inc(_name: &'static str) {}

#[cfg(feature = "metrics")]
pub(crate) fn metric_inc_backend(name: &'static str, backend: &BackendName) {
    metrics::increment_counter!(name, "backend" => backend.0.clone());
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn metric_inc_backend(_name: &'static str, _backend: &BackendName) {}

#[cfg(feature = "tracing")]
pub(crate) fn trace_event(message: &'static str, id: &MessageId) {
    tracing::debug!(message_id = %id, "{}", message);
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn trace_event(_message: &'static str, _id: &MessageId) {}

#[cfg(feature = "tracing")]
pub(crate) fn trace_attempt_failed(
    id: &MessageId,
    backend: &BackendName,
    attempt: u32,
    error: &dyn std::fmt::Display,
) {
    tracing::warn!(message_id = %id, backend = %backend, attempt, error = %error, "delivery attempt failed");
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn trace_attempt_failed(
    _id: &MessageId,
    _backend: &BackendName,
    _attempt: u32,
    _error: &dyn std::fmt::Display,
) {
}

#[cfg(feature = "tracing")]
pub(crate) fn trace_backoff(id: &MessageId, backend: &BackendName, delay: Duration) {
    tracing::debug!(message_id = %id, backend = %backend, delay_ms = delay.as_millis() as u64, "backing off");
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn trace_backoff(_id: &MessageId, _backend: &BackendName, _delay: Duration) {}

#[cfg(feature = "tracing")]
pub(crate) fn trace_outcome(id: &MessageId, status: &DeliveryStatus) {
    match status {
        DeliveryStatus::Sent { backend_name, attempts } => {
            tracing::info!(message_id = %id, backend = %backend_name, attempts, "message sent");
        }
        other => {
            tracing::warn!(message_id = %id, status = other.label(), attempts = other.attempts(), "message not sent");
        }
    }
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn trace_outcome(_id: &MessageId, _status: &DeliveryStatus) {}
