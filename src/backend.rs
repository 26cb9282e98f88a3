use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransientError;
use crate::types::{BackendName, DeliveryReceipt};

/// A delivery mechanism the dispatcher can try.
///
/// Backends are interchangeable; the dispatcher only ever asks them to
/// attempt a delivery. Any error is treated as transient and drives retry
/// and failover.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &BackendName;

    async fn attempt_delivery(&self, payload: &[u8]) -> Result<DeliveryReceipt, TransientError>;
}

/// Randomised backend for demos and load experiments.
///
/// Each attempt waits `latency`, then succeeds with probability
/// `success_rate`.
pub struct SimulatedBackend {
    name: BackendName,
    success_rate: f64,
    latency: Duration,
    rng: Mutex<fastrand::Rng>,
}

impl SimulatedBackend {
    pub fn new(name: impl Into<String>, success_rate: f64) -> Self {
        Self {
            name: BackendName(name.into()),
            success_rate: success_rate.clamp(0.0, 1.0),
            latency: Duration::ZERO,
            rng: Mutex::new(fastrand::Rng::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make the success/failure sequence reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(fastrand::Rng::with_seed(seed));
        self
    }

    fn roll(&self) -> f64 {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).f64()
    }
}

#[async_trait]
impl Backend for SimulatedBackend {
    fn name(&self) -> &BackendName {
        &self.name
    }

    async fn attempt_delivery(&self, _payload: &[u8]) -> Result<DeliveryReceipt, TransientError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.roll() < self.success_rate {
            Ok(DeliveryReceipt {
                backend_name: self.name.clone(),
            })
        } else {
            Err(TransientError::new(format!("{} unavailable", self.name)))
        }
    }
}

/// Delivers the payload as an HTTP POST body.
///
/// Any transport error or non-2xx response is a transient failure.
#[cfg(feature = "http")]
pub struct HttpBackend {
    name: BackendName,
    url: String,
    timeout: Duration,
    headers: Vec<(String, String)>,
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpBackend {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: BackendName(name.into()),
            url: url.into(),
            timeout: Duration::from_secs(5),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &BackendName {
        &self.name
    }

    async fn attempt_delivery(&self, payload: &[u8]) -> Result<DeliveryReceipt, TransientError> {
        let mut request = self
            .client
            .post(&self.url)
            .body(payload.to_vec())
            .timeout(self.timeout);

        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() => Ok(DeliveryReceipt {
                backend_name: self.name.clone(),
            }),
            Ok(resp) => Err(TransientError::new(format!(
                "{} responded with {}",
                self.url,
                resp.status()
            ))),
            Err(err) if err.is_timeout() => {
                Err(TransientError::new(format!("{} timed out", self.url)))
            }
            Err(err) => Err(TransientError::new(format!("{}: {}", self.url, err))),
        }
    }
}
