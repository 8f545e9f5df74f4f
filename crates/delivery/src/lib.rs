//! Segment delivery to the remote ingest API.
//!
//! One [`ApiSession`] is established at startup (login failure is fatal);
//! the [`DeliveryClient`] then performs checksum → upload → classify →
//! delete for each finished segment, retrying failed attempts indefinitely
//! with bounded randomized backoff.

mod client;
mod session;

pub use client::{DeliveryClient, IngestApi};
pub use session::ApiSession;

use std::time::Duration;

use rand::Rng;

use segpost_protocol::DeliveryOutcome;

/// Immutable delivery configuration, built once at startup and shared
/// read-only across all delivery attempts.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Camera identifier used in the upload URL and metric names.
    pub camera: String,
    pub retry: RetryConfig,
}

/// Bounded randomized backoff between delivery attempts.
///
/// There is deliberately no maximum attempt count: on an unattended edge
/// box the alternative to retrying forever is losing the segment.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryConfig {
    /// Draws a delay uniformly from the configured window.
    pub fn sample(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        rand::thread_rng().gen_range(self.min_delay..=self.max_delay)
    }
}

/// Errors produced during segment delivery.
///
/// Everything except [`DeliveryError::Login`] is transient and caught by
/// the retry loop; login failure at startup terminates the process.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upload returned status {0}")]
    Status(u16),

    #[error("malformed acknowledgment: {0}")]
    Json(#[from] serde_json::Error),

    #[error("upload not accepted: {0}")]
    Rejected(DeliveryOutcome),

    #[error("login failed: {0}")]
    Login(String),
}
