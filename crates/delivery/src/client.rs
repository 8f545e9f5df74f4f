//! Delivery client: checksum, upload, classify, delete, retry.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use segpost_metrics::Metrics;
use segpost_protocol::{DeliveryOutcome, UploadAck, classify};

use crate::{DeliveryConfig, DeliveryError};

/// Abstract transport to the remote ingest API.
///
/// [`ApiSession`](crate::ApiSession) is the production implementation;
/// tests substitute a scripted one.
pub trait IngestApi: Send + Sync {
    /// Uploads one segment body and returns the raw acknowledgment.
    fn upload<'a>(
        &'a self,
        camera: &'a str,
        file_name: &'a str,
        bytes: Vec<u8>,
        sha1: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<UploadAck, DeliveryError>> + Send + 'a>>;
}

/// Delivers finished segments to the remote store, deleting each local file
/// only after the remote side confirms durable storage.
pub struct DeliveryClient {
    api: Arc<dyn IngestApi>,
    config: DeliveryConfig,
    metrics: Metrics,
    cancel: CancellationToken,
}

impl DeliveryClient {
    pub fn new(
        api: Arc<dyn IngestApi>,
        config: DeliveryConfig,
        metrics: Metrics,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            config,
            metrics,
            cancel,
        }
    }

    /// Camera identifier this client delivers for.
    pub fn camera(&self) -> &str {
        &self.config.camera
    }

    /// Delivers one segment, retrying indefinitely with randomized backoff
    /// until the remote side confirms durable storage.
    ///
    /// Idempotent: a path whose file is already gone (a duplicate `closed`
    /// event arriving after a successful delivery) is dropped without error.
    /// Returns the last attempt's error if the cancellation token fires
    /// during backoff.
    pub async fn deliver(&self, path: &Path) -> Result<(), DeliveryError> {
        let camera = self.config.camera.as_str();
        // Timer covers the whole deliver call, retries and backoff included.
        let started = Instant::now();
        loop {
            if !path.exists() {
                debug!(path = %path.display(), "segment already gone, dropping duplicate delivery");
                self.metrics.incr("segment.duplicate_drop", camera);
                return Ok(());
            }

            match self.attempt(path).await {
                Ok(remote_duration) => {
                    self.metrics.incr("segment.delivered", camera);
                    self.metrics
                        .gauge("segment.remote_duration", camera, remote_duration);
                    self.metrics
                        .timing("segment.deliver_time", camera, started.elapsed());
                    info!(
                        path = %path.display(),
                        remote_duration,
                        "segment delivered and deleted"
                    );
                    return Ok(());
                }
                Err(e) => {
                    if let DeliveryError::Rejected(outcome) = &e {
                        self.metrics
                            .incr(&format!("segment.outcome.{}", outcome.label()), camera);
                    }
                    self.metrics.incr("segment.retry", camera);

                    let delay = self.config.retry.sample();
                    warn!(
                        path = %path.display(),
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "delivery attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            debug!(path = %path.display(), "delivery cancelled during backoff");
                            return Err(e);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One full attempt: re-checksum, upload, classify, delete on success.
    ///
    /// Returns the remote-reported processing duration in seconds.
    async fn attempt(&self, path: &Path) -> Result<f64, DeliveryError> {
        let camera = self.config.camera.as_str();

        let checksum_started = Instant::now();
        let sha1 = segpost_checksum::file_sha1(path)?;
        self.metrics
            .timing("segment.checksum_time", camera, checksum_started.elapsed());

        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("segment.ts");

        let ack = self.api.upload(camera, file_name, bytes, &sha1).await?;
        let outcome = classify(&ack);
        debug!(
            path = %path.display(),
            outcome = %outcome,
            duration = ack.duration,
            db_stored = ack.db_stored,
            "upload classified"
        );

        match outcome {
            DeliveryOutcome::Delivered => {
                remove_segment(path).await?;
                Ok(ack.duration)
            }
            other => Err(DeliveryError::Rejected(other)),
        }
    }
}

/// Removes a delivered segment. A concurrent duplicate delivery may have
/// deleted it first; that is not an error.
async fn remove_segment(path: &Path) -> Result<(), DeliveryError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
