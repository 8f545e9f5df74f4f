//! Consumes watch events and dispatches matched segments to delivery tasks.

use std::path::Path;
use std::sync::Arc;

use notify::EventKind;
use notify::event::{AccessKind, AccessMode};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use segpost_delivery::DeliveryClient;
use segpost_metrics::Metrics;

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// File suffix marking a segment (with the dot).
    pub suffix: String,
    /// Maximum concurrent deliveries. One segment's retry storm must not
    /// delay the next segment, but the pool stays small so a flaky link
    /// does not fan out into dozens of parallel uploads.
    pub max_in_flight: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            suffix: ".ts".into(),
            max_in_flight: 4,
        }
    }
}

/// Returns true for the event kind that means "no further writes will
/// occur": a close of a write handle.
pub fn is_close_write(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Access(AccessKind::Close(AccessMode::Write)))
}

/// Returns true if the path name ends with the segment suffix.
pub fn has_segment_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(suffix))
}

/// Filters the raw event stream and schedules deliveries.
///
/// Each matched path becomes an independent task with its own failure
/// containment; an error or retry loop in one delivery never stops the
/// event loop or other deliveries.
pub struct Dispatcher {
    client: Arc<DeliveryClient>,
    metrics: Metrics,
    config: DispatcherConfig,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        client: Arc<DeliveryClient>,
        metrics: Metrics,
        config: DispatcherConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            metrics,
            config,
            cancel,
        }
    }

    /// Runs until the event channel closes or the cancellation token fires,
    /// then waits for all in-flight deliveries to finish their current
    /// attempt.
    pub async fn run(self, mut events: mpsc::Receiver<notify::Event>) {
        // A zero-sized pool would wedge on the first matched segment.
        let max_in_flight = self.config.max_in_flight.max(1);
        let semaphore = Arc::new(Semaphore::new(max_in_flight));

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                maybe = events.recv() => match maybe {
                    Some(event) => self.handle_event(event, &semaphore).await,
                    None => break, // watcher dropped
                },
            }
        }

        // Drain: every delivery task holds a permit until it completes.
        let _ = semaphore.acquire_many(max_in_flight as u32).await;
        debug!("dispatcher drained");
    }

    async fn handle_event(&self, event: notify::Event, semaphore: &Arc<Semaphore>) {
        let camera = self.client.camera().to_string();

        if !is_close_write(&event.kind) {
            trace!(kind = ?event.kind, "ignoring event kind");
            self.metrics.incr("watch.ignored", &camera);
            return;
        }

        for path in event.paths {
            if !has_segment_suffix(&path, &self.config.suffix) {
                debug!(path = %path.display(), "ignoring non-segment file");
                self.metrics.incr("watch.ignored", &camera);
                continue;
            }

            self.metrics.incr("watch.matched", &camera);
            info!(path = %path.display(), "segment closed, scheduling delivery");

            let permit = tokio::select! {
                _ = self.cancel.cancelled() => return,
                permit = Arc::clone(semaphore).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => return, // semaphore is never closed
                },
            };

            let client = Arc::clone(&self.client);
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = client.deliver(&path).await {
                    // Reachable only when shutdown interrupts the retry loop.
                    debug!(path = %path.display(), error = %e, "delivery abandoned");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind};
    use segpost_delivery::{DeliveryConfig, DeliveryError, IngestApi, RetryConfig};
    use segpost_protocol::UploadAck;
    use std::future::Future;
    use std::path::PathBuf;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::time::Duration;

    struct MockApi {
        uploads: Mutex<Vec<String>>,
    }

    impl MockApi {
        fn new() -> Self {
            Self {
                uploads: Mutex::new(Vec::new()),
            }
        }

        fn uploaded_files(&self) -> Vec<String> {
            self.uploads.lock().unwrap().clone()
        }
    }

    impl IngestApi for MockApi {
        fn upload<'a>(
            &'a self,
            _camera: &'a str,
            file_name: &'a str,
            _bytes: Vec<u8>,
            _sha1: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<UploadAck, DeliveryError>> + Send + 'a>> {
            Box::pin(async move {
                self.uploads.lock().unwrap().push(file_name.to_string());
                Ok(UploadAck {
                    checksum: true,
                    duration: 1.0,
                    start_time: 0.0,
                    db_stored: true,
                })
            })
        }
    }

    fn close_write_event(path: &Path) -> notify::Event {
        notify::Event::new(EventKind::Access(AccessKind::Close(AccessMode::Write)))
            .add_path(path.to_path_buf())
    }

    fn fixture() -> (Arc<MockApi>, Metrics, mpsc::Sender<notify::Event>, tokio::task::JoinHandle<()>) {
        fixture_with(DispatcherConfig::default())
    }

    fn fixture_with(
        config: DispatcherConfig,
    ) -> (Arc<MockApi>, Metrics, mpsc::Sender<notify::Event>, tokio::task::JoinHandle<()>) {
        let api = Arc::new(MockApi::new());
        let metrics = Metrics::disabled();
        let cancel = CancellationToken::new();
        let client = Arc::new(DeliveryClient::new(
            Arc::clone(&api) as Arc<dyn IngestApi>,
            DeliveryConfig {
                camera: "cam1".into(),
                retry: RetryConfig {
                    min_delay: Duration::from_millis(10),
                    max_delay: Duration::from_millis(20),
                },
            },
            metrics.clone(),
            cancel.clone(),
        ));
        let dispatcher = Dispatcher::new(client, metrics.clone(), config, cancel);
        let (tx, rx) = mpsc::channel(16);
        let run = tokio::spawn(dispatcher.run(rx));
        (api, metrics, tx, run)
    }

    #[test]
    fn close_write_kind_matches() {
        assert!(is_close_write(&EventKind::Access(AccessKind::Close(
            AccessMode::Write
        ))));
        assert!(!is_close_write(&EventKind::Access(AccessKind::Close(
            AccessMode::Read
        ))));
        assert!(!is_close_write(&EventKind::Modify(ModifyKind::Any)));
        assert!(!is_close_write(&EventKind::Create(CreateKind::File)));
        assert!(!is_close_write(&EventKind::Remove(
            notify::event::RemoveKind::File
        )));
    }

    #[test]
    fn segment_suffix_matches() {
        assert!(has_segment_suffix(Path::new("/a/b/segment001.ts"), ".ts"));
        assert!(!has_segment_suffix(Path::new("/a/b/notes.txt"), ".ts"));
        assert!(!has_segment_suffix(Path::new("/a/b/segment001.ts.tmp"), ".ts"));
        assert!(!has_segment_suffix(Path::new("/a/b"), ".ts"));
    }

    #[tokio::test]
    async fn closed_segment_is_delivered_and_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment001.ts");
        std::fs::write(&path, b"payload").unwrap();

        let (api, metrics, tx, run) = fixture();
        tx.send(close_write_event(&path)).await.unwrap();
        drop(tx);
        run.await.unwrap();

        assert_eq!(api.uploaded_files(), vec!["segment001.ts"]);
        assert!(!path.exists());
        assert_eq!(metrics.counter_value("watch.matched", "cam1"), 1);
        assert_eq!(metrics.counter_value("segment.delivered", "cam1"), 1);
    }

    #[tokio::test]
    async fn modified_event_never_triggers_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment001.ts");
        std::fs::write(&path, b"payload").unwrap();

        let (api, metrics, tx, run) = fixture();
        let event = notify::Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(path.clone());
        tx.send(event).await.unwrap();
        drop(tx);
        run.await.unwrap();

        assert!(api.uploaded_files().is_empty());
        assert!(path.exists(), "modify events must not ship the file");
        assert_eq!(metrics.counter_value("watch.ignored", "cam1"), 1);
    }

    #[tokio::test]
    async fn closed_non_segment_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"not a segment").unwrap();

        let (api, metrics, tx, run) = fixture();
        tx.send(close_write_event(&path)).await.unwrap();
        drop(tx);
        run.await.unwrap();

        assert!(api.uploaded_files().is_empty());
        assert!(path.exists());
        assert_eq!(metrics.counter_value("watch.ignored", "cam1"), 1);
        assert_eq!(metrics.counter_value("watch.matched", "cam1"), 0);
    }

    #[tokio::test]
    async fn zero_max_in_flight_still_delivers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment001.ts");
        std::fs::write(&path, b"payload").unwrap();

        let (api, metrics, tx, run) = fixture_with(DispatcherConfig {
            suffix: ".ts".into(),
            max_in_flight: 0,
        });
        tx.send(close_write_event(&path)).await.unwrap();
        drop(tx);

        // A literal zero-sized pool would never hand out a permit and the
        // dispatcher would hang here; the clamp keeps it moving.
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("dispatcher must not wedge")
            .unwrap();

        assert_eq!(api.uploaded_files(), vec!["segment001.ts"]);
        assert_eq!(metrics.counter_value("segment.delivered", "cam1"), 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn duplicate_closed_events_deliver_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment001.ts");
        std::fs::write(&path, b"payload").unwrap();

        let (api, metrics, tx, run) = fixture();
        tx.send(close_write_event(&path)).await.unwrap();
        tx.send(close_write_event(&path)).await.unwrap();
        drop(tx);
        run.await.unwrap();

        // The duplicate either raced the first delivery (a second upload the
        // server dedupes by checksum) or found the file already gone and was
        // dropped. Every task ends in exactly one of the two counters.
        let delivered = metrics.counter_value("segment.delivered", "cam1");
        let dropped = metrics.counter_value("segment.duplicate_drop", "cam1");
        assert!(delivered >= 1);
        assert_eq!(delivered + dropped, 2);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn multiple_segments_all_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..6)
            .map(|i| {
                let p = dir.path().join(format!("segment{i:03}.ts"));
                std::fs::write(&p, format!("payload {i}")).unwrap();
                p
            })
            .collect();

        let (_api, metrics, tx, run) = fixture();
        for p in &paths {
            tx.send(close_write_event(p)).await.unwrap();
        }
        drop(tx);
        run.await.unwrap();

        assert_eq!(metrics.counter_value("segment.delivered", "cam1"), 6);
        for p in &paths {
            assert!(!p.exists());
        }
    }
}
