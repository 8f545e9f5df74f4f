//! Bridges `notify` callbacks into an async event channel.

use std::path::Path;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::WatchError;

/// Event channel capacity. The notify thread blocks when the dispatcher
/// falls this far behind, which is the back-pressure we want.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Recursive filesystem watch over the segment input directory.
///
/// Dropping the watcher stops the subscription; the event channel then
/// closes and the dispatcher drains.
pub struct SegmentWatcher {
    _watcher: RecommendedWatcher,
}

impl SegmentWatcher {
    /// Starts watching `root` recursively and returns the raw event stream.
    ///
    /// No filtering happens here; the dispatcher decides which events mean
    /// "segment fully written".
    pub fn start(
        root: &Path,
    ) -> Result<(Self, mpsc::Receiver<notify::Event>), WatchError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut watcher = notify::recommended_watcher(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    // blocking_send is fine: this runs on notify's own thread.
                    if tx.blocking_send(event).is_err() {
                        // Receiver dropped, we are shutting down.
                    }
                }
                Err(e) => warn!(error = %e, "filesystem watch error"),
            },
        )?;

        watcher.watch(root, RecursiveMode::Recursive)?;
        info!(dir = %root.display(), "watching for finished segments");

        Ok((Self { _watcher: watcher }, rx))
    }
}
