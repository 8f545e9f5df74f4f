//! Filesystem watch: segment-close detection and delivery dispatch.
//!
//! [`SegmentWatcher`] bridges `notify` callbacks into an async channel;
//! [`Dispatcher`] filters the event stream for "segment fully written"
//! notifications and hands each matched path to the delivery client on a
//! bounded worker pool.

mod dispatcher;
mod watcher;

pub use dispatcher::{Dispatcher, DispatcherConfig, has_segment_suffix, is_close_write};
pub use watcher::SegmentWatcher;

/// Errors produced while setting up the filesystem watch.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),
}
