//! Wire contract for the remote segment ingest API.
//!
//! Holds the JSON response types for the login and upload endpoints plus the
//! classification of an upload acknowledgment into a delivery outcome. The
//! classification is a pure function; counters and logging happen at the
//! call site.

use std::fmt;

use serde::Deserialize;

/// Response to the startup login call (`GET {base}login/`).
///
/// The token is attached to every subsequent upload as a CSRF-style header.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

/// Acknowledgment returned by `POST {base}segment/upload/{camera}/`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct UploadAck {
    /// Whether the remote-recomputed digest matched the one we sent.
    pub checksum: bool,
    /// Remote processing time in seconds. A value > 0.0 means the server
    /// actually processed the upload rather than short-circuiting.
    pub duration: f64,
    /// Informational only; never consulted by delivery logic.
    #[serde(default)]
    pub start_time: f64,
    /// Whether the segment was committed to durable storage.
    pub db_stored: bool,
}

/// Terminal classification of one upload acknowledgment.
///
/// Only [`Delivered`](DeliveryOutcome::Delivered) permits deleting the local
/// file; the other three feed the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Remote recomputed digest did not match ours.
    ChecksumRejected,
    /// Remote did not actually process the upload (duration not positive).
    NotYetDurable,
    /// Processed but not yet committed to durable storage.
    DbNotUpdated,
    /// Fully accepted; the local file may be deleted.
    Delivered,
}

impl DeliveryOutcome {
    /// Stable lowercase label, used as a metrics key and in log fields.
    pub fn label(self) -> &'static str {
        match self {
            DeliveryOutcome::ChecksumRejected => "checksum_rejected",
            DeliveryOutcome::NotYetDurable => "not_yet_durable",
            DeliveryOutcome::DbNotUpdated => "db_not_updated",
            DeliveryOutcome::Delivered => "delivered",
        }
    }

    pub fn is_delivered(self) -> bool {
        self == DeliveryOutcome::Delivered
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classifies an acknowledgment into a delivery outcome.
///
/// First matching rule wins, in fixed priority order:
/// 1. `checksum == false` → [`DeliveryOutcome::ChecksumRejected`]
/// 2. `duration` not positive → [`DeliveryOutcome::NotYetDurable`]
/// 3. `db_stored == false` → [`DeliveryOutcome::DbNotUpdated`]
/// 4. otherwise → [`DeliveryOutcome::Delivered`]
pub fn classify(ack: &UploadAck) -> DeliveryOutcome {
    if !ack.checksum {
        return DeliveryOutcome::ChecksumRejected;
    }
    // Written as !(d > 0.0) so a NaN duration counts as "not processed"
    // rather than slipping through a `d <= 0.0` comparison.
    if !(ack.duration > 0.0) {
        return DeliveryOutcome::NotYetDurable;
    }
    if !ack.db_stored {
        return DeliveryOutcome::DbNotUpdated;
    }
    DeliveryOutcome::Delivered
}
