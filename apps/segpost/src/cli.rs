//! Command-line surface.

use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::Parser;

/// Watches a directory for finished media segments and delivers each one to
/// the remote ingest API, deleting it locally once durably stored.
#[derive(Parser, Debug)]
#[command(name = "segpost", version)]
pub struct Cli {
    /// Directory to watch for finished segments (recursive).
    pub input_path: PathBuf,

    /// Base URL of the ingest API, e.g. "https://ingest.example.com/api/".
    #[arg(long, env = "SEGPOST_API_URL")]
    pub api_url: String,

    /// Camera identifier; defaults to the watched directory's name.
    #[arg(long)]
    pub camera: Option<String>,

    /// Segment file suffix to match.
    #[arg(long, default_value = ".ts")]
    pub suffix: String,

    /// Maximum concurrent deliveries (at least 1).
    #[arg(long, default_value = "4")]
    pub max_in_flight: NonZeroUsize,

    /// statsd host for metrics; emission is disabled when unset.
    #[arg(long, env = "SEGPOST_STATSD_HOST")]
    pub statsd_host: Option<String>,

    /// statsd port.
    #[arg(long, default_value_t = 8125)]
    pub statsd_port: u16,

    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Effective camera identifier: the override, or the watched
    /// directory's own name.
    pub fn camera(&self) -> String {
        if let Some(camera) = &self.camera {
            return camera.clone();
        }
        self.input_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("camera")
            .to_string()
    }
}
