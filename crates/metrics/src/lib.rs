//! Fire-and-forget delivery metrics.
//!
//! Counters are kept in an in-process registry (readable by tests and
//! dumped at debug level on shutdown); when a statsd endpoint is configured
//! every update is additionally emitted as a UDP datagram. Emission failures
//! are swallowed: metrics must never block or fail a delivery.
//!
//! All metrics are tagged by camera identifier, encoded into the metric
//! name as `segpost.{camera}.{name}`.

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Cheap-to-clone handle to the metrics registry.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<Inner>,
}

struct Inner {
    counters: Mutex<HashMap<String, u64>>,
    statsd: Option<StatsdSink>,
}

/// Minimal statsd line-protocol emitter over UDP.
///
/// The statsd wire format is three tokens (`name:value|type`), not worth a
/// dependency. Datagrams are best-effort; send errors are ignored.
struct StatsdSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl StatsdSink {
    fn emit(&self, name: &str, value: &str, kind: &str) {
        let line = format!("segpost.{name}:{value}|{kind}");
        let _ = self.socket.send_to(line.as_bytes(), self.target);
    }
}

impl Metrics {
    /// Registry-only metrics with no external emission.
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(Inner {
                counters: Mutex::new(HashMap::new()),
                statsd: None,
            }),
        }
    }

    /// Metrics with statsd emission to `host:port`.
    ///
    /// Falls back to [`Metrics::disabled`] with a warning if the endpoint
    /// cannot be resolved or a local socket cannot be bound; a broken
    /// metrics endpoint must not prevent startup.
    pub fn statsd(host: &str, port: u16) -> Self {
        let sink = (host, port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .and_then(|target| {
                let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
                UdpSocket::bind(bind_addr)
                    .ok()
                    .map(|socket| StatsdSink { socket, target })
            });

        if sink.is_none() {
            tracing::warn!(host, port, "statsd endpoint unusable, metrics emission disabled");
        }

        Self {
            inner: Arc::new(Inner {
                counters: Mutex::new(HashMap::new()),
                statsd: sink,
            }),
        }
    }

    /// Increments a counter by one.
    pub fn incr(&self, name: &str, camera: &str) {
        let key = format!("{camera}.{name}");
        if let Ok(mut counters) = self.inner.counters.lock() {
            *counters.entry(key.clone()).or_insert(0) += 1;
        }
        if let Some(sink) = &self.inner.statsd {
            sink.emit(&key, "1", "c");
        }
    }

    /// Records a gauge value.
    pub fn gauge(&self, name: &str, camera: &str, value: f64) {
        if let Some(sink) = &self.inner.statsd {
            sink.emit(&format!("{camera}.{name}"), &format!("{value}"), "g");
        }
    }

    /// Records an elapsed duration in milliseconds.
    pub fn timing(&self, name: &str, camera: &str, elapsed: Duration) {
        if let Some(sink) = &self.inner.statsd {
            let ms = elapsed.as_secs_f64() * 1000.0;
            sink.emit(&format!("{camera}.{name}"), &format!("{ms:.1}"), "ms");
        }
    }

    /// Current value of a counter (0 if never incremented).
    pub fn counter_value(&self, name: &str, camera: &str) -> u64 {
        let key = format!("{camera}.{name}");
        self.inner
            .counters
            .lock()
            .map(|counters| counters.get(&key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Logs all counters at debug level, sorted by name.
    pub fn dump(&self) {
        if let Ok(counters) = self.inner.counters.lock() {
            let mut entries: Vec<_> = counters.iter().collect();
            entries.sort_unstable_by_key(|(name, _)| name.as_str());
            for (name, value) in entries {
                tracing::debug!(counter = %name, value, "metric");
            }
        }
    }
}
