//! Wires session, watcher and dispatcher together and handles shutdown.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use segpost_delivery::{ApiSession, DeliveryClient, DeliveryConfig, IngestApi, RetryConfig};
use segpost_metrics::Metrics;
use segpost_watch::{Dispatcher, DispatcherConfig, SegmentWatcher};

use crate::cli::Cli;

/// Runs the delivery pipeline until SIGINT.
pub async fn run(args: Cli) -> anyhow::Result<()> {
    let camera = args.camera();

    let metrics = match &args.statsd_host {
        Some(host) => Metrics::statsd(host, args.statsd_port),
        None => Metrics::disabled(),
    };

    // Login is fatal: without a session token no upload can succeed.
    let session = ApiSession::login(&args.api_url)
        .await
        .context("cannot start without a session")?;
    tracing::info!(api = %session.base_url(), camera = %camera, "logged in");

    let cancel = CancellationToken::new();
    let client = Arc::new(DeliveryClient::new(
        Arc::new(session) as Arc<dyn IngestApi>,
        DeliveryConfig {
            camera,
            retry: RetryConfig::default(),
        },
        metrics.clone(),
        cancel.clone(),
    ));

    let (watcher, events) = SegmentWatcher::start(&args.input_path)
        .with_context(|| format!("cannot watch {}", args.input_path.display()))?;

    let dispatcher = Dispatcher::new(
        client,
        metrics.clone(),
        DispatcherConfig {
            suffix: args.suffix.clone(),
            max_in_flight: args.max_in_flight.get(),
        },
        cancel.clone(),
    );
    let dispatch = tokio::spawn(dispatcher.run(events));

    tracing::info!("pipeline ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for SIGINT")?;
    tracing::info!("SIGINT received, shutting down");

    // Stop watching first so no new events arrive, then let in-flight
    // deliveries reach an attempt boundary.
    drop(watcher);
    cancel.cancel();
    let _ = dispatch.await;

    metrics.dump();
    Ok(())
}
