//! segpost entry point.

mod app;
mod cli;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize structured logging. RUST_LOG wins over -v flags.
    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        dir = %args.input_path.display(),
        "starting segpost"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(args))?;

    tracing::info!("segpost shut down cleanly");
    Ok(())
}
