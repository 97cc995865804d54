//! Zero Scanner - governed market-scanning scheduler for the Zero ecosystem.

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use zero_common::config::Config;
use zero_common::logging::init_logging_with_exclusions;
use zero_scanner::ScannerService;

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();

    // Configuration errors are fatal before the loop starts.
    let config = Config::load_and_validate()?;

    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("Zero Scanner v{}", env!("CARGO_PKG_VERSION"));

    let service = match ScannerService::new(config) {
        Ok(service) => service,
        Err(e) => {
            tracing::error!(error = %e, class = %e.class(), "Scanner failed to start");
            return Err(e.into());
        }
    };

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        tracing::info!("Shutdown requested");
        signal_token.cancel();
    });

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    service.start(shutdown).await
}
