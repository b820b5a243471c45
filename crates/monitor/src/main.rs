//! Live feed monitor
//!
//! Runs the live data aggregator and logs its state until shutdown

mod report;

use std::env;
use std::time::Duration;

use tokio::signal;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use livefeed_core::{GasOperation, LiveDataConfig};
use livefeed_live_data::LiveDataAggregator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    init_logging();
    info!("Starting livefeed monitor v{}", env!("CARGO_PKG_VERSION"));

    let config = LiveDataConfig::load()?;
    info!(
        "Tracking assets {:?} on networks {:?}",
        config.tracked_assets, config.tracked_networks
    );

    let report_interval = Duration::from_secs(
        env::var("LIVEFEED_REPORT_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30),
    );

    let mut aggregator = LiveDataAggregator::new(config)?;
    aggregator.start().await?;
    info!("Background feeds started");

    let mut events = aggregator.event_stream();
    let event_logger = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    if let Some(line) = report::event_line(&event) {
                        info!("{}", line);
                    }
                }
                Err(e) => warn!("Event log fell behind: {}", e),
            }
        }
    });

    let mut ticker = tokio::time::interval(report_interval);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("Press Ctrl+C to shutdown");

    loop {
        tokio::select! {
            _ = ticker.tick() => log_report(&aggregator)?,
            result = &mut shutdown => {
                result?;
                break;
            }
        }
    }

    event_logger.abort();
    aggregator.stop().await;
    info!("Shutdown complete");
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = env::var("LIVEFEED_LOG_FORMAT").map_or(false, |v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn log_report(aggregator: &LiveDataAggregator) -> anyhow::Result<()> {
    let snapshot = aggregator.snapshot();

    for view in &snapshot.prices {
        info!("{}", report::price_line(view));
    }
    for view in &snapshot.fees {
        info!("{}", report::fee_line(view));

        if let Some(cost) = aggregator.estimate_tx_cost(view.network, GasOperation::Deploy) {
            if let Some(usd) = cost.usd {
                info!("{} splitter deploy ~${}", view.network, usd);
            }
        }
    }

    let stats = aggregator.stats();
    info!(
        "Feeds: {}/{} live, {} updates, {} failures, {} rejected, connected: {}",
        stats.state.live_feeds,
        stats.state.feed_count,
        stats.state.update_count,
        stats.state.failure_count,
        stats.state.rejected_count,
        snapshot.health.connected
    );
    debug!("Snapshot: {}", serde_json::to_string(&snapshot)?);

    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = ctrl_c => {
                result?;
                info!("Received Ctrl+C");
            }
            _ = terminate.recv() => {
                info!("Received termination signal");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
