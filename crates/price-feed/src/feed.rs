//! Prioritised multi-source price feed

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use livefeed_core::{
    now_ms, Asset, PriceFeedConfig, PriceFeedError, PriceFeedResult, PriceQuote, SanityBand,
};

use crate::sources::{build_sources, PriceSource};
use crate::stream::TickerStream;
use crate::validation::{check_sanity, reconcile, CrossValidation};

/// Message delivered to subscribers
#[derive(Debug, Clone)]
pub enum PriceUpdate {
    Quote(PriceQuote),
    Failed { asset: Asset, error: PriceFeedError },
    Connection { asset: Asset, connected: bool },
}

/// Fetches prices from sources in fixed priority order
pub struct PriceFeed {
    config: PriceFeedConfig,
    sources: Vec<Arc<dyn PriceSource>>,
}

impl PriceFeed {
    /// Build with the REST sources named in `config`
    pub fn new(config: PriceFeedConfig) -> anyhow::Result<Self> {
        let sources = build_sources(&config.sources, config.request_timeout())?;
        Ok(Self::with_sources(config, sources))
    }

    pub fn with_sources(config: PriceFeedConfig, sources: Vec<Arc<dyn PriceSource>>) -> Self {
        Self { config, sources }
    }

    pub fn config(&self) -> &PriceFeedConfig {
        &self.config
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn band_for(&self, asset: Asset) -> Option<SanityBand> {
        self.config.band_for(asset)
    }

    /// One bounded, sanity-checked attempt against one source
    async fn attempt(&self, source: &dyn PriceSource, asset: Asset) -> PriceFeedResult<PriceQuote> {
        let timeout = self.config.request_timeout();
        let quote = tokio::time::timeout(timeout, source.fetch(asset))
            .await
            .map_err(|_| PriceFeedError::Timeout {
                source_name: source.name().to_string(),
                timeout_ms: self.config.request_timeout_ms,
            })??;

        check_sanity(quote, self.band_for(asset))
    }

    /// First sanity-passing quote, trying sources in priority order
    pub async fn fetch_once(&self, asset: Asset) -> PriceFeedResult<PriceQuote> {
        let mut failures = Vec::new();

        for source in &self.sources {
            match self.attempt(source.as_ref(), asset).await {
                Ok(quote) => {
                    debug!("Got {} from {} (${:.2})", asset, source.name(), quote.usd_price);
                    return Ok(quote);
                }
                Err(e @ PriceFeedError::UnsupportedAsset { .. }) => {
                    debug!("{}", e);
                    failures.push(e);
                }
                Err(e) => {
                    warn!("{} failed for {}, trying fallback: {}", source.name(), asset, e);
                    failures.push(e);
                }
            }
        }

        Err(PriceFeedError::AllSourcesFailed { asset, failures })
    }

    /// Query every source concurrently and compare. The first sanity-passing
    /// quote in priority order is published even when sources disagree.
    pub async fn cross_validate(&self, asset: Asset) -> PriceFeedResult<CrossValidation> {
        let results = join_all(
            self.sources
                .iter()
                .map(|source| self.attempt(source.as_ref(), asset)),
        )
        .await;

        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for result in results {
            match result {
                Ok(quote) => accepted.push(quote),
                Err(e) => rejected.push(e),
            }
        }

        let Some(validation) = reconcile(
            asset,
            accepted,
            rejected.clone(),
            self.config.discrepancy_threshold_bps,
            now_ms(),
        ) else {
            return Err(PriceFeedError::AllSourcesFailed {
                asset,
                failures: rejected,
            });
        };

        if let Some(d) = &validation.discrepancy {
            warn!(
                "Price discrepancy for {}: spread {:.2}% exceeds {:.2}% across {:?}",
                asset,
                d.spread_pct(),
                d.threshold_bps as f64 / 100.0,
                d.prices
            );
        }

        Ok(validation)
    }

    /// Stream updates for `asset`, polling `fetch_once` whenever the stream
    /// is down. Returns immediately; `on_update` runs on a spawned task.
    pub fn subscribe<F>(self: &Arc<Self>, asset: Asset, on_update: F) -> PriceSubscription
    where
        F: Fn(PriceUpdate) + Send + Sync + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<PriceUpdate>(256);
        let mut handles = Vec::new();

        let connection = match self.config.stream.clone() {
            Some(stream_config) => {
                let mut stream = TickerStream::new(stream_config, vec![asset]);
                let connection = stream.connection();
                let (quote_tx, mut quote_rx) = mpsc::channel::<PriceQuote>(256);

                handles.push(tokio::spawn(async move {
                    if let Err(e) = stream.run(quote_tx).await {
                        warn!("Ticker stream for {} stopped, polling only: {}", asset, e);
                    }
                }));

                let forward_tx = tx.clone();
                handles.push(tokio::spawn(async move {
                    while let Some(quote) = quote_rx.recv().await {
                        if forward_tx.send(PriceUpdate::Quote(quote)).await.is_err() {
                            break;
                        }
                    }
                }));

                let mut watcher = connection.clone();
                let status_tx = tx.clone();
                handles.push(tokio::spawn(async move {
                    while watcher.changed().await.is_ok() {
                        let connected = *watcher.borrow_and_update();
                        let update = PriceUpdate::Connection { asset, connected };
                        if status_tx.send(update).await.is_err() {
                            break;
                        }
                    }
                }));

                Some(connection)
            }
            None => None,
        };

        handles.push(tokio::spawn(poll_while_disconnected(
            Arc::clone(self),
            asset,
            connection,
            tx,
        )));

        let band = self.band_for(asset);
        handles.push(tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                match update {
                    PriceUpdate::Quote(quote) => match check_sanity(quote, band) {
                        Ok(quote) => on_update(PriceUpdate::Quote(quote)),
                        Err(error) => {
                            warn!("Rejected streamed quote: {}", error);
                            on_update(PriceUpdate::Failed { asset, error });
                        }
                    },
                    other => on_update(other),
                }
            }
        }));

        info!("Subscribed to {} price updates", asset);
        PriceSubscription { asset, handles }
    }
}

async fn poll_while_disconnected(
    feed: Arc<PriceFeed>,
    asset: Asset,
    connection: Option<watch::Receiver<bool>>,
    tx: mpsc::Sender<PriceUpdate>,
) {
    let mut interval = tokio::time::interval(feed.config.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        if connection.as_ref().map_or(false, |c| *c.borrow()) {
            continue;
        }

        let update = match feed.fetch_once(asset).await {
            Ok(quote) => PriceUpdate::Quote(quote),
            Err(error) => PriceUpdate::Failed { asset, error },
        };

        if tx.send(update).await.is_err() {
            break;
        }
    }
}

/// Live subscription; dropping it tears down every task
pub struct PriceSubscription {
    asset: Asset,
    handles: Vec<JoinHandle<()>>,
}

impl PriceSubscription {
    pub fn asset(&self) -> Asset {
        self.asset
    }

    pub fn stop(mut self) {
        self.abort_all();
    }

    fn abort_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for PriceSubscription {
    fn drop(&mut self) {
        self.abort_all();
    }
}
