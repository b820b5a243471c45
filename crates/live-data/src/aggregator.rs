//! Live data aggregator - coordinates price and gas feeds

use futures::future::join_all;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use livefeed_core::{
    Asset, FeeEstimate, GasOperation, LiveDataConfig, Network, PriceQuote, TxCost,
    VolatilityLevel,
};
use livefeed_gas_oracle::{FeeSource, GasFeeEstimator};
use livefeed_price_feed::{Discrepancy, PriceFeed, PriceSubscription, PriceUpdate};

use crate::state::{FeedId, LiveSnapshot, LiveState, LiveStateStats, StatusChange};

/// Change notifications for observers
#[derive(Debug, Clone)]
pub enum LiveEvent {
    PriceUpdated(PriceQuote),
    FeeUpdated { network: Network, estimate: FeeEstimate },
    StatusChanged(StatusChange),
    Discrepancy(Discrepancy),
}

/// Everything the spawned tasks share
struct Shared {
    config: LiveDataConfig,
    state: Arc<LiveState>,
    price_feed: Arc<PriceFeed>,
    fee_source: Arc<dyn FeeSource>,
    events: broadcast::Sender<LiveEvent>,
}

impl Shared {
    fn emit(&self, event: LiveEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn emit_change(&self, change: Option<StatusChange>) {
        if let Some(change) = change {
            debug!("{} {} -> {}", change.feed, change.from, change.to);
            self.emit(LiveEvent::StatusChanged(change));
        }
    }

    fn apply_price_update(&self, update: PriceUpdate) {
        match update {
            PriceUpdate::Quote(quote) => self.publish_price(quote),
            PriceUpdate::Failed { asset, error } if error.is_recoverable() => {
                // One bad tick; staleness catches a feed that keeps failing
                warn!("Dropped {} update: {}", asset, error);
                self.state.record_rejection(asset);
            }
            PriceUpdate::Failed { asset, error } => {
                warn!("Price update for {} failed: {}", asset, error);
                self.emit_change(self.state.record_failure(FeedId::Price(asset), error.to_string()));
            }
            PriceUpdate::Connection { asset, connected } => {
                info!("Ticker stream for {} {}", asset, if connected { "up" } else { "down" });
                self.state.set_stream_connected(asset, connected);
            }
        }
    }

    fn publish_price(&self, quote: PriceQuote) {
        let change = self.state.record_price(quote.clone());
        self.emit(LiveEvent::PriceUpdated(quote));
        self.emit_change(change);
    }

    fn publish_fee(&self, network: Network, estimate: FeeEstimate) {
        if let Some(reason) = estimate.fallback_reason() {
            debug!("{} fee estimate is a fallback: {:?}", network, reason);
        }
        let change = self.state.record_fee(network, estimate.clone());
        self.emit(LiveEvent::FeeUpdated { network, estimate });
        self.emit_change(change);
    }

    async fn fetch_price(&self, asset: Asset) {
        match self.price_feed.fetch_once(asset).await {
            Ok(quote) => self.publish_price(quote),
            Err(e) => {
                warn!("Price fetch for {} failed: {}", asset, e);
                self.emit_change(self.state.record_failure(FeedId::Price(asset), e.to_string()));
            }
        }
    }

    async fn fetch_fee(&self, network: Network) {
        let estimate = self.fee_source.fee_estimate(network).await;
        self.publish_fee(network, estimate);
    }

    async fn fetch(&self, feed: FeedId) {
        match feed {
            FeedId::Price(asset) => self.fetch_price(asset).await,
            FeedId::Gas(network) => self.fetch_fee(network).await,
        }
    }

    async fn cross_check(&self, asset: Asset) -> Option<Discrepancy> {
        let validation = match self.price_feed.cross_validate(asset).await {
            Ok(validation) => validation,
            Err(e) => {
                debug!("Cross-check for {} found no usable quote: {}", asset, e);
                return None;
            }
        };

        for quote in &validation.accepted {
            self.state.record_source_quote(quote);
        }
        self.publish_price(validation.published);

        let discrepancy = validation.discrepancy?;
        self.state.record_discrepancy(discrepancy.clone());
        self.emit(LiveEvent::Discrepancy(discrepancy.clone()));
        Some(discrepancy)
    }

    /// Re-fetch every stale feed concurrently, each after a random delay.
    /// Feeds past `max_reconnect_attempts` are left to their regular poll.
    async fn reconnect_stale(&self) {
        let max_attempts = self.config.max_reconnect_attempts;
        let due: Vec<FeedId> = self
            .state
            .stale_feeds()
            .into_iter()
            .filter(|feed| {
                let attempts = self.state.reconnect_attempts(*feed);
                if attempts >= max_attempts {
                    debug!("{} gave up reconnecting after {} attempts", feed, attempts);
                    return false;
                }
                true
            })
            .collect();
        if due.is_empty() {
            return;
        }

        info!("Reconnecting {} stale feed(s)", due.len());
        let jitter_ms = self.config.reconnect_jitter_ms;
        join_all(due.into_iter().map(|feed| async move {
            tokio::time::sleep(jitter(jitter_ms)).await;
            if let Some(change) = self.state.begin_reconnect(feed) {
                info!(
                    "Reconnecting {} (attempt {}/{})",
                    feed,
                    self.state.reconnect_attempts(feed),
                    max_attempts
                );
                self.emit_change(Some(change));
                self.fetch(feed).await;
            }
        }))
        .await;
    }
}

/// Owns the price and gas feeds and the state they write into
pub struct LiveDataAggregator {
    shared: Arc<Shared>,
    subscriptions: Vec<PriceSubscription>,
    handles: Vec<JoinHandle<()>>,
    running: Arc<RwLock<bool>>,
}

impl LiveDataAggregator {
    /// Build with the configured REST sources, ticker stream and RPC endpoints
    pub fn new(config: LiveDataConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let price_feed = Arc::new(PriceFeed::new(config.price.clone())?);
        let fee_source = Arc::new(GasFeeEstimator::new(config.gas.clone())?);
        Ok(Self::with_components(config, price_feed, fee_source))
    }

    pub fn with_components(
        config: LiveDataConfig,
        price_feed: Arc<PriceFeed>,
        fee_source: Arc<dyn FeeSource>,
    ) -> Self {
        let state = Arc::new(LiveState::new(
            config.tracked_assets.clone(),
            config.tracked_networks.clone(),
            config.primary_asset,
            config.price.stale_after(),
            config.gas.stale_after(),
        ));
        let (events, _) = broadcast::channel(config.event_capacity);

        Self {
            shared: Arc::new(Shared {
                config,
                state,
                price_feed,
                fee_source,
                events,
            }),
            subscriptions: vec![],
            handles: vec![],
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Get shared state reference
    pub fn state(&self) -> Arc<LiveState> {
        Arc::clone(&self.shared.state)
    }

    pub fn config(&self) -> &LiveDataConfig {
        &self.shared.config
    }

    /// Start every feed. Returns immediately; work runs on spawned tasks.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        if *self.running.read().await {
            warn!("Live data aggregator already running");
            return Ok(());
        }

        info!("Starting live data aggregator");
        *self.running.write().await = true;
        let shared = Arc::clone(&self.shared);
        shared.state.reset_stopped();

        for asset in shared.config.tracked_assets.clone() {
            shared.emit_change(shared.state.begin_loading(FeedId::Price(asset)));

            let sink = Arc::clone(&shared);
            let subscription = shared
                .price_feed
                .subscribe(asset, move |update| sink.apply_price_update(update));
            self.subscriptions.push(subscription);

            self.handles.push(tokio::spawn(cross_check_loop(Arc::clone(&shared), asset)));
            info!("Started price feed for {}", asset);
        }

        for network in shared.config.tracked_networks.clone() {
            shared.emit_change(shared.state.begin_loading(FeedId::Gas(network)));
            self.handles.push(tokio::spawn(gas_poll_loop(Arc::clone(&shared), network)));
            info!("Started gas feed for {}", network);
        }

        self.handles.push(tokio::spawn(staleness_loop(
            Arc::clone(&shared),
            Arc::clone(&self.running),
        )));

        Ok(())
    }

    /// Stop all feeds and mark them `Stopped`
    pub async fn stop(&mut self) {
        info!("Stopping live data aggregator");
        *self.running.write().await = false;

        for subscription in self.subscriptions.drain(..) {
            subscription.stop();
        }
        for handle in self.handles.drain(..) {
            handle.abort();
        }

        for change in self.shared.state.mark_stopped() {
            self.shared.emit_change(Some(change));
        }
    }

    /// Check if running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Re-fetch every feed now. Each goes to `Loading`, then `Live` on
    /// success or back to `Stale` with its previous value on failure.
    pub async fn refresh(&self) {
        info!("Refreshing all feeds");
        let shared = &self.shared;

        join_all(shared.state.feeds().into_iter().map(|feed| async move {
            shared.emit_change(shared.state.begin_loading(feed));
            shared.fetch(feed).await;
        }))
        .await;
    }

    /// Query every price source for `asset` at once and record any discrepancy
    pub async fn cross_check(&self, asset: Asset) -> Option<Discrepancy> {
        self.shared.cross_check(asset).await
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        self.shared.state.snapshot()
    }

    /// 24h volatility of the latest quote for `asset`
    pub fn volatility_level(&self, asset: Asset) -> VolatilityLevel {
        let change = self
            .shared
            .state
            .latest_price(asset)
            .and_then(|quote| quote.change_24h);
        VolatilityLevel::from_change_24h(change)
    }

    /// Primary price feed has no error and is not stale
    pub fn is_connected(&self) -> bool {
        self.shared.state.is_connected()
    }

    /// Cost of a splitter operation at the latest max fee, in native units
    /// and USD. `None` until a fee estimate exists for `network`.
    pub fn estimate_tx_cost(&self, network: Network, operation: GasOperation) -> Option<TxCost> {
        let estimate = self.shared.state.latest_fee(network)?;
        let native_usd = self
            .shared
            .state
            .latest_price(network.native_asset())
            .map(|quote| quote.usd_price);

        Some(estimate.quote().tx_cost(operation.gas_units(), native_usd))
    }

    /// Subscribe to change notifications
    pub fn events(&self) -> broadcast::Receiver<LiveEvent> {
        self.shared.events.subscribe()
    }

    /// Change notifications as a `Stream`; lagged receivers skip ahead
    pub fn event_stream(&self) -> BroadcastStream<LiveEvent> {
        BroadcastStream::new(self.events())
    }

    /// Get statistics
    pub fn stats(&self) -> AggregatorStats {
        let state_stats = self.shared.state.stats();

        AggregatorStats {
            task_count: self.handles.len(),
            subscription_count: self.subscriptions.len(),
            state: state_stats,
        }
    }
}

impl Drop for LiveDataAggregator {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

fn jitter(max_ms: u64) -> Duration {
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

async fn cross_check_loop(shared: Arc<Shared>, asset: Asset) {
    let period = shared.config.price.cross_check_interval();
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        shared.cross_check(asset).await;
    }
}

async fn gas_poll_loop(shared: Arc<Shared>, network: Network) {
    let mut interval = tokio::time::interval(shared.config.gas.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        shared.fetch_fee(network).await;
    }
}

async fn staleness_loop(shared: Arc<Shared>, running: Arc<RwLock<bool>>) {
    let period = shared.config.staleness_check_interval();
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        if !*running.read().await {
            break;
        }

        for change in shared.state.check_staleness() {
            warn!("{} went stale", change.feed);
            shared.emit_change(Some(change));
        }
        shared.reconnect_stale().await;
    }
}

/// Aggregator statistics
#[derive(Debug, Clone)]
pub struct AggregatorStats {
    pub task_count: usize,
    pub subscription_count: usize,
    pub state: LiveStateStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use livefeed_core::{
        gwei, now_ms, FallbackReason, FeeQuote, FeedStatus, PriceFeedConfig, PriceFeedError,
        PriceFeedResult, SanityBand,
    };
    use livefeed_price_feed::PriceSource;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;

    /// Price source whose answer can be changed mid-test
    struct ScriptedSource {
        name: &'static str,
        price: Mutex<Option<f64>>,
        change_24h: Option<f64>,
    }

    impl ScriptedSource {
        fn new(name: &'static str, price: Option<f64>) -> Arc<Self> {
            Arc::new(Self {
                name,
                price: Mutex::new(price),
                change_24h: None,
            })
        }

        fn set(&self, price: Option<f64>) {
            *self.price.lock() = price;
        }
    }

    #[async_trait]
    impl PriceSource for ScriptedSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self, asset: Asset) -> PriceFeedResult<PriceQuote> {
            let price = *self.price.lock();
            match price {
                Some(price) => Ok(PriceQuote::new(asset, price, self.name, now_ms())
                    .with_change_24h(self.change_24h)),
                None => Err(PriceFeedError::unavailable(self.name, "HTTP 500")),
            }
        }
    }

    struct StaticFees {
        live: bool,
    }

    #[async_trait]
    impl FeeSource for StaticFees {
        async fn fee_estimate(&self, network: Network) -> FeeEstimate {
            let quote = FeeQuote::from_gwei(network, 20, 2, now_ms());
            if self.live {
                FeeEstimate::Live(quote)
            } else {
                FeeEstimate::Fallback {
                    quote,
                    reason: FallbackReason::AllEndpointsFailed {
                        last_error: "HTTP 503".to_string(),
                    },
                }
            }
        }
    }

    fn config() -> LiveDataConfig {
        LiveDataConfig {
            primary_asset: Asset::Eth,
            tracked_assets: vec![Asset::Eth],
            tracked_networks: vec![Network::Ethereum],
            price: PriceFeedConfig {
                sources: vec![],
                stream: None,
                poll_interval_ms: 600_000,
                cross_check_interval_ms: 600_000,
                ..PriceFeedConfig::default()
            },
            ..LiveDataConfig::default()
        }
    }

    fn aggregator(sources: Vec<Arc<ScriptedSource>>, fees_live: bool) -> LiveDataAggregator {
        aggregator_with(config(), sources, fees_live)
    }

    fn aggregator_with(
        config: LiveDataConfig,
        sources: Vec<Arc<ScriptedSource>>,
        fees_live: bool,
    ) -> LiveDataAggregator {
        let sources = sources
            .into_iter()
            .map(|s| s as Arc<dyn PriceSource>)
            .collect();
        let feed = Arc::new(PriceFeed::with_sources(config.price.clone(), sources));
        LiveDataAggregator::with_components(config, feed, Arc::new(StaticFees { live: fees_live }))
    }

    fn status_changes(rx: &mut broadcast::Receiver<LiveEvent>) -> Vec<(FeedStatus, FeedStatus)> {
        let mut changes = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let LiveEvent::StatusChanged(change) = event {
                if change.feed == FeedId::Price(Asset::Eth) {
                    changes.push((change.from, change.to));
                }
            }
        }
        changes
    }

    #[tokio::test]
    async fn test_aggregator_creation() {
        let aggregator = aggregator(vec![], true);

        assert!(!aggregator.is_running().await);
        assert_eq!(aggregator.stats().task_count, 0);
        assert_eq!(aggregator.volatility_level(Asset::Eth), VolatilityLevel::Unknown);
        assert!(!aggregator.is_connected());
        assert!(aggregator
            .estimate_tx_cost(Network::Ethereum, GasOperation::Deploy)
            .is_none());
    }

    #[tokio::test]
    async fn test_refresh_recovers_stale_feed() {
        let source = ScriptedSource::new("primary", None);
        let aggregator = aggregator(vec![source.clone()], true);

        aggregator.refresh().await;
        assert_eq!(
            aggregator.snapshot().price(Asset::Eth).unwrap().status,
            FeedStatus::Stale
        );

        let mut events = aggregator.events();
        source.set(Some(3000.0));
        aggregator.refresh().await;

        assert_eq!(
            status_changes(&mut events),
            vec![
                (FeedStatus::Stale, FeedStatus::Loading),
                (FeedStatus::Loading, FeedStatus::Live)
            ]
        );
        let view = aggregator.snapshot().price(Asset::Eth).cloned().unwrap();
        assert!(!view.is_stale);
        assert!(view.error.is_none());
        assert!(aggregator.is_connected());
    }

    #[tokio::test]
    async fn test_all_sources_failing_keeps_cached_price() {
        let primary = ScriptedSource::new("primary", Some(3000.0));
        let backup = ScriptedSource::new("backup", Some(3001.0));
        let aggregator = aggregator(vec![primary.clone(), backup.clone()], true);

        aggregator.refresh().await;
        primary.set(None);
        backup.set(None);
        aggregator.refresh().await;

        let snapshot = aggregator.snapshot();
        let view = snapshot.price(Asset::Eth).unwrap();
        assert!(view.error.as_deref().unwrap().contains("All price sources failed"));
        assert!(view.is_stale);
        assert_eq!(view.quote.as_ref().unwrap().usd_price, 3000.0);
        assert!(!snapshot.health.connected);
        assert_eq!(snapshot.health.stale_feeds, vec![FeedId::Price(Asset::Eth)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness_escalates_and_recovers() {
        let source = ScriptedSource::new("primary", Some(3000.0));
        let mut aggregator = aggregator(vec![source.clone()], true);

        aggregator.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            aggregator.snapshot().price(Asset::Eth).unwrap().status,
            FeedStatus::Live
        );

        source.set(None);
        tokio::time::sleep(Duration::from_secs(66)).await;

        let view = aggregator.snapshot().price(Asset::Eth).cloned().unwrap();
        assert_eq!(view.status, FeedStatus::Stale);
        assert!(view.is_stale);
        assert_eq!(view.quote.unwrap().usd_price, 3000.0);

        // Still stale until a fetch succeeds
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(aggregator.snapshot().price(Asset::Eth).unwrap().is_stale);

        source.set(Some(3050.0));
        tokio::time::sleep(Duration::from_secs(6)).await;

        let view = aggregator.snapshot().price(Asset::Eth).cloned().unwrap();
        assert_eq!(view.status, FeedStatus::Live);
        assert!(!view.is_stale);
        assert_eq!(view.quote.unwrap().usd_price, 3050.0);
        assert_eq!(
            aggregator.snapshot().fee(Network::Ethereum).unwrap().status,
            FeedStatus::Live
        );

        aggregator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_band_tick_keeps_feed_live() {
        let aggregator = aggregator(vec![], true);
        let shared = &aggregator.shared;
        let mut events = aggregator.events();

        shared.apply_price_update(PriceUpdate::Quote(PriceQuote::new(
            Asset::Eth,
            3000.0,
            "Coinbase WS",
            now_ms(),
        )));
        shared.apply_price_update(PriceUpdate::Failed {
            asset: Asset::Eth,
            error: PriceFeedError::InvalidQuote {
                source_name: "Coinbase WS".to_string(),
                asset: Asset::Eth,
                price: 5.0,
                band: SanityBand::new(100.0, 100_000.0),
            },
        });

        let view = aggregator.snapshot().price(Asset::Eth).cloned().unwrap();
        assert_eq!(view.status, FeedStatus::Live);
        assert!(!view.is_stale);
        assert!(view.error.is_none());
        assert_eq!(view.quote.unwrap().usd_price, 3000.0);
        assert!(aggregator.is_connected());
        assert_eq!(aggregator.stats().state.rejected_count, 1);
        assert_eq!(status_changes(&mut events), vec![(FeedStatus::Uninitialized, FeedStatus::Live)]);

        // No valid tick follows, so the feed ages out
        tokio::time::advance(Duration::from_secs(61)).await;
        shared.state.check_staleness();
        assert_eq!(
            aggregator.snapshot().price(Asset::Eth).unwrap().status,
            FeedStatus::Stale
        );

        // Exhausting every source is still an immediate failure
        shared.apply_price_update(PriceUpdate::Quote(PriceQuote::new(
            Asset::Eth,
            3001.0,
            "Coinbase WS",
            now_ms(),
        )));
        shared.apply_price_update(PriceUpdate::Failed {
            asset: Asset::Eth,
            error: PriceFeedError::AllSourcesFailed {
                asset: Asset::Eth,
                failures: vec![],
            },
        });
        assert_eq!(
            aggregator.snapshot().price(Asset::Eth).unwrap().status,
            FeedStatus::Stale
        );
        assert!(!aggregator.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_attempts_are_capped() {
        let source = ScriptedSource::new("primary", None);
        let config = LiveDataConfig {
            max_reconnect_attempts: 2,
            ..config()
        };
        let aggregator = aggregator_with(config, vec![source.clone()], true);
        let feed = FeedId::Price(Asset::Eth);

        aggregator.refresh().await;
        let failures = aggregator.stats().state.failure_count;

        for _ in 0..4 {
            aggregator.shared.reconnect_stale().await;
        }
        let state = aggregator.state();
        assert_eq!(aggregator.stats().state.failure_count - failures, 2);
        assert_eq!(state.reconnect_attempts(feed), 2);
        assert_eq!(state.status(feed), Some(FeedStatus::Stale));

        source.set(Some(3000.0));
        aggregator.shared.reconnect_stale().await;
        assert_eq!(state.status(feed), Some(FeedStatus::Stale));

        aggregator.refresh().await;
        assert_eq!(state.status(feed), Some(FeedStatus::Live));
        assert_eq!(state.reconnect_attempts(feed), 0);
    }

    #[test]
    fn test_jitter_bounds() {
        assert_eq!(jitter(0), Duration::ZERO);
        for _ in 0..100 {
            assert!(jitter(250) <= Duration::from_millis(250));
        }
    }

    #[tokio::test]
    async fn test_cross_check_records_discrepancy() {
        let aggregator = aggregator(
            vec![
                ScriptedSource::new("a", Some(3000.0)),
                ScriptedSource::new("b", Some(3010.0)),
                ScriptedSource::new("c", Some(3200.0)),
            ],
            true,
        );
        let mut events = aggregator.events();

        let discrepancy = aggregator.cross_check(Asset::Eth).await.unwrap();
        assert_eq!(discrepancy.spread_bps, 667);

        let snapshot = aggregator.snapshot();
        let view = snapshot.price(Asset::Eth).unwrap();
        assert_eq!(view.quote.as_ref().unwrap().usd_price, 3000.0);
        assert_eq!(view.by_source.len(), 3);
        assert_eq!(snapshot.last_discrepancy, Some(discrepancy));

        let mut saw_discrepancy = false;
        while let Ok(event) = events.try_recv() {
            saw_discrepancy |= matches!(event, LiveEvent::Discrepancy(_));
        }
        assert!(saw_discrepancy);
    }

    #[tokio::test]
    async fn test_volatility_from_latest_quote() {
        let source = Arc::new(ScriptedSource {
            name: "primary",
            price: Mutex::new(Some(3000.0)),
            change_24h: Some(-3.4),
        });
        let aggregator = aggregator(vec![source], true);

        aggregator.refresh().await;
        assert_eq!(aggregator.volatility_level(Asset::Eth), VolatilityLevel::Moderate);
        assert_eq!(aggregator.volatility_level(Asset::Matic), VolatilityLevel::Unknown);
    }

    #[tokio::test]
    async fn test_tx_cost_uses_latest_fee_and_price() {
        let aggregator = aggregator(vec![ScriptedSource::new("primary", Some(3000.0))], true);
        aggregator.refresh().await;

        let cost = aggregator
            .estimate_tx_cost(Network::Ethereum, GasOperation::Deploy)
            .unwrap();

        assert_eq!(cost.total_wei, gwei(26) * alloy_primitives::U256::from(150_000u64));
        assert_eq!(cost.native_amount, Some(Decimal::new(39, 4)));
        assert_eq!(cost.usd, Some(Decimal::new(117, 1)));
    }

    #[tokio::test]
    async fn test_fee_fallback_marks_gas_stale() {
        let aggregator = aggregator(vec![ScriptedSource::new("primary", Some(3000.0))], false);
        aggregator.refresh().await;

        let snapshot = aggregator.snapshot();
        let fee = snapshot.fee(Network::Ethereum).unwrap();
        assert_eq!(fee.status, FeedStatus::Stale);
        assert_eq!(fee.error.as_deref(), Some("HTTP 503"));
        assert!(fee.estimate.as_ref().is_some_and(|e| !e.is_live()));

        // A fallback quote still prices transactions
        assert!(aggregator
            .estimate_tx_cost(Network::Ethereum, GasOperation::Release)
            .is_some());
        assert!(snapshot.health.connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_tears_down() {
        let source = ScriptedSource::new("primary", Some(3000.0));
        let mut aggregator = aggregator(vec![source], true);

        aggregator.start().await.unwrap();
        assert!(aggregator.is_running().await);
        assert_eq!(aggregator.stats().subscription_count, 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        aggregator.stop().await;

        assert!(!aggregator.is_running().await);
        assert_eq!(aggregator.stats().task_count, 0);
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.price(Asset::Eth).unwrap().status, FeedStatus::Stopped);
        assert_eq!(snapshot.fee(Network::Ethereum).unwrap().status, FeedStatus::Stopped);

        let updates = aggregator.stats().state.update_count;
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(aggregator.stats().state.update_count, updates);
    }
}
