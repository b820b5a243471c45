//! Shared live-data state
//!
//! One slot per tracked feed in a DashMap, so independent feeds never
//! contend on a global lock. Every transition of the per-feed state machine
//! goes through this module and is reported back as a `StatusChange`.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use livefeed_core::{now_ms, Asset, FallbackReason, FeeEstimate, FeedStatus, Network, PriceQuote};
use livefeed_price_feed::Discrepancy;

/// Identifies one tracked feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "feed", content = "id", rename_all = "snake_case")]
pub enum FeedId {
    Price(Asset),
    Gas(Network),
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedId::Price(asset) => write!(f, "price:{}", asset),
            FeedId::Gas(network) => write!(f, "gas:{}", network),
        }
    }
}

/// A feed moved between states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub feed: FeedId,
    pub from: FeedStatus,
    pub to: FeedStatus,
}

/// Mutable per-feed record
#[derive(Debug, Clone)]
struct FeedSlot<T> {
    status: FeedStatus,
    latest: Option<T>,
    last_success: Option<Instant>,
    error: Option<String>,
    /// Re-fetches since the last success
    reconnect_attempts: u32,
}

impl<T> FeedSlot<T> {
    fn new() -> Self {
        Self {
            status: FeedStatus::Uninitialized,
            latest: None,
            last_success: None,
            error: None,
            reconnect_attempts: 0,
        }
    }

    fn age(&self) -> Option<Duration> {
        self.last_success.map(|at| at.elapsed())
    }

    /// Stale while flagged so, or once the last success is older than `max_age`
    fn is_stale(&self, max_age: Duration) -> bool {
        matches!(self.status, FeedStatus::Stale | FeedStatus::Reconnecting)
            || self.age().map_or(false, |age| age > max_age)
    }

    fn transition(&mut self, feed: FeedId, to: FeedStatus) -> Option<StatusChange> {
        let from = self.status;
        if from == to || from == FeedStatus::Stopped {
            return None;
        }
        self.status = to;
        Some(StatusChange { feed, from, to })
    }

    fn succeed(&mut self, feed: FeedId, value: T) -> Option<StatusChange> {
        if self.status == FeedStatus::Stopped {
            return None;
        }
        self.latest = Some(value);
        self.last_success = Some(Instant::now());
        self.error = None;
        self.reconnect_attempts = 0;
        self.transition(feed, FeedStatus::Live)
    }

    /// Keep the previous value, record the error
    fn fail(&mut self, feed: FeedId, error: String) -> Option<StatusChange> {
        if self.status == FeedStatus::Stopped {
            return None;
        }
        self.error = Some(error);
        self.transition(feed, FeedStatus::Stale)
    }
}

fn begin_reconnect<T>(slot: &mut FeedSlot<T>, feed: FeedId) -> Option<StatusChange> {
    if slot.status != FeedStatus::Stale {
        return None;
    }
    slot.reconnect_attempts += 1;
    slot.transition(feed, FeedStatus::Reconnecting)
}

/// Read-only view of a price feed
#[derive(Debug, Clone, Serialize)]
pub struct PriceView {
    pub asset: Asset,
    pub status: FeedStatus,
    pub quote: Option<PriceQuote>,
    pub error: Option<String>,
    pub is_stale: bool,
    pub age: Option<Duration>,
    pub stream_connected: bool,
    /// Most recent quote from each source, sorted by source name
    pub by_source: Vec<PriceQuote>,
}

/// Read-only view of a gas feed
#[derive(Debug, Clone, Serialize)]
pub struct FeeView {
    pub network: Network,
    pub status: FeedStatus,
    pub estimate: Option<FeeEstimate>,
    pub error: Option<String>,
    pub is_stale: bool,
    pub age: Option<Duration>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionHealth {
    /// Primary asset price has no error and is not stale
    pub connected: bool,
    /// Assets currently fed by the ticker stream
    pub streaming: Vec<Asset>,
    pub stale_feeds: Vec<FeedId>,
}

/// Point-in-time copy of everything the aggregator knows
#[derive(Debug, Clone, Serialize)]
pub struct LiveSnapshot {
    pub prices: Vec<PriceView>,
    pub fees: Vec<FeeView>,
    pub last_discrepancy: Option<Discrepancy>,
    pub health: ConnectionHealth,
    pub taken_at_ms: u64,
}

impl LiveSnapshot {
    pub fn price(&self, asset: Asset) -> Option<&PriceView> {
        self.prices.iter().find(|p| p.asset == asset)
    }

    pub fn fee(&self, network: Network) -> Option<&FeeView> {
        self.fees.iter().find(|f| f.network == network)
    }
}

/// Per-feed state for every tracked asset and network
#[derive(Debug)]
pub struct LiveState {
    assets: Vec<Asset>,
    networks: Vec<Network>,
    primary_asset: Asset,
    price_stale_after: Duration,
    fee_stale_after: Duration,

    prices: DashMap<Asset, FeedSlot<PriceQuote>>,
    fees: DashMap<Network, FeedSlot<FeeEstimate>>,

    /// Last quote per (asset, source); the latest write wins
    source_quotes: DashMap<(Asset, String), PriceQuote>,
    stream_connected: DashMap<Asset, bool>,
    last_discrepancy: RwLock<Option<Discrepancy>>,

    update_count: AtomicU64,
    failure_count: AtomicU64,
    rejected_count: AtomicU64,
    last_update: RwLock<Option<Instant>>,
}

impl LiveState {
    pub fn new(
        assets: Vec<Asset>,
        networks: Vec<Network>,
        primary_asset: Asset,
        price_stale_after: Duration,
        fee_stale_after: Duration,
    ) -> Self {
        let prices = assets.iter().map(|a| (*a, FeedSlot::new())).collect();
        let fees = networks.iter().map(|n| (*n, FeedSlot::new())).collect();

        Self {
            assets,
            networks,
            primary_asset,
            price_stale_after,
            fee_stale_after,
            prices,
            fees,
            source_quotes: DashMap::new(),
            stream_connected: DashMap::new(),
            last_discrepancy: RwLock::new(None),
            update_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
            last_update: RwLock::new(None),
        }
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub fn networks(&self) -> &[Network] {
        &self.networks
    }

    pub fn feeds(&self) -> Vec<FeedId> {
        self.assets
            .iter()
            .map(|a| FeedId::Price(*a))
            .chain(self.networks.iter().map(|n| FeedId::Gas(*n)))
            .collect()
    }

    pub fn status(&self, feed: FeedId) -> Option<FeedStatus> {
        match feed {
            FeedId::Price(asset) => self.prices.get(&asset).map(|s| s.status),
            FeedId::Gas(network) => self.fees.get(&network).map(|s| s.status),
        }
    }

    fn set_status(&self, feed: FeedId, to: FeedStatus) -> Option<StatusChange> {
        match feed {
            FeedId::Price(asset) => self.prices.get_mut(&asset)?.transition(feed, to),
            FeedId::Gas(network) => self.fees.get_mut(&network)?.transition(feed, to),
        }
    }

    /// A fetch was requested for this feed
    pub fn begin_loading(&self, feed: FeedId) -> Option<StatusChange> {
        self.set_status(feed, FeedStatus::Loading)
    }

    /// Stale feed is being re-fetched; counts towards its reconnect attempts
    pub fn begin_reconnect(&self, feed: FeedId) -> Option<StatusChange> {
        match feed {
            FeedId::Price(asset) => begin_reconnect(&mut *self.prices.get_mut(&asset)?, feed),
            FeedId::Gas(network) => begin_reconnect(&mut *self.fees.get_mut(&network)?, feed),
        }
    }

    /// Re-fetches of `feed` since it last succeeded
    pub fn reconnect_attempts(&self, feed: FeedId) -> u32 {
        match feed {
            FeedId::Price(asset) => self.prices.get(&asset).map_or(0, |s| s.reconnect_attempts),
            FeedId::Gas(network) => self.fees.get(&network).map_or(0, |s| s.reconnect_attempts),
        }
    }

    /// Accept a validated quote as the asset's current price
    pub fn record_price(&self, quote: PriceQuote) -> Option<StatusChange> {
        let asset = quote.asset;
        self.record_source_quote(&quote);

        let change = self
            .prices
            .get_mut(&asset)?
            .succeed(FeedId::Price(asset), quote);
        self.touch();
        change
    }

    /// Remember a quote per source without publishing it
    pub fn record_source_quote(&self, quote: &PriceQuote) {
        self.source_quotes
            .insert((quote.asset, quote.source.clone()), quote.clone());
    }

    /// Store a fee estimate. A fully hard-coded estimate counts as a failure:
    /// it only replaces the current value when there is nothing better.
    pub fn record_fee(&self, network: Network, estimate: FeeEstimate) -> Option<StatusChange> {
        let feed = FeedId::Gas(network);
        let mut slot = self.fees.get_mut(&network)?;

        if let Some(FallbackReason::AllEndpointsFailed { last_error }) = estimate.fallback_reason() {
            let error = last_error.clone();
            if slot.latest.is_none() && slot.status != FeedStatus::Stopped {
                slot.latest = Some(estimate);
            }
            self.failure_count.fetch_add(1, Ordering::Relaxed);
            return slot.fail(feed, error);
        }

        let change = slot.succeed(feed, estimate);
        drop(slot);
        self.touch();
        change
    }

    /// Fetch failed; previous value stays visible
    pub fn record_failure(&self, feed: FeedId, error: impl Into<String>) -> Option<StatusChange> {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        let error = error.into();
        match feed {
            FeedId::Price(asset) => self.prices.get_mut(&asset)?.fail(feed, error),
            FeedId::Gas(network) => self.fees.get_mut(&network)?.fail(feed, error),
        }
    }

    /// A single quote was thrown away. The feed keeps its status and ages
    /// out through `check_staleness` if nothing valid follows.
    pub fn record_rejection(&self, asset: Asset) {
        if self.prices.contains_key(&asset) {
            self.rejected_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_discrepancy(&self, discrepancy: Discrepancy) {
        *self.last_discrepancy.write() = Some(discrepancy);
    }

    pub fn set_stream_connected(&self, asset: Asset, connected: bool) {
        self.stream_connected.insert(asset, connected);
    }

    /// Move every live feed past its threshold to `Stale`
    pub fn check_staleness(&self) -> Vec<StatusChange> {
        let mut changes = Vec::new();

        for mut slot in self.prices.iter_mut() {
            let feed = FeedId::Price(*slot.key());
            if slot.status == FeedStatus::Live && slot.is_stale(self.price_stale_after) {
                changes.extend(slot.transition(feed, FeedStatus::Stale));
            }
        }
        for mut slot in self.fees.iter_mut() {
            let feed = FeedId::Gas(*slot.key());
            if slot.status == FeedStatus::Live && slot.is_stale(self.fee_stale_after) {
                changes.extend(slot.transition(feed, FeedStatus::Stale));
            }
        }

        changes
    }

    /// Feeds currently in `Stale`, in tracking order
    pub fn stale_feeds(&self) -> Vec<FeedId> {
        self.feeds()
            .into_iter()
            .filter(|feed| self.status(*feed) == Some(FeedStatus::Stale))
            .collect()
    }

    /// Terminal teardown of every feed
    pub fn mark_stopped(&self) -> Vec<StatusChange> {
        self.feeds()
            .into_iter()
            .filter_map(|feed| self.set_status(feed, FeedStatus::Stopped))
            .collect()
    }

    /// Make stopped feeds startable again; cached values are kept
    pub fn reset_stopped(&self) {
        for mut slot in self.prices.iter_mut() {
            if slot.status == FeedStatus::Stopped {
                slot.status = FeedStatus::Uninitialized;
                slot.reconnect_attempts = 0;
            }
        }
        for mut slot in self.fees.iter_mut() {
            if slot.status == FeedStatus::Stopped {
                slot.status = FeedStatus::Uninitialized;
                slot.reconnect_attempts = 0;
            }
        }
        self.stream_connected.clear();
    }

    pub fn latest_price(&self, asset: Asset) -> Option<PriceQuote> {
        self.prices.get(&asset).and_then(|s| s.latest.clone())
    }

    pub fn latest_fee(&self, network: Network) -> Option<FeeEstimate> {
        self.fees.get(&network).and_then(|s| s.latest.clone())
    }

    pub fn price_view(&self, asset: Asset) -> Option<PriceView> {
        let slot = self.prices.get(&asset)?;

        let mut by_source: Vec<PriceQuote> = self
            .source_quotes
            .iter()
            .filter(|e| e.key().0 == asset)
            .map(|e| e.value().clone())
            .collect();
        by_source.sort_by(|a, b| a.source.cmp(&b.source));

        Some(PriceView {
            asset,
            status: slot.status,
            quote: slot.latest.clone(),
            error: slot.error.clone(),
            is_stale: slot.is_stale(self.price_stale_after),
            age: slot.age(),
            stream_connected: self.is_streaming(asset),
            by_source,
        })
    }

    pub fn fee_view(&self, network: Network) -> Option<FeeView> {
        let slot = self.fees.get(&network)?;

        Some(FeeView {
            network,
            status: slot.status,
            estimate: slot.latest.clone(),
            error: slot.error.clone(),
            is_stale: slot.is_stale(self.fee_stale_after),
            age: slot.age(),
        })
    }

    fn is_streaming(&self, asset: Asset) -> bool {
        self.stream_connected.get(&asset).map_or(false, |c| *c)
    }

    /// Primary price feed has data, no error and is not stale
    pub fn is_connected(&self) -> bool {
        self.prices.get(&self.primary_asset).map_or(false, |slot| {
            slot.latest.is_some()
                && slot.error.is_none()
                && !slot.is_stale(self.price_stale_after)
        })
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        let prices: Vec<PriceView> = self
            .assets
            .iter()
            .filter_map(|a| self.price_view(*a))
            .collect();
        let fees: Vec<FeeView> = self
            .networks
            .iter()
            .filter_map(|n| self.fee_view(*n))
            .collect();

        let stale_feeds = prices
            .iter()
            .filter(|p| p.is_stale)
            .map(|p| FeedId::Price(p.asset))
            .chain(fees.iter().filter(|f| f.is_stale).map(|f| FeedId::Gas(f.network)))
            .collect();

        let health = ConnectionHealth {
            connected: self.is_connected(),
            streaming: self
                .assets
                .iter()
                .copied()
                .filter(|a| self.is_streaming(*a))
                .collect(),
            stale_feeds,
        };

        LiveSnapshot {
            prices,
            fees,
            last_discrepancy: self.last_discrepancy.read().clone(),
            health,
            taken_at_ms: now_ms(),
        }
    }

    fn touch(&self) {
        self.update_count.fetch_add(1, Ordering::Relaxed);
        *self.last_update.write() = Some(Instant::now());
    }

    pub fn stats(&self) -> LiveStateStats {
        let live_feeds = self
            .feeds()
            .into_iter()
            .filter(|feed| self.status(*feed) == Some(FeedStatus::Live))
            .count();

        LiveStateStats {
            feed_count: self.prices.len() + self.fees.len(),
            live_feeds,
            update_count: self.update_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            rejected_count: self.rejected_count.load(Ordering::Relaxed),
            last_update_age: self.last_update.read().map(|at| at.elapsed()),
        }
    }
}

/// Counters over the whole state
#[derive(Debug, Clone)]
pub struct LiveStateStats {
    pub feed_count: usize,
    pub live_feeds: usize,
    pub update_count: u64,
    pub failure_count: u64,
    /// Streamed quotes dropped by the sanity check
    pub rejected_count: u64,
    pub last_update_age: Option<Duration>,
}
