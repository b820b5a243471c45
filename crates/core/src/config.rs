//! Configuration types

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Asset, ConfigError, ConfigResult, Network, SanityBand};

/// Complete live-data configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveDataConfig {
    /// Asset whose feed health drives `is_connected`
    pub primary_asset: Asset,
    pub tracked_assets: Vec<Asset>,
    pub tracked_networks: Vec<Network>,
    pub price: PriceFeedConfig,
    pub gas: GasConfig,
    pub staleness_check_interval_ms: u64,
    /// Staleness-driven re-fetches of one feed before it waits for its own poll
    pub max_reconnect_attempts: u32,
    /// Upper bound of the random delay before each staleness-driven re-fetch
    pub reconnect_jitter_ms: u64,
    pub event_capacity: usize,
}

impl Default for LiveDataConfig {
    fn default() -> Self {
        Self {
            primary_asset: Asset::Eth,
            tracked_assets: vec![Asset::Eth, Asset::Matic, Asset::Usdc],
            tracked_networks: vec![Network::Ethereum, Network::Polygon],
            price: PriceFeedConfig::default(),
            gas: GasConfig::default(),
            staleness_check_interval_ms: 5_000,
            max_reconnect_attempts: 10,
            reconnect_jitter_ms: 500,
            event_capacity: 1_024,
        }
    }
}

impl LiveDataConfig {
    /// Load from `config/default.toml`, `config/{LIVEFEED_ENV}.toml` and
    /// `LIVEFEED__*` environment variables, later sources winning.
    pub fn load() -> ConfigResult<Self> {
        let env = std::env::var("LIVEFEED_ENV").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(Environment::with_prefix("LIVEFEED").separator("__"))
            .build()?;

        let settings: LiveDataConfig = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.tracked_assets.is_empty() {
            return Err(invalid("tracked_assets", "at least one asset must be tracked"));
        }
        if !self.tracked_assets.contains(&self.primary_asset) {
            return Err(invalid("primary_asset", "must be one of tracked_assets"));
        }
        if self.staleness_check_interval_ms == 0 {
            return Err(invalid("staleness_check_interval_ms", "must be positive"));
        }
        if self.event_capacity == 0 {
            return Err(invalid("event_capacity", "must be positive"));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(invalid("max_reconnect_attempts", "must be positive"));
        }
        for asset in &self.tracked_assets {
            if self.price.band_for(*asset).is_none() {
                return Err(invalid(
                    "price.sanity_bands",
                    &format!("tracked asset {} has no sanity band", asset),
                ));
            }
        }

        self.price.validate()?;
        self.gas.validate(&self.tracked_networks)
    }

    pub fn staleness_check_interval(&self) -> Duration {
        Duration::from_millis(self.staleness_check_interval_ms)
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// A REST price source, in priority order within `PriceFeedConfig::sources`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriceSourceConfig {
    CoinGecko { base_url: String },
    CoinbaseRates { base_url: String },
    Fixed { asset: Asset, usd_price: f64 },
}

/// Streaming ticker connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub url: String,
    /// Delay after the server closes the connection
    pub reconnect_delay_ms: u64,
    /// Delay after a connection or protocol error
    pub error_reconnect_delay_ms: u64,
    /// Upper bound of the random delay added to each reconnect
    pub reconnect_jitter_ms: u64,
    pub max_reconnects: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "wss://advanced-trade-ws.coinbase.com".to_string(),
            reconnect_delay_ms: 1_500,
            error_reconnect_delay_ms: 5_000,
            reconnect_jitter_ms: 500,
            max_reconnects: 10,
        }
    }
}

/// Per-asset sanity band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssetBand {
    pub asset: Asset,
    pub min_usd: f64,
    pub max_usd: f64,
}

impl AssetBand {
    pub fn band(&self) -> SanityBand {
        SanityBand::new(self.min_usd, self.max_usd)
    }
}

/// Price feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceFeedConfig {
    pub sources: Vec<PriceSourceConfig>,
    pub stream: Option<StreamConfig>,
    pub request_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// How often all sources are queried together for cross-validation
    pub cross_check_interval_ms: u64,
    pub stale_after_ms: u64,
    /// Max-min spread that raises a discrepancy, in basis points
    pub discrepancy_threshold_bps: u32,
    pub sanity_bands: Vec<AssetBand>,
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                PriceSourceConfig::CoinGecko {
                    base_url: "https://api.coingecko.com".to_string(),
                },
                PriceSourceConfig::CoinbaseRates {
                    base_url: "https://api.coinbase.com".to_string(),
                },
                PriceSourceConfig::Fixed {
                    asset: Asset::Usdc,
                    usd_price: 1.0,
                },
            ],
            stream: Some(StreamConfig::default()),
            request_timeout_ms: 5_000,
            poll_interval_ms: 10_000,
            cross_check_interval_ms: 60_000,
            stale_after_ms: 60_000,
            discrepancy_threshold_bps: 500,
            sanity_bands: vec![
                AssetBand { asset: Asset::Eth, min_usd: 100.0, max_usd: 100_000.0 },
                AssetBand { asset: Asset::Matic, min_usd: 0.01, max_usd: 100.0 },
                AssetBand { asset: Asset::Usdc, min_usd: 0.9, max_usd: 1.1 },
            ],
        }
    }
}

impl PriceFeedConfig {
    pub fn band_for(&self, asset: Asset) -> Option<SanityBand> {
        self.sanity_bands
            .iter()
            .find(|b| b.asset == asset)
            .map(AssetBand::band)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cross_check_interval(&self) -> Duration {
        Duration::from_millis(self.cross_check_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.sources.is_empty() && self.stream.is_none() {
            return Err(invalid("price.sources", "no price sources configured"));
        }
        if self.request_timeout_ms == 0 || self.poll_interval_ms == 0 {
            return Err(invalid("price", "timeouts and intervals must be positive"));
        }
        if self.cross_check_interval_ms == 0 {
            return Err(invalid("price.cross_check_interval_ms", "must be positive"));
        }
        for band in &self.sanity_bands {
            if !(band.min_usd >= 0.0 && band.min_usd < band.max_usd) {
                return Err(invalid(
                    "price.sanity_bands",
                    &format!("{} band must satisfy 0 <= min < max", band.asset),
                ));
            }
        }
        Ok(())
    }
}

/// Per-network gas RPC settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkGasConfig {
    pub network: Network,
    /// Tried in order until one answers
    pub rpc_urls: Vec<String>,
    /// Used when no priority fee can be read from the node
    pub default_priority_fee_gwei: u64,
    /// Used when every endpoint fails
    pub fallback_base_fee_gwei: u64,
    pub fallback_priority_fee_gwei: u64,
}

impl NetworkGasConfig {
    pub fn ethereum() -> Self {
        Self {
            network: Network::Ethereum,
            rpc_urls: vec![
                "https://eth.llamarpc.com".to_string(),
                "https://rpc.ankr.com/eth".to_string(),
                "https://ethereum.publicnode.com".to_string(),
            ],
            default_priority_fee_gwei: 2,
            fallback_base_fee_gwei: 20,
            fallback_priority_fee_gwei: 2,
        }
    }

    pub fn polygon() -> Self {
        Self {
            network: Network::Polygon,
            rpc_urls: vec![
                "https://polygon.llamarpc.com".to_string(),
                "https://rpc.ankr.com/polygon".to_string(),
                "https://polygon-rpc.com".to_string(),
            ],
            default_priority_fee_gwei: 30,
            fallback_base_fee_gwei: 30,
            fallback_priority_fee_gwei: 30,
        }
    }
}

/// Gas estimator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GasConfig {
    pub networks: Vec<NetworkGasConfig>,
    /// Blocks requested from `eth_feeHistory`
    pub block_count: u64,
    pub reward_percentiles: Vec<f64>,
    /// Which of `reward_percentiles` becomes the priority fee
    pub priority_percentile: f64,
    pub request_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub stale_after_ms: u64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            networks: vec![NetworkGasConfig::ethereum(), NetworkGasConfig::polygon()],
            block_count: 5,
            reward_percentiles: vec![10.0, 50.0, 90.0],
            priority_percentile: 50.0,
            request_timeout_ms: 5_000,
            poll_interval_ms: 15_000,
            stale_after_ms: 30_000,
        }
    }
}

impl GasConfig {
    pub fn network(&self, network: Network) -> Option<&NetworkGasConfig> {
        self.networks.iter().find(|n| n.network == network)
    }

    /// Column of the priority percentile within each reward row
    pub fn priority_column(&self) -> Option<usize> {
        self.reward_percentiles
            .iter()
            .position(|p| (*p - self.priority_percentile).abs() < f64::EPSILON)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    fn validate(&self, tracked: &[Network]) -> ConfigResult<()> {
        if self.block_count == 0 {
            return Err(invalid("gas.block_count", "must be positive"));
        }
        if self.priority_column().is_none() {
            return Err(invalid(
                "gas.priority_percentile",
                "must be one of reward_percentiles",
            ));
        }
        if self.request_timeout_ms == 0 || self.poll_interval_ms == 0 {
            return Err(invalid("gas", "timeouts and intervals must be positive"));
        }
        for network in tracked {
            if self.network(*network).is_none() {
                return Err(invalid(
                    "gas.networks",
                    &format!("tracked network {} has no gas settings", network),
                ));
            }
        }
        Ok(())
    }
}
