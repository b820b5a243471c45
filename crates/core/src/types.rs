//! Core type definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported blockchain networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Ethereum,
    Polygon,
}

impl Network {
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Ethereum => 1,
            Network::Polygon => 137,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Network::Ethereum => "ethereum",
            Network::Polygon => "polygon",
        }
    }

    /// Asset the network charges gas in
    pub fn native_asset(&self) -> Asset {
        match self {
            Network::Ethereum => Asset::Eth,
            Network::Polygon => Asset::Matic,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ethereum" | "eth" | "mainnet" => Ok(Network::Ethereum),
            "polygon" | "matic" => Ok(Network::Polygon),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

/// Tracked assets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Asset {
    Eth,
    Matic,
    Usdc,
}

impl Asset {
    pub const ALL: [Asset; 3] = [Asset::Eth, Asset::Matic, Asset::Usdc];

    pub fn symbol(&self) -> &'static str {
        match self {
            Asset::Eth => "ETH",
            Asset::Matic => "MATIC",
            Asset::Usdc => "USDC",
        }
    }

    /// CoinGecko coin id
    pub fn coingecko_id(&self) -> &'static str {
        match self {
            Asset::Eth => "ethereum",
            Asset::Matic => "matic-network",
            Asset::Usdc => "usd-coin",
        }
    }

    /// Coinbase product id against USD
    pub fn product_id(&self) -> &'static str {
        match self {
            Asset::Eth => "ETH-USD",
            Asset::Matic => "MATIC-USD",
            Asset::Usdc => "USDC-USD",
        }
    }

    pub fn from_product_id(product_id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.product_id() == product_id)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl FromStr for Asset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ETH" => Ok(Asset::Eth),
            "MATIC" | "POL" => Ok(Asset::Matic),
            "USDC" => Ok(Asset::Usdc),
            other => Err(format!("unknown asset: {other}")),
        }
    }
}

/// 24h volatility classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityLevel {
    Unknown,
    Low,
    Moderate,
    High,
}

impl VolatilityLevel {
    pub const LOW_BELOW_PCT: f64 = 2.0;
    pub const MODERATE_BELOW_PCT: f64 = 5.0;

    /// Classify a 24h percentage change by its magnitude
    pub fn from_change_24h(change_pct: Option<f64>) -> Self {
        let Some(change) = change_pct.filter(|c| c.is_finite()) else {
            return VolatilityLevel::Unknown;
        };

        let magnitude = change.abs();
        if magnitude < Self::LOW_BELOW_PCT {
            VolatilityLevel::Low
        } else if magnitude < Self::MODERATE_BELOW_PCT {
            VolatilityLevel::Moderate
        } else {
            VolatilityLevel::High
        }
    }
}

/// Lifecycle of a single tracked feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    Uninitialized,
    Loading,
    Live,
    Stale,
    Reconnecting,
    Stopped,
}

impl FeedStatus {
    pub fn name(&self) -> &'static str {
        match self {
            FeedStatus::Uninitialized => "uninitialized",
            FeedStatus::Loading => "loading",
            FeedStatus::Live => "live",
            FeedStatus::Stale => "stale",
            FeedStatus::Reconnecting => "reconnecting",
            FeedStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Payment splitter operations with conservative gas budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GasOperation {
    Deploy,
    Release,
    ReleaseErc20,
}

impl GasOperation {
    pub fn gas_units(&self) -> u64 {
        match self {
            GasOperation::Deploy => 150_000,
            GasOperation::Release => 80_000,
            GasOperation::ReleaseErc20 => 100_000,
        }
    }
}

/// Wall-clock milliseconds since the unix epoch
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
