//! Error types

use thiserror::Error;

use crate::{Asset, Network, SanityBand};

/// Price feed errors
#[derive(Debug, Clone, Error)]
pub enum PriceFeedError {
    #[error("{source_name} unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("{source_name} timed out after {timeout_ms}ms")]
    Timeout { source_name: String, timeout_ms: u64 },

    #[error("{source_name} quoted {asset} at ${price}, outside [{}, {}]", .band.min_usd, .band.max_usd)]
    InvalidQuote {
        source_name: String,
        asset: Asset,
        price: f64,
        band: SanityBand,
    },

    #[error("{source_name} does not quote {asset}")]
    UnsupportedAsset { source_name: String, asset: Asset },

    #[error("All price sources failed for {asset}: {}", summarize(.failures))]
    AllSourcesFailed {
        asset: Asset,
        failures: Vec<PriceFeedError>,
    },
}

impl PriceFeedError {
    pub fn unavailable(source_name: impl Into<String>, reason: impl ToString) -> Self {
        PriceFeedError::SourceUnavailable {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    /// False once every source has been exhausted for an asset
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, PriceFeedError::AllSourcesFailed { .. })
    }
}

fn summarize(failures: &[PriceFeedError]) -> String {
    if failures.is_empty() {
        return "no sources configured".to_string();
    }
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Streaming connection errors
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Reconnect limit of {0} reached")]
    ReconnectLimit(u32),
}

/// Gas RPC errors, never surfaced past the estimator
#[derive(Debug, Clone, Error)]
pub enum GasError {
    #[error("RPC call {method} to {endpoint} failed: {reason}")]
    RpcCallFailed {
        endpoint: String,
        method: String,
        reason: String,
    },

    #[error("Malformed {method} response: {reason}")]
    MalformedResponse { method: String, reason: String },

    #[error("No RPC endpoints configured for {0}")]
    NoEndpoints(Network),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Load(#[from] config::ConfigError),
}

/// Result type aliases
pub type PriceFeedResult<T> = Result<T, PriceFeedError>;
pub type StreamResult<T> = Result<T, StreamError>;
pub type GasResult<T> = Result<T, GasError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
