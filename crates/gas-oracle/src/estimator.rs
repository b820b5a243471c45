//! EIP-1559 fee estimation with endpoint fallback
//!
//! Every failure path degrades to a best-effort quote: the result is a
//! `FeeEstimate` whose tag tells callers whether the numbers are live.

use alloy_primitives::U256;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use livefeed_core::{
    gwei, now_ms, FallbackReason, FeeEstimate, FeeQuote, GasConfig, GasError, GasResult, Network,
    NetworkGasConfig,
};

use crate::history::{parse_quantity, FeeHistory, FEE_HISTORY, MAX_PRIORITY_FEE};
use crate::rpc::JsonRpcClient;

/// Anything that can quote fees for a network
#[async_trait]
pub trait FeeSource: Send + Sync {
    async fn fee_estimate(&self, network: Network) -> FeeEstimate;
}

/// Fee estimator over an ordered endpoint list per network
pub struct GasFeeEstimator {
    config: GasConfig,
    endpoints: HashMap<Network, Vec<JsonRpcClient>>,
}

impl GasFeeEstimator {
    pub fn new(config: GasConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("livefeed/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let endpoints = config
            .networks
            .iter()
            .map(|net| {
                let clients = net
                    .rpc_urls
                    .iter()
                    .map(|url| JsonRpcClient::new(client.clone(), url.as_str()))
                    .collect();
                (net.network, clients)
            })
            .collect();

        Ok(Self { config, endpoints })
    }

    pub fn config(&self) -> &GasConfig {
        &self.config
    }

    /// Current fee quote for `network`. Never fails.
    pub async fn get_fee_quote(&self, network: Network) -> FeeEstimate {
        let net_config = self
            .config
            .network(network)
            .cloned()
            .unwrap_or_else(|| default_network_config(network));

        let mut last_error = GasError::NoEndpoints(network);

        for client in self.endpoints.get(&network).into_iter().flatten() {
            match self.quote_from(client, &net_config).await {
                Ok(estimate) => return estimate,
                Err(e) => {
                    warn!("Gas endpoint {} failed for {}: {}", client.url(), network, e);
                    last_error = e;
                }
            }
        }

        warn!("All gas endpoints failed for {}, using conservative estimate", network);
        fallback_estimate(&net_config, last_error.to_string())
    }

    /// Quote from a single endpoint; errors only if fee history is unusable
    async fn quote_from(
        &self,
        client: &JsonRpcClient,
        net_config: &NetworkGasConfig,
    ) -> GasResult<FeeEstimate> {
        let params = json!([
            format!("0x{:x}", self.config.block_count),
            "latest",
            self.config.reward_percentiles,
        ]);
        let history: FeeHistory = client.call(FEE_HISTORY, params).await?;
        let base_fee = history.latest_base_fee()?;
        let network = net_config.network;

        let column = self.config.priority_column().unwrap_or(1);
        if let Some(priority) = history.latest_reward(column) {
            debug!("{} priority fee from fee history p{}", network, self.config.priority_percentile);
            return Ok(FeeEstimate::Live(FeeQuote::new(network, base_fee, priority, now_ms())));
        }

        // Some nodes (notably on Polygon) omit rewards
        match self.suggested_priority_fee(client).await {
            Ok(priority) => {
                debug!("{} priority fee from {}", network, MAX_PRIORITY_FEE);
                Ok(FeeEstimate::Live(FeeQuote::new(network, base_fee, priority, now_ms())))
            }
            Err(e) => {
                info!(
                    "No priority fee from {} ({}), defaulting to {} gwei",
                    client.url(),
                    e,
                    net_config.default_priority_fee_gwei
                );
                Ok(FeeEstimate::Fallback {
                    quote: FeeQuote::new(
                        network,
                        base_fee,
                        gwei(net_config.default_priority_fee_gwei),
                        now_ms(),
                    ),
                    reason: FallbackReason::PriorityFeeDefaulted,
                })
            }
        }
    }

    async fn suggested_priority_fee(&self, client: &JsonRpcClient) -> GasResult<U256> {
        let raw: String = client.call(MAX_PRIORITY_FEE, json!([])).await?;
        parse_quantity(MAX_PRIORITY_FEE, &raw)
    }
}

#[async_trait]
impl FeeSource for GasFeeEstimator {
    async fn fee_estimate(&self, network: Network) -> FeeEstimate {
        self.get_fee_quote(network).await
    }
}

fn default_network_config(network: Network) -> NetworkGasConfig {
    match network {
        Network::Ethereum => NetworkGasConfig::ethereum(),
        Network::Polygon => NetworkGasConfig::polygon(),
    }
}

/// Hard-coded conservative quote used when no endpoint answers
pub fn fallback_estimate(net_config: &NetworkGasConfig, last_error: String) -> FeeEstimate {
    FeeEstimate::Fallback {
        quote: FeeQuote::from_gwei(
            net_config.network,
            net_config.fallback_base_fee_gwei,
            net_config.fallback_priority_fee_gwei,
            now_ms(),
        ),
        reason: FallbackReason::AllEndpointsFailed { last_error },
    }
}
