//! REST price sources

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use livefeed_core::{now_ms, Asset, PriceFeedError, PriceFeedResult, PriceQuote, PriceSourceConfig};

/// A single source of USD prices
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the current quote for `asset`. No sanity checking happens here.
    async fn fetch(&self, asset: Asset) -> PriceFeedResult<PriceQuote>;
}

/// Build the configured sources in priority order, sharing one HTTP client
pub fn build_sources(
    configs: &[PriceSourceConfig],
    request_timeout: Duration,
) -> anyhow::Result<Vec<Arc<dyn PriceSource>>> {
    let client = Client::builder()
        .timeout(request_timeout)
        .user_agent(concat!("livefeed/", env!("CARGO_PKG_VERSION")))
        .build()?;

    Ok(configs
        .iter()
        .map(|config| -> Arc<dyn PriceSource> {
            match config {
                PriceSourceConfig::CoinGecko { base_url } => {
                    Arc::new(CoinGeckoSource::new(client.clone(), base_url))
                }
                PriceSourceConfig::CoinbaseRates { base_url } => {
                    Arc::new(CoinbaseRatesSource::new(client.clone(), base_url))
                }
                PriceSourceConfig::Fixed { asset, usd_price } => {
                    Arc::new(FixedPriceSource::new(*asset, *usd_price))
                }
            }
        })
        .collect())
}

/// CoinGecko `/simple/price`, includes 24h change and range
pub struct CoinGeckoSource {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SimplePriceData {
    usd: Option<f64>,
    #[serde(default)]
    usd_24h_change: Option<f64>,
    #[serde(default)]
    usd_24h_high: Option<f64>,
    #[serde(default)]
    usd_24h_low: Option<f64>,
}

impl CoinGeckoSource {
    pub const NAME: &'static str = "CoinGecko";

    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn parse(asset: Asset, body: &str, observed_at_ms: u64) -> PriceFeedResult<PriceQuote> {
        let mut prices: HashMap<String, SimplePriceData> =
            serde_json::from_str(body).map_err(|e| PriceFeedError::unavailable(Self::NAME, e))?;

        let data = prices
            .remove(asset.coingecko_id())
            .ok_or_else(|| PriceFeedError::unavailable(Self::NAME, "asset missing from response"))?;

        let usd = data
            .usd
            .filter(|p| *p > 0.0)
            .ok_or_else(|| PriceFeedError::unavailable(Self::NAME, "invalid price data"))?;

        Ok(PriceQuote::new(asset, usd, Self::NAME, observed_at_ms)
            .with_change_24h(data.usd_24h_change)
            .with_range_24h(data.usd_24h_high, data.usd_24h_low))
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch(&self, asset: Asset) -> PriceFeedResult<PriceQuote> {
        let url = format!("{}/api/v3/simple/price", self.base_url);
        debug!("Fetching {} from {}", asset, Self::NAME);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .query(&[
                ("ids", asset.coingecko_id()),
                ("vs_currencies", "usd"),
                ("include_24hr_change", "true"),
                ("include_24hr_vol", "true"),
                ("include_high_low_24h", "true"),
            ])
            .send()
            .await
            .map_err(|e| PriceFeedError::unavailable(Self::NAME, e))?;

        if !response.status().is_success() {
            return Err(PriceFeedError::unavailable(
                Self::NAME,
                format!("API error: {}", response.status()),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PriceFeedError::unavailable(Self::NAME, e))?;

        Self::parse(asset, &body, now_ms())
    }
}

/// Coinbase `/v2/exchange-rates`, price only
pub struct CoinbaseRatesSource {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeRatesResponse {
    data: ExchangeRatesData,
}

#[derive(Debug, Deserialize)]
struct ExchangeRatesData {
    rates: HashMap<String, String>,
}

impl CoinbaseRatesSource {
    pub const NAME: &'static str = "Coinbase";

    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn parse(asset: Asset, body: &str, observed_at_ms: u64) -> PriceFeedResult<PriceQuote> {
        let response: ExchangeRatesResponse =
            serde_json::from_str(body).map_err(|e| PriceFeedError::unavailable(Self::NAME, e))?;

        let usd = response
            .data
            .rates
            .get("USD")
            .and_then(|rate| rate.parse::<f64>().ok())
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .ok_or_else(|| PriceFeedError::unavailable(Self::NAME, "invalid fallback price data"))?;

        Ok(PriceQuote::new(asset, usd, Self::NAME, observed_at_ms))
    }
}

#[async_trait]
impl PriceSource for CoinbaseRatesSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch(&self, asset: Asset) -> PriceFeedResult<PriceQuote> {
        let url = format!("{}/v2/exchange-rates", self.base_url);
        debug!("Fetching {} from {}", asset, Self::NAME);

        let response = self
            .client
            .get(&url)
            .query(&[("currency", asset.symbol())])
            .send()
            .await
            .map_err(|e| PriceFeedError::unavailable(Self::NAME, e))?;

        if !response.status().is_success() {
            return Err(PriceFeedError::unavailable(
                Self::NAME,
                format!("API error: {}", response.status()),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PriceFeedError::unavailable(Self::NAME, e))?;

        Self::parse(asset, &body, now_ms())
    }
}

/// Pinned price for one asset, e.g. a stablecoin
pub struct FixedPriceSource {
    asset: Asset,
    usd_price: f64,
}

impl FixedPriceSource {
    pub const NAME: &'static str = "Fixed";

    pub fn new(asset: Asset, usd_price: f64) -> Self {
        Self { asset, usd_price }
    }
}

#[async_trait]
impl PriceSource for FixedPriceSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch(&self, asset: Asset) -> PriceFeedResult<PriceQuote> {
        if asset != self.asset {
            return Err(PriceFeedError::UnsupportedAsset {
                source_name: Self::NAME.to_string(),
                asset,
            });
        }
        // A pinned price says nothing about market movement
        Ok(PriceQuote::new(asset, self.usd_price, Self::NAME, now_ms()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client() -> Client {
        Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap()
    }

    #[test]
    fn test_parse_coingecko() {
        let body = r#"{"ethereum":{"usd":3012.5,"usd_24h_change":-2.4,"usd_24h_vol":1.2e10}}"#;
        let quote = CoinGeckoSource::parse(Asset::Eth, body, 42).unwrap();

        assert_eq!(quote.usd_price, 3012.5);
        assert_eq!(quote.change_24h, Some(-2.4));
        assert_eq!(quote.high_24h, None);
        assert_eq!(quote.source, "CoinGecko");
        assert_eq!(quote.observed_at_ms, 42);
    }

    #[test]
    fn test_parse_coingecko_rejects_missing_or_zero() {
        assert!(CoinGeckoSource::parse(Asset::Eth, r#"{"bitcoin":{"usd":1.0}}"#, 0).is_err());
        assert!(CoinGeckoSource::parse(Asset::Eth, r#"{"ethereum":{"usd":0}}"#, 0).is_err());
        assert!(CoinGeckoSource::parse(Asset::Eth, "not json", 0).is_err());
    }

    #[test]
    fn test_parse_coinbase_rates() {
        let body = r#"{"data":{"currency":"ETH","rates":{"USD":"2999.87","EUR":"2760.10"}}}"#;
        let quote = CoinbaseRatesSource::parse(Asset::Eth, body, 7).unwrap();
        assert_eq!(quote.usd_price, 2999.87);
        assert_eq!(quote.change_24h, None);

        let bad = r#"{"data":{"currency":"ETH","rates":{"USD":"abc"}}}"#;
        assert!(CoinbaseRatesSource::parse(Asset::Eth, bad, 7).is_err());
    }

    #[tokio::test]
    async fn test_coingecko_http() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/simple/price")
            .match_query(Matcher::UrlEncoded("ids".into(), "matic-network".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"matic-network":{"usd":0.52,"usd_24h_change":6.1}}"#)
            .create_async()
            .await;

        let source = CoinGeckoSource::new(client(), &server.url());
        let quote = source.fetch(Asset::Matic).await.unwrap();

        mock.assert_async().await;
        assert_eq!(quote.asset, Asset::Matic);
        assert_eq!(quote.usd_price, 0.52);
    }

    #[tokio::test]
    async fn test_coinbase_http_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/exchange-rates")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let source = CoinbaseRatesSource::new(client(), &server.url());
        let err = source.fetch(Asset::Eth).await.unwrap_err();
        assert!(matches!(err, PriceFeedError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_fixed_source() {
        let source = FixedPriceSource::new(Asset::Usdc, 1.0);
        let quote = tokio_test::assert_ok!(source.fetch(Asset::Usdc).await);
        assert_eq!(quote.usd_price, 1.0);
        assert_eq!(quote.change_24h, None);
        assert_eq!(
            livefeed_core::VolatilityLevel::from_change_24h(quote.change_24h),
            livefeed_core::VolatilityLevel::Unknown
        );
        tokio_test::assert_err!(source.fetch(Asset::Eth).await);
    }

    #[test]
    fn test_build_sources_keeps_order() {
        let sources = build_sources(
            &[
                PriceSourceConfig::CoinbaseRates { base_url: "http://a".into() },
                PriceSourceConfig::CoinGecko { base_url: "http://b/".into() },
            ],
            Duration::from_secs(1),
        )
        .unwrap();

        let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["Coinbase", "CoinGecko"]);
    }
}
