//! Price and fee quote types

use alloy_primitives::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Asset, Network};

/// Wei per gwei
pub const GWEI: u64 = 1_000_000_000;

/// Headroom applied to the base fee when deriving the max fee, in percent
pub const BASE_FEE_HEADROOM_PCT: u64 = 120;

/// USD price observation for one asset from one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub asset: Asset,
    pub usd_price: f64,
    /// 24h change in percent
    pub change_24h: Option<f64>,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub source: String,
    pub observed_at_ms: u64,
}

impl PriceQuote {
    pub fn new(asset: Asset, usd_price: f64, source: impl Into<String>, observed_at_ms: u64) -> Self {
        Self {
            asset,
            usd_price,
            change_24h: None,
            high_24h: None,
            low_24h: None,
            source: source.into(),
            observed_at_ms,
        }
    }

    pub fn with_change_24h(mut self, change_pct: Option<f64>) -> Self {
        self.change_24h = change_pct;
        self
    }

    pub fn with_range_24h(mut self, high: Option<f64>, low: Option<f64>) -> Self {
        self.high_24h = high;
        self.low_24h = low;
        self
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.observed_at_ms)
    }

    pub fn is_stale(&self, max_age_ms: u64, now_ms: u64) -> bool {
        self.age_ms(now_ms) > max_age_ms
    }
}

/// Inclusive USD bounds a quote must fall within to be accepted
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SanityBand {
    pub min_usd: f64,
    pub max_usd: f64,
}

impl SanityBand {
    pub fn new(min_usd: f64, max_usd: f64) -> Self {
        Self { min_usd, max_usd }
    }

    pub fn contains(&self, usd_price: f64) -> bool {
        usd_price.is_finite() && usd_price >= self.min_usd && usd_price <= self.max_usd
    }
}

/// EIP-1559 fee parameters for a network, in wei.
/// Fields are private so `max_fee_per_gas` can only come from `new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FeeQuoteParts")]
pub struct FeeQuote {
    network: Network,
    base_fee_per_gas: U256,
    priority_fee_per_gas: U256,
    max_fee_per_gas: U256,
    observed_at_ms: u64,
}

/// Wire form; any incoming max fee is ignored and recomputed
#[derive(Deserialize)]
struct FeeQuoteParts {
    network: Network,
    base_fee_per_gas: U256,
    priority_fee_per_gas: U256,
    observed_at_ms: u64,
}

impl From<FeeQuoteParts> for FeeQuote {
    fn from(parts: FeeQuoteParts) -> Self {
        FeeQuote::new(
            parts.network,
            parts.base_fee_per_gas,
            parts.priority_fee_per_gas,
            parts.observed_at_ms,
        )
    }
}

impl FeeQuote {
    /// Build a quote, deriving `max = base * 1.20 + priority`
    pub fn new(network: Network, base_fee: U256, priority_fee: U256, observed_at_ms: u64) -> Self {
        Self {
            network,
            base_fee_per_gas: base_fee,
            priority_fee_per_gas: priority_fee,
            max_fee_per_gas: max_fee_per_gas(base_fee, priority_fee),
            observed_at_ms,
        }
    }

    /// Build from whole-gwei values
    pub fn from_gwei(network: Network, base_gwei: u64, priority_gwei: u64, observed_at_ms: u64) -> Self {
        Self::new(network, gwei(base_gwei), gwei(priority_gwei), observed_at_ms)
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn base_fee_per_gas(&self) -> U256 {
        self.base_fee_per_gas
    }

    pub fn priority_fee_per_gas(&self) -> U256 {
        self.priority_fee_per_gas
    }

    pub fn max_fee_per_gas(&self) -> U256 {
        self.max_fee_per_gas
    }

    pub fn observed_at_ms(&self) -> u64 {
        self.observed_at_ms
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.observed_at_ms)
    }

    pub fn is_stale(&self, max_age_ms: u64, now_ms: u64) -> bool {
        self.age_ms(now_ms) > max_age_ms
    }

    /// Worst-case cost of `gas_units` at the max fee
    pub fn tx_cost(&self, gas_units: u64, native_usd: Option<f64>) -> TxCost {
        TxCost::new(U256::from(gas_units).saturating_mul(self.max_fee_per_gas), native_usd)
    }
}

/// `base * 120 / 100 + priority`, saturating at `U256::MAX`
pub fn max_fee_per_gas(base_fee: U256, priority_fee: U256) -> U256 {
    (base_fee.saturating_mul(U256::from(BASE_FEE_HEADROOM_PCT))
        / U256::from(100u64))
        .saturating_add(priority_fee)
}

pub fn gwei(amount: u64) -> U256 {
    U256::from(amount) * U256::from(GWEI)
}

/// Wei amount expressed in gwei, if it fits a decimal
pub fn format_gwei(wei: U256) -> Option<Decimal> {
    wei_to_decimal(wei, 9)
}

/// Wei amount expressed in whole native units (18 decimals)
pub fn format_native(wei: U256) -> Option<Decimal> {
    wei_to_decimal(wei, 18)
}

fn wei_to_decimal(wei: U256, scale: u32) -> Option<Decimal> {
    let raw = i128::try_from(u128::try_from(wei).ok()?).ok()?;
    Decimal::try_from_i128_with_scale(raw, scale)
        .ok()
        .map(|d| d.normalize())
}

/// Why a fee estimate is not fully live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackReason {
    /// Base fee is live, priority fee is the network default
    PriorityFeeDefaulted,
    /// No endpoint answered; the whole quote is hard-coded
    AllEndpointsFailed { last_error: String },
}

/// Fee quote tagged with its provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "freshness", rename_all = "snake_case")]
pub enum FeeEstimate {
    Live(FeeQuote),
    Fallback { quote: FeeQuote, reason: FallbackReason },
}

impl FeeEstimate {
    pub fn quote(&self) -> &FeeQuote {
        match self {
            FeeEstimate::Live(quote) => quote,
            FeeEstimate::Fallback { quote, .. } => quote,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, FeeEstimate::Live(_))
    }

    pub fn fallback_reason(&self) -> Option<&FallbackReason> {
        match self {
            FeeEstimate::Live(_) => None,
            FeeEstimate::Fallback { reason, .. } => Some(reason),
        }
    }
}

/// Transaction cost in native units and USD
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxCost {
    pub total_wei: U256,
    pub native_amount: Option<Decimal>,
    pub usd: Option<Decimal>,
}

impl TxCost {
    pub fn new(total_wei: U256, native_usd: Option<f64>) -> Self {
        let native_amount = format_native(total_wei);
        let usd = match (native_amount, native_usd.and_then(|p| Decimal::try_from(p).ok())) {
            (Some(native), Some(price)) => native.checked_mul(price).map(|v| v.round_dp(6)),
            _ => None,
        };

        Self {
            total_wei,
            native_amount,
            usd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    #[test]
    fn test_max_fee_headroom() {
        let quote = FeeQuote::from_gwei(Network::Ethereum, 20, 2, 0);
        assert_eq!(quote.max_fee_per_gas(), gwei(26));

        // 7 wei * 1.2 = 8.4, floored
        let odd = FeeQuote::new(Network::Polygon, U256::from(7u64), U256::from(1u64), 0);
        assert_eq!(odd.max_fee_per_gas(), U256::from(9u64));
    }

    #[test]
    fn test_sanity_band() {
        let band = SanityBand::new(100.0, 100_000.0);
        assert!(band.contains(3000.0));
        assert!(band.contains(100.0));
        assert!(!band.contains(99.99));
        assert!(!band.contains(f64::NAN));
        assert!(!band.contains(f64::INFINITY));
    }

    #[test]
    fn test_quote_staleness() {
        let quote = PriceQuote::new(Asset::Eth, 3000.0, "CoinGecko", 1_000);
        assert!(!quote.is_stale(60_000, 61_000));
        assert!(quote.is_stale(60_000, 61_001));
        assert_eq!(quote.age_ms(500), 0);
    }

    #[test]
    fn test_format_gwei() {
        assert_eq!(format_gwei(gwei(30)), Some(Decimal::from(30)));
        assert_eq!(
            format_gwei(U256::from(1_500_000_000u64)),
            Some(Decimal::from_str("1.5").unwrap())
        );
        assert_eq!(format_gwei(U256::MAX), None);
    }

    #[test]
    fn test_tx_cost() {
        // 100k gas at 26 gwei = 0.0026 ETH
        let quote = FeeQuote::from_gwei(Network::Ethereum, 20, 2, 0);
        let cost = quote.tx_cost(100_000, Some(3000.0));

        assert_eq!(cost.total_wei, U256::from(2_600_000_000_000_000u64));
        assert_eq!(cost.native_amount, Some(Decimal::from_str("0.0026").unwrap()));
        assert_eq!(cost.usd, Some(Decimal::from_str("7.8").unwrap()));

        let no_price = quote.tx_cost(100_000, None);
        assert!(no_price.usd.is_none());
    }

    #[test]
    fn test_fee_estimate_accessors() {
        let quote = FeeQuote::from_gwei(Network::Polygon, 30, 30, 0);
        let live = FeeEstimate::Live(quote);
        let fallback = FeeEstimate::Fallback {
            quote,
            reason: FallbackReason::PriorityFeeDefaulted,
        };

        assert!(live.is_live());
        assert!(!fallback.is_live());
        assert_eq!(live.quote(), fallback.quote());
        assert_eq!(fallback.fallback_reason(), Some(&FallbackReason::PriorityFeeDefaulted));
    }

    #[test]
    fn test_fee_quote_deserialize_recomputes_max() {
        let raw = r#"{
            "network": "ethereum",
            "base_fee_per_gas": "0x4a817c800",
            "priority_fee_per_gas": "0x77359400",
            "max_fee_per_gas": "0x0",
            "observed_at_ms": 5
        }"#;
        let quote: FeeQuote = serde_json::from_str(raw).unwrap();
        assert_eq!(quote.max_fee_per_gas(), gwei(26));
        assert_eq!(quote.observed_at_ms(), 5);

        let without_max = r#"{"network":"polygon","base_fee_per_gas":"0x1","priority_fee_per_gas":"0x0","observed_at_ms":0}"#;
        let quote: FeeQuote = serde_json::from_str(without_max).unwrap();
        assert_eq!(quote.network(), Network::Polygon);
        assert_eq!(quote.max_fee_per_gas(), U256::from(1u64));

        let original = FeeQuote::from_gwei(Network::Ethereum, 20, 2, 9);
        let back: FeeQuote = serde_json::from_str(&serde_json::to_string(&original).unwrap()).unwrap();
        assert_eq!(back, original);
    }

    proptest! {
        #[test]
        fn prop_max_fee_is_exact(base in any::<u64>(), priority in any::<u64>()) {
            let quote = FeeQuote::new(Network::Ethereum, U256::from(base), U256::from(priority), 0);
            let expected = (base as u128) * 120 / 100 + priority as u128;
            prop_assert_eq!(quote.max_fee_per_gas(), U256::from(expected));
        }
    }
}
