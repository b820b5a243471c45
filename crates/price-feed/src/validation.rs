//! Quote validation: sanity bands and cross-source spread

use serde::{Deserialize, Serialize};

use livefeed_core::{Asset, PriceFeedError, PriceFeedResult, PriceQuote, SanityBand};

/// Reject a quote whose price falls outside the asset's band.
/// Assets without a configured band only need a positive finite price.
pub fn check_sanity(quote: PriceQuote, band: Option<SanityBand>) -> PriceFeedResult<PriceQuote> {
    let accepted = match band {
        Some(band) => band.contains(quote.usd_price),
        None => quote.usd_price.is_finite() && quote.usd_price > 0.0,
    };

    if accepted {
        Ok(quote)
    } else {
        Err(PriceFeedError::InvalidQuote {
            band: band.unwrap_or(SanityBand::new(0.0, f64::MAX)),
            source_name: quote.source,
            asset: quote.asset,
            price: quote.usd_price,
        })
    }
}

/// Spread between the highest and lowest price, relative to the lowest, in bps
pub fn spread_bps(prices: &[f64]) -> Option<u32> {
    if prices.len() < 2 {
        return None;
    }

    let max = prices.iter().cloned().fold(f64::MIN, f64::max);
    let min = prices.iter().cloned().fold(f64::MAX, f64::min);

    if min <= 0.0 || !max.is_finite() {
        return None;
    }

    let spread = (max - min) / min;
    Some((spread * 10_000.0).round() as u32)
}

/// Sources disagreeing by more than the configured threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub asset: Asset,
    pub spread_bps: u32,
    pub threshold_bps: u32,
    /// (source, price) for every sanity-passing quote
    pub prices: Vec<(String, f64)>,
    pub observed_at_ms: u64,
}

impl Discrepancy {
    pub fn spread_pct(&self) -> f64 {
        self.spread_bps as f64 / 100.0
    }
}

/// Outcome of querying every source at once
#[derive(Debug, Clone)]
pub struct CrossValidation {
    /// First sanity-passing quote in priority order
    pub published: PriceQuote,
    /// Every sanity-passing quote in priority order
    pub accepted: Vec<PriceQuote>,
    pub rejected: Vec<PriceFeedError>,
    pub spread_bps: Option<u32>,
    pub discrepancy: Option<Discrepancy>,
}

/// Compare accepted quotes; `None` if there is nothing to publish
pub fn reconcile(
    asset: Asset,
    accepted: Vec<PriceQuote>,
    rejected: Vec<PriceFeedError>,
    threshold_bps: u32,
    now_ms: u64,
) -> Option<CrossValidation> {
    let published = accepted.first()?.clone();
    let prices: Vec<f64> = accepted.iter().map(|q| q.usd_price).collect();
    let spread = spread_bps(&prices);

    let discrepancy = spread.filter(|s| *s > threshold_bps).map(|spread_bps| Discrepancy {
        asset,
        spread_bps,
        threshold_bps,
        prices: accepted
            .iter()
            .map(|q| (q.source.clone(), q.usd_price))
            .collect(),
        observed_at_ms: now_ms,
    });

    Some(CrossValidation {
        published,
        accepted,
        rejected,
        spread_bps: spread,
        discrepancy,
    })
}
