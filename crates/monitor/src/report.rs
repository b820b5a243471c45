//! One-line renderings of feed state for the log

use livefeed_core::{format_gwei, FeeEstimate, VolatilityLevel};
use livefeed_live_data::{FeeView, LiveEvent, PriceView};

pub fn price_line(view: &PriceView) -> String {
    let mut line = match &view.quote {
        Some(quote) => format!(
            "{} ${:.2} via {} [{}]",
            view.asset, quote.usd_price, quote.source, view.status
        ),
        None => format!("{} no price [{}]", view.asset, view.status),
    };

    if let Some(change) = view.quote.as_ref().and_then(|q| q.change_24h) {
        let level = VolatilityLevel::from_change_24h(Some(change));
        line.push_str(&format!(" 24h {:+.2}% ({:?})", change, level));
    }
    if view.is_stale {
        line.push_str(" STALE");
    }
    if let Some(error) = &view.error {
        line.push_str(&format!(" error: {}", error));
    }
    line
}

pub fn fee_line(view: &FeeView) -> String {
    let Some(estimate) = &view.estimate else {
        return format!("{} no fee quote [{}]", view.network, view.status);
    };

    let quote = estimate.quote();
    let gwei = |wei| format_gwei(wei).map_or_else(|| "?".to_string(), |g| g.to_string());
    let mut line = format!(
        "{} base {} / priority {} / max {} gwei [{}]",
        view.network,
        gwei(quote.base_fee_per_gas()),
        gwei(quote.priority_fee_per_gas()),
        gwei(quote.max_fee_per_gas()),
        view.status
    );

    if let FeeEstimate::Fallback { reason, .. } = estimate {
        line.push_str(&format!(" fallback: {:?}", reason));
    }
    if view.is_stale {
        line.push_str(" STALE");
    }
    line
}

/// Events worth an info line; price and fee ticks are left to the report
pub fn event_line(event: &LiveEvent) -> Option<String> {
    match event {
        LiveEvent::StatusChanged(change) => Some(format!(
            "{}: {} -> {}",
            change.feed, change.from, change.to
        )),
        LiveEvent::Discrepancy(d) => Some(format!(
            "{} sources disagree by {:.2}%: {:?}",
            d.asset,
            d.spread_pct(),
            d.prices
        )),
        LiveEvent::PriceUpdated(_) | LiveEvent::FeeUpdated { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livefeed_core::{Asset, FallbackReason, FeeQuote, FeedStatus, Network, PriceQuote};
    use livefeed_live_data::{FeedId, StatusChange};

    fn price_view(quote: Option<PriceQuote>) -> PriceView {
        PriceView {
            asset: Asset::Eth,
            status: FeedStatus::Live,
            quote,
            error: None,
            is_stale: false,
            age: None,
            stream_connected: false,
            by_source: vec![],
        }
    }

    #[test]
    fn test_price_line() {
        let quote = PriceQuote::new(Asset::Eth, 3012.456, "CoinGecko", 0).with_change_24h(Some(-2.5));
        assert_eq!(
            price_line(&price_view(Some(quote))),
            "ETH $3012.46 via CoinGecko [live] 24h -2.50% (Moderate)"
        );

        let mut stale = price_view(None);
        stale.status = FeedStatus::Stale;
        stale.is_stale = true;
        stale.error = Some("timeout".to_string());
        assert_eq!(price_line(&stale), "ETH no price [stale] STALE error: timeout");
    }

    #[test]
    fn test_fee_line() {
        let view = FeeView {
            network: Network::Polygon,
            status: FeedStatus::Live,
            estimate: Some(FeeEstimate::Fallback {
                quote: FeeQuote::from_gwei(Network::Polygon, 30, 30, 0),
                reason: FallbackReason::PriorityFeeDefaulted,
            }),
            error: None,
            is_stale: false,
            age: None,
        };

        assert_eq!(
            fee_line(&view),
            "polygon base 30 / priority 30 / max 66 gwei [live] fallback: PriorityFeeDefaulted"
        );
    }

    #[test]
    fn test_event_line() {
        let change = StatusChange {
            feed: FeedId::Gas(Network::Ethereum),
            from: FeedStatus::Live,
            to: FeedStatus::Stale,
        };
        assert_eq!(
            event_line(&LiveEvent::StatusChanged(change)).as_deref(),
            Some("gas:ethereum: live -> stale")
        );

        let tick = LiveEvent::PriceUpdated(PriceQuote::new(Asset::Eth, 3000.0, "Fixed", 0));
        assert!(event_line(&tick).is_none());
    }
}
