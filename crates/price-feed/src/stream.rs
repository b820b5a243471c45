//! Streaming ticker feed (Coinbase Advanced Trade WebSocket)

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use livefeed_core::{now_ms, Asset, PriceQuote, StreamConfig, StreamError, StreamResult};

pub const STREAM_SOURCE: &str = "Coinbase WS";

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Server closed the socket
    Closed,
    /// Nobody is listening any more
    ReceiverGone,
}

#[derive(Debug, Deserialize)]
struct TickerMessage {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    events: Vec<TickerEvent>,
}

#[derive(Debug, Deserialize)]
struct TickerEvent {
    #[serde(default)]
    tickers: Vec<Ticker>,
}

#[derive(Debug, Deserialize)]
struct Ticker {
    product_id: Option<String>,
    price: Option<String>,
    #[serde(default)]
    price_percent_chg_24_h: Option<String>,
    #[serde(default)]
    high_24_h: Option<String>,
    #[serde(default)]
    low_24_h: Option<String>,
}

fn parse_num(value: Option<&String>) -> Option<f64> {
    value
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Extract quotes for tracked assets from one ticker frame.
/// Non-ticker frames yield an empty list; server error frames yield an error.
pub fn parse_ticker_message(text: &str, tracked: &[Asset]) -> StreamResult<Vec<PriceQuote>> {
    let msg: TickerMessage =
        serde_json::from_str(text).map_err(|e| StreamError::InvalidMessage(e.to_string()))?;

    if msg.kind.as_deref() == Some("error") {
        return Err(StreamError::SubscriptionFailed(
            msg.message.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }

    if msg.channel.as_deref() != Some("ticker") {
        return Ok(vec![]);
    }

    let observed_at_ms = msg
        .timestamp
        .map(|ts| ts.timestamp_millis().max(0) as u64)
        .unwrap_or_else(now_ms);

    let quotes = msg
        .events
        .iter()
        .flat_map(|event| event.tickers.iter())
        .filter_map(|ticker| {
            let asset = Asset::from_product_id(ticker.product_id.as_deref()?)?;
            if !tracked.contains(&asset) {
                return None;
            }
            let price = parse_num(ticker.price.as_ref())?;

            Some(
                PriceQuote::new(asset, price, STREAM_SOURCE, observed_at_ms)
                    .with_change_24h(parse_num(ticker.price_percent_chg_24_h.as_ref()))
                    .with_range_24h(
                        parse_num(ticker.high_24_h.as_ref()),
                        parse_num(ticker.low_24_h.as_ref()),
                    ),
            )
        })
        .collect();

    Ok(quotes)
}

/// Reconnecting ticker stream for a set of assets
pub struct TickerStream {
    config: StreamConfig,
    assets: Vec<Asset>,
    connected: watch::Sender<bool>,
}

impl TickerStream {
    pub fn new(config: StreamConfig, assets: Vec<Asset>) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            config,
            assets,
            connected,
        }
    }

    /// Observe whether the socket is currently up
    pub fn connection(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Stream quotes into `updates_tx` until the receiver is dropped or the
    /// consecutive reconnect ceiling is reached.
    pub async fn run(&mut self, updates_tx: mpsc::Sender<PriceQuote>) -> StreamResult<()> {
        let mut reconnect_count = 0;

        loop {
            let (delay, delivered) = match self.connect_and_listen(&updates_tx).await {
                Ok((SessionEnd::ReceiverGone, _)) => {
                    debug!("Ticker stream receiver dropped");
                    self.connected.send_replace(false);
                    return Ok(());
                }
                Ok((SessionEnd::Closed, delivered)) => {
                    info!("Ticker stream closed by server");
                    (self.config.reconnect_delay_ms, delivered)
                }
                Err((e, delivered)) => {
                    error!("Ticker stream error: {}", e);
                    (self.config.error_reconnect_delay_ms, delivered)
                }
            };
            self.connected.send_replace(false);

            if delivered {
                reconnect_count = 0;
            }
            reconnect_count += 1;

            if reconnect_count > self.config.max_reconnects {
                error!("Max reconnects reached for ticker stream");
                return Err(StreamError::ReconnectLimit(self.config.max_reconnects));
            }

            let wait = Duration::from_millis(delay + jitter(self.config.reconnect_jitter_ms));
            warn!(
                "Reconnecting ticker stream in {:?} (attempt {}/{})",
                wait, reconnect_count, self.config.max_reconnects
            );

            tokio::time::sleep(wait).await;
        }
    }

    /// One socket session. The bool reports whether any quote was delivered.
    async fn connect_and_listen(
        &mut self,
        updates_tx: &mpsc::Sender<PriceQuote>,
    ) -> Result<(SessionEnd, bool), (anyhow::Error, bool)> {
        let mut delivered = false;

        info!("Connecting to ticker stream at {}", self.config.url);
        let (ws_stream, _) = connect_async(self.config.url.as_str())
            .await
            .map_err(|e| (anyhow::Error::from(StreamError::ConnectionFailed(e.to_string())), false))?;
        let (mut write, mut read) = ws_stream.split();

        let product_ids: Vec<&str> = self.assets.iter().map(|a| a.product_id()).collect();
        let subscribe_msg = serde_json::json!({
            "type": "subscribe",
            "channel": "ticker",
            "product_ids": product_ids,
        });

        write
            .send(Message::Text(subscribe_msg.to_string()))
            .await
            .map_err(|e| (anyhow::Error::from(StreamError::SubscriptionFailed(e.to_string())), false))?;

        self.connected.send_replace(true);
        info!("Subscribed to ticker for {:?}", product_ids);

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let quotes = match parse_ticker_message(&text, &self.assets) {
                        Ok(quotes) => quotes,
                        Err(e @ StreamError::SubscriptionFailed(_)) => {
                            return Err((e.into(), delivered));
                        }
                        Err(e) => {
                            debug!("Skipping ticker frame: {}", e);
                            continue;
                        }
                    };

                    for quote in quotes {
                        if updates_tx.send(quote).await.is_err() {
                            return Ok((SessionEnd::ReceiverGone, delivered));
                        }
                        delivered = true;
                    }
                }
                Ok(Message::Ping(data)) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        return Err((e.into(), delivered));
                    }
                }
                Ok(Message::Close(_)) => {
                    return Ok((SessionEnd::Closed, delivered));
                }
                Err(e) => {
                    return Err((e.into(), delivered));
                }
                _ => {}
            }
        }

        Ok((SessionEnd::Closed, delivered))
    }
}

fn jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=max_ms)
}
