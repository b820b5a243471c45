//! Multi-source USD price feed
//!
//! Features:
//! - REST sources tried in fixed priority order with per-attempt timeouts
//! - Sanity-band validation of every quote
//! - Concurrent cross-validation with discrepancy detection
//! - Streaming ticker subscription with jittered, bounded reconnects
//! - Poll fallback while the stream is down

pub mod feed;
pub mod sources;
pub mod stream;
pub mod validation;

pub use feed::{PriceFeed, PriceSubscription, PriceUpdate};
pub use sources::{CoinGeckoSource, CoinbaseRatesSource, FixedPriceSource, PriceSource};
pub use stream::TickerStream;
pub use validation::{CrossValidation, Discrepancy};
