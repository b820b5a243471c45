//! Aggregated live market data
//!
//! Runs one price feed per tracked asset and one gas feed per tracked
//! network, tracks each through `Uninitialized -> Loading -> Live -> Stale
//! -> Reconnecting` and hands out cloned snapshots.

pub mod aggregator;
pub mod state;

pub use aggregator::{AggregatorStats, LiveDataAggregator, LiveEvent};
pub use state::{
    ConnectionHealth, FeedId, FeeView, LiveSnapshot, LiveState, LiveStateStats, PriceView,
    StatusChange,
};
