//! EIP-1559 gas fee oracle
//!
//! Reads `eth_feeHistory` from an ordered list of JSON-RPC endpoints per
//! network and always produces a quote, tagging it when it is not live.

pub mod estimator;
pub mod history;
pub mod rpc;

pub use estimator::{fallback_estimate, FeeSource, GasFeeEstimator};
pub use history::FeeHistory;
pub use rpc::JsonRpcClient;
