//! `eth_feeHistory` response handling

use alloy_primitives::U256;
use serde::Deserialize;

use livefeed_core::{GasError, GasResult};

pub const FEE_HISTORY: &str = "eth_feeHistory";
pub const MAX_PRIORITY_FEE: &str = "eth_maxPriorityFeePerGas";

/// Raw fee history; quantities are hex strings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeHistory {
    #[serde(default)]
    pub oldest_block: Option<String>,
    pub base_fee_per_gas: Vec<String>,
    #[serde(default)]
    pub gas_used_ratio: Vec<f64>,
    /// One row per block, one column per requested percentile
    #[serde(default)]
    pub reward: Option<Vec<Vec<String>>>,
}

impl FeeHistory {
    /// Base fee of the newest entry (the node's projection for the next block)
    pub fn latest_base_fee(&self) -> GasResult<U256> {
        let raw = self.base_fee_per_gas.last().ok_or_else(|| GasError::MalformedResponse {
            method: FEE_HISTORY.to_string(),
            reason: "empty baseFeePerGas".to_string(),
        })?;
        parse_quantity(FEE_HISTORY, raw)
    }

    /// Reward at `column` of the most recent block. Missing, unparsable and
    /// zero rewards all read as `None` so the caller asks the node instead.
    pub fn latest_reward(&self, column: usize) -> Option<U256> {
        let rewards = self.reward.as_ref()?;
        let raw = rewards.last()?.get(column)?;
        parse_quantity(FEE_HISTORY, raw)
            .ok()
            .filter(|reward| !reward.is_zero())
    }
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_quantity(method: &str, raw: &str) -> GasResult<U256> {
    let malformed = |reason: String| GasError::MalformedResponse {
        method: method.to_string(),
        reason,
    };

    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| malformed(format!("quantity {raw:?} is not 0x-prefixed")))?;

    if digits.is_empty() {
        return Err(malformed("empty quantity".to_string()));
    }

    U256::from_str_radix(digits, 16).map_err(|e| malformed(format!("{raw:?}: {e}")))
}
