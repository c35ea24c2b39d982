use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use super::Chain;

/// Which quantity of a leg was explicitly set by the caller. The other one is derived from the
/// latest settled quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FixedSide {
    #[default]
    Input,
    Output,
}

/// The quantity a quote is requested for. Carrying a single variant makes it impossible to ask a
/// source for both a spent and a bought amount at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestedAmount {
    /// Exact quantity of input token to spend.
    Spend(U256),
    /// Exact quantity of output token to receive.
    Bought(U256),
}

impl RequestedAmount {
    pub fn side(&self) -> FixedSide {
        match self {
            RequestedAmount::Spend(_) => FixedSide::Input,
            RequestedAmount::Bought(_) => FixedSide::Output,
        }
    }

    pub fn amount(&self) -> U256 {
        match self {
            RequestedAmount::Spend(v) | RequestedAmount::Bought(v) => *v,
        }
    }
}

/// An immutable quote request, built fresh for every refresh of a leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub chain: Chain,
    /// Token you'd like to spend.
    pub input_token: Address,
    /// Token you'd like to receive.
    pub output_token: Address,
    /// Accepted slippage (ex: `0.03` means 3% slippage accepted).
    pub slippage: f64,
    pub amount: RequestedAmount,
}

impl QuoteRequest {
    pub fn spend(
        chain: Chain,
        input_token: Address,
        output_token: Address,
        slippage: f64,
        spend_qty: U256,
    ) -> Self {
        Self {
            chain,
            input_token,
            output_token,
            slippage,
            amount: RequestedAmount::Spend(spend_qty),
        }
    }

    pub fn bought(
        chain: Chain,
        input_token: Address,
        output_token: Address,
        slippage: f64,
        bought_qty: U256,
    ) -> Self {
        Self {
            chain,
            input_token,
            output_token,
            slippage,
            amount: RequestedAmount::Bought(bought_qty),
        }
    }
}

/// Price sources the engine knows how to query, in default priority order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AggregatorId {
    ZeroEx,
    Paraswap,
}

/// A source answer, normalized so that quotes of competing sources can be compared directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorQuote {
    pub source_id: AggregatorId,
    pub price: f64,
    pub guaranteed_price: f64,
    /// Raw amount of output token, in the output token's smallest unit.
    pub buy_amount: U256,
    /// Raw amount of input token, in the input token's smallest unit.
    pub sell_amount: U256,
    pub estimated_price_impact: f64,
    /// Call data to forward to the source's router.
    pub encoded_call_fragment: Bytes,
    pub allowance_target: Address,
}
