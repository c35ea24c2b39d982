pub mod order;
pub mod quote;
pub mod token;

use alloy_primitives::{address, Address};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

pub use order::{
    ActionType, BatchedInputOrders, BatchedOutputOrders, EncodedOrder, Operator, OrderArg,
    OrderFees,
};
pub use quote::{AggregatorId, AggregatorQuote, FixedSide, QuoteRequest, RequestedAmount};
pub use token::{parse_units, Holding, TokenAmount};

/// Placeholder address used by aggregators and by the Nested contracts for the native gas token.
pub const NATIVE_TOKEN: Address = address!("eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee");

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Chain {
    #[default]
    Eth,
    Bsc,
    Avax,
    Poly,
    Opti,
    Arbi,
    Ftm,
    Celo,
}

impl Chain {
    pub fn id(&self) -> u64 {
        match self {
            Chain::Eth => 1,
            Chain::Bsc => 56,
            Chain::Avax => 43114,
            Chain::Poly => 137,
            Chain::Opti => 10,
            Chain::Arbi => 42161,
            Chain::Ftm => 250,
            Chain::Celo => 42220,
        }
    }

    pub fn from_id(id: u64) -> Option<Self> {
        [
            Chain::Eth,
            Chain::Bsc,
            Chain::Avax,
            Chain::Poly,
            Chain::Opti,
            Chain::Arbi,
            Chain::Ftm,
            Chain::Celo,
        ]
        .into_iter()
        .find(|c| c.id() == id)
    }

    /// The ERC20 wrapper of this chain's gas token.
    pub fn wrapped_native_token(&self) -> Address {
        match self {
            Chain::Eth => address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"),
            Chain::Bsc => address!("bb4cdb9cbd36b01bd1cbaebf2de08d9173bc095c"),
            Chain::Avax => address!("b31f66aa3c1e785363f0875a1b74e27b85fd66c7"),
            Chain::Poly => address!("0d500b1d8e8ef31e21c99d1db9a6444d3adf1270"),
            Chain::Opti => address!("4200000000000000000000000000000000000006"),
            Chain::Arbi => address!("82af49447d8a07e3bd95bd0d56f35241523fbab1"),
            Chain::Ftm => address!("21be370d5312f44cb42ce377bc9b8a0cef1a4c83"),
            Chain::Celo => address!("471ece3750da237f93b8e339c536989b8978a438"),
        }
    }

    /// Replaces the native token alias by the wrapped token, leaves any other token untouched.
    pub fn wrap(&self, token: &Address) -> Address {
        if *token == NATIVE_TOKEN {
            self.wrapped_native_token()
        } else {
            *token
        }
    }

    /// Inverse of [`Chain::wrap`].
    pub fn unwrap(&self, token: &Address) -> Address {
        if *token == self.wrapped_native_token() {
            NATIVE_TOKEN
        } else {
            *token
        }
    }

    /// Whether two tokens designate the same asset once the native alias is wrapped.
    pub fn same_token(&self, a: &Address, b: &Address) -> bool {
        self.wrap(a) == self.wrap(b)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_wrap_native_token() {
        let chain = Chain::Poly;

        assert_eq!(chain.wrap(&NATIVE_TOKEN), chain.wrapped_native_token());
        assert_eq!(chain.unwrap(&chain.wrapped_native_token()), NATIVE_TOKEN);
        assert!(chain.same_token(&NATIVE_TOKEN, &chain.wrapped_native_token()));

        let usdc = address!("2791bca1f2de4661ed88a30c99a7a9449aa84174");
        assert_eq!(chain.wrap(&usdc), usdc);
        assert_eq!(chain.unwrap(&usdc), usdc);
    }

    #[test]
    fn test_chain_names_and_ids() {
        assert_eq!(Chain::from_str("poly").unwrap(), Chain::Poly);
        assert_eq!(Chain::Arbi.to_string(), "arbi");
        assert_eq!(Chain::from_id(43114), Some(Chain::Avax));
        assert_eq!(Chain::from_id(5), None);
        assert_eq!(serde_json::to_string(&Chain::Bsc).unwrap(), "\"bsc\"");
    }
}
