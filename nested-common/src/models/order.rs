use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use super::{AggregatorId, FixedSide};

/// Direction of a batch relative to the portfolio: funds come in (`Entry`) or go out (`Exit`).
/// The protocol may charge a different fee rate for each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ActionType {
    Entry,
    Exit,
}

/// Protocol fees applied to a leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFees {
    /// Side of the leg bearing the fees.
    pub on: FixedSide,
    pub on_token: Address,
    pub amount: U256,
}

impl OrderFees {
    pub fn zero(on: FixedSide, on_token: Address) -> Self {
        Self { on, on_token, amount: U256::ZERO }
    }
}

/// The on-chain operator executing a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum Operator {
    /// No swap: the input token is moved as is, only fees are taken.
    Flat,
    ZeroEx,
    Paraswap,
}

impl Operator {
    /// Operator name as registered on-chain, right padded to 32 bytes.
    pub fn as_bytes32(&self) -> B256 {
        let name = self.to_string();
        let mut word = [0u8; 32];
        word[..name.len()].copy_from_slice(name.as_bytes());
        B256::from(word)
    }
}

impl From<AggregatorId> for Operator {
    fn from(value: AggregatorId) -> Self {
        match value {
            AggregatorId::ZeroEx => Operator::ZeroEx,
            AggregatorId::Paraswap => Operator::Paraswap,
        }
    }
}

/// A typed argument of an operator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderArg {
    Address(Address),
    Uint(U256),
    Bytes(Bytes),
}

/// An order fragment as expected by the Nested factory contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedOrder {
    pub operator: B256,
    /// The token this order outputs, used contract-side for fee computation.
    pub token: Address,
    pub call_data: Bytes,
    pub commit: bool,
}

/// Settled orders of a batch spending the same input token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchedInputOrders {
    pub input_token: Address,
    /// Total spent, fees included.
    pub amount: U256,
    pub orders: Vec<EncodedOrder>,
    /// Whether the input is taken from the portfolio instead of the caller's wallet.
    pub from_reserve: bool,
}

/// Settled orders of a batch receiving the same output token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchedOutputOrders {
    pub output_token: Address,
    /// Amount of input token sold by each order, index aligned with `orders`.
    pub amounts: Vec<U256>,
    pub orders: Vec<EncodedOrder>,
    pub to_reserve: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_bytes32() {
        let word = Operator::ZeroEx.as_bytes32();

        assert_eq!(&word[..6], b"ZeroEx");
        assert!(word[6..].iter().all(|b| *b == 0));
        assert_eq!(Operator::from(AggregatorId::Paraswap), Operator::Paraswap);
        assert_eq!(&Operator::Flat.as_bytes32()[..4], b"Flat");
    }
}
