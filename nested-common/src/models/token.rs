use alloy_primitives::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::OrderError;

/// A quantity handed to an order mutator.
///
/// `Raw` amounts are expressed in the token's smallest unit and are used as is. `Units` amounts
/// are human readable (e.g. `1.5` USDC) and need the token decimals to be converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAmount {
    Raw(U256),
    Units(Decimal),
}

impl TokenAmount {
    pub fn is_zero(&self) -> bool {
        match self {
            TokenAmount::Raw(v) => v.is_zero(),
            TokenAmount::Units(v) => v.is_zero(),
        }
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        TokenAmount::Raw(value)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount::Raw(U256::from(value))
    }
}

impl From<Decimal> for TokenAmount {
    fn from(value: Decimal) -> Self {
        TokenAmount::Units(value)
    }
}

/// Converts a human readable amount into the token's smallest unit.
///
/// Fails if the amount is negative or carries more fractional digits than the token supports.
pub fn parse_units(value: Decimal, decimals: u8) -> Result<U256, OrderError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(OrderError::InvalidOperation(format!("Negative token amount: {value}")));
    }
    let value = value.normalize();
    let scale = value.scale();
    if scale > u32::from(decimals) {
        return Err(OrderError::InvalidOperation(format!(
            "Amount {value} has more than {decimals} decimals"
        )));
    }
    let mantissa = U256::from(value.mantissa().unsigned_abs());
    let factor = U256::from(10u64).pow(U256::from(u32::from(decimals) - scale));
    Ok(mantissa.saturating_mul(factor))
}

/// Read-only snapshot of a token held by a portfolio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub token: Address,
    pub amount: U256,
}

impl Holding {
    pub fn new(token: Address, amount: U256) -> Self {
        Self { token, amount }
    }
}
