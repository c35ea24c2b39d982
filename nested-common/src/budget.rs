//! Proportional budget allocation.
//!
//! Given the current holdings of a portfolio and a price for each of them, splits an aggregate
//! budget (positive for a deposit, negative for a withdrawal) across the holdings so that the
//! relative proportions of the portfolio are left unchanged.
//!
//! Notations (vectors are capitalized, `.` is the scalar product, `*` and `/` are term by term):
//!
//! - `Before` / `After` are the holdings before and after the operation,
//! - `Prices` are token prices in budget units, from a preliminary pricing pass:
//!   `Prices = PricingBudget / PricingTokens`,
//! - `budget = (After - Before) . Prices` and the ratios must hold:
//!   `After / (After . Prices) = Before / (Before . Prices)`.
//!
//! With `curValue = Before . Prices` this gives
//! `After = ((budget + curValue) / curValue) * Before`,
//! hence `Budgets = budget * Before * PricingBudget / (curValue * PricingTokens)`, which is
//! evaluated with the division last since every quantity is an integer.
use alloy_primitives::U256;
use num_bigint::{BigInt, Sign};
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::models::Holding;

/// Outcome of a preliminary pricing run: `p_budget` units of the reference (budget) token buy
/// `p_token` units of the holding's token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub p_budget: U256,
    pub p_token: U256,
}

impl Price {
    pub fn new(p_budget: U256, p_token: U256) -> Self {
        Self { p_budget, p_token }
    }

    /// Price of the reference token against itself.
    pub fn identity(amount: U256) -> Self {
        Self { p_budget: amount, p_token: amount }
    }
}

pub fn to_bigint(value: U256) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, &value.to_be_bytes::<32>())
}

/// Converts a non-negative integer back to `U256`, `None` if negative or too large.
pub fn to_u256(value: &BigInt) -> Option<U256> {
    if value.is_negative() {
        return None;
    }
    let (_, bytes) = value.to_bytes_be();
    if bytes.len() > 32 {
        return None;
    }
    Some(U256::from_be_slice(&bytes))
}

/// Value of `holdings` expressed in budget units. Each term is divided on its own so that the
/// truncation error stays bounded by one unit per holding.
fn current_value(holdings: &[Holding], prices: &[Price]) -> BigInt {
    holdings
        .iter()
        .zip(prices)
        .filter(|(_, p)| !p.p_token.is_zero())
        .map(|(h, p)| to_bigint(h.amount) * to_bigint(p.p_budget) / to_bigint(p.p_token))
        .fold(BigInt::zero(), |acc, v| acc + v)
}

/// Computes the signed budget of every holding, index aligned with `holdings`.
///
/// A non-positive entry on a deposit (or non-negative entry on a withdrawal) means the holding
/// should be skipped. Degenerate inputs (no holdings, zero valuation, missing prices) give zeros.
pub fn compute_budgets(holdings: &[Holding], prices: &[Price], budget: &BigInt) -> Vec<BigInt> {
    let cur_value = current_value(holdings, prices);
    trace!(%cur_value, %budget, n_holdings = holdings.len(), "ComputeBudgets");
    if cur_value.is_zero() {
        return vec![BigInt::zero(); holdings.len()];
    }

    holdings
        .iter()
        .enumerate()
        .map(|(i, h)| match prices.get(i) {
            Some(p) if !p.p_token.is_zero() => {
                budget * to_bigint(h.amount) * to_bigint(p.p_budget) /
                    (to_bigint(p.p_token) * &cur_value)
            }
            _ => BigInt::zero(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, Address};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    const TOKEN_A: Address = address!("6b175474e89094c44da98b954eedeac495271d0f");
    const TOKEN_B: Address = address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");

    fn holding(token: Address, amount: u64) -> Holding {
        Holding::new(token, U256::from(amount))
    }

    fn price(p_budget: u64, p_token: u64) -> Price {
        Price::new(U256::from(p_budget), U256::from(p_token))
    }

    #[test]
    fn test_equal_values_split_evenly() {
        let holdings = vec![holding(TOKEN_A, 1_000), holding(TOKEN_B, 1_000)];
        let prices = vec![price(100, 100), price(100, 100)];

        let budgets = compute_budgets(&holdings, &prices, &BigInt::from(500));

        assert_eq!(budgets, vec![BigInt::from(250), BigInt::from(250)]);
    }

    #[test]
    fn test_two_to_one_values() {
        // A is worth 2 budget units per token, B is worth 1
        let holdings = vec![holding(TOKEN_A, 1_000), holding(TOKEN_B, 1_000)];
        let prices = vec![price(200, 100), price(100, 100)];

        let budgets = compute_budgets(&holdings, &prices, &BigInt::from(3_000));

        assert_eq!(budgets, vec![BigInt::from(2_000), BigInt::from(1_000)]);
    }

    #[test]
    fn test_rounding_stays_below_budget() {
        let holdings = vec![
            holding(TOKEN_A, 333),
            holding(TOKEN_B, 333),
            holding(TOKEN_A, 334),
        ];
        let prices = vec![price(7, 3), price(7, 3), price(7, 3)];
        let budget = BigInt::from(1_000);

        let budgets = compute_budgets(&holdings, &prices, &budget);
        let total = budgets
            .iter()
            .fold(BigInt::zero(), |acc, b| acc + b);

        assert!(budgets.iter().all(|b| !b.is_negative()));
        assert!(total <= budget);
        assert!(&budget - &total <= BigInt::from(holdings.len()));
    }

    #[test]
    fn test_withdrawal_is_negated_deposit() {
        let holdings = vec![holding(TOKEN_A, 1_000), holding(TOKEN_B, 3_000)];
        let prices = vec![price(100, 100), price(100, 100)];

        let deposit = compute_budgets(&holdings, &prices, &BigInt::from(400));
        let withdrawal = compute_budgets(&holdings, &prices, &BigInt::from(-400));

        assert_eq!(deposit, vec![BigInt::from(100), BigInt::from(300)]);
        assert_eq!(withdrawal, vec![BigInt::from(-100), BigInt::from(-300)]);
    }

    #[rstest]
    #[case::no_holdings(vec![], vec![])]
    #[case::zero_value(
        vec![holding(TOKEN_A, 0), holding(TOKEN_B, 0)],
        vec![price(1, 1), price(1, 1)]
    )]
    #[case::zero_price(vec![holding(TOKEN_A, 10)], vec![price(0, 5)])]
    #[case::missing_price(vec![holding(TOKEN_A, 10)], vec![])]
    #[case::zero_token_price(vec![holding(TOKEN_A, 10)], vec![price(5, 0)])]
    fn test_degenerate_inputs_give_zeros(
        #[case] holdings: Vec<Holding>,
        #[case] prices: Vec<Price>,
    ) {
        let budgets = compute_budgets(&holdings, &prices, &BigInt::from(1_000));

        assert_eq!(budgets.len(), holdings.len());
        assert!(budgets.iter().all(Zero::is_zero));
    }

    #[test]
    fn test_large_amounts_do_not_overflow() {
        let e24 = U256::from(10u64).pow(U256::from(24));
        let holdings = vec![Holding::new(TOKEN_A, e24), Holding::new(TOKEN_B, e24)];
        let prices = vec![Price::identity(e24), Price::identity(e24)];

        let budgets = compute_budgets(&holdings, &prices, &to_bigint(e24));

        let half: BigInt = to_bigint(e24) / 2;
        assert_eq!(budgets, vec![half.clone(), half]);
    }

    #[test]
    fn test_bigint_conversions() {
        let value = U256::from(123_456_789u64);

        assert_eq!(to_u256(&to_bigint(value)), Some(value));
        assert_eq!(to_u256(&BigInt::from(-1)), None);
        assert_eq!(to_u256(&(to_bigint(U256::MAX) + 1)), None);
    }
}
