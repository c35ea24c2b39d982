//! Portfolio operations built on top of [`LegBatch`].
use std::{ops::Deref, sync::Arc};

use alloy_primitives::{Address, U256};
use futures03::future::try_join_all;
use nested_common::{
    budget::{compute_budgets, to_bigint, to_u256, Price},
    error::OrderError,
    models::{Holding, QuoteRequest, TokenAmount},
};
use num_bigint::BigInt;
use num_traits::Zero;
use tracing::{debug, instrument};

use crate::{
    batch::{BatchKind, LegBatch},
    order::OrderLeg,
    session::Session,
};

/// Buys portfolio tokens with a single budget token.
pub struct Deposit {
    batch: LegBatch,
    budget_token: Address,
}

impl Deref for Deposit {
    type Target = LegBatch;

    fn deref(&self) -> &Self::Target {
        &self.batch
    }
}

impl Deposit {
    pub fn budget_token(&self) -> Address {
        self.budget_token
    }

    /// Adds a leg buying `token`. A token can only be bought once per deposit.
    pub fn add_token(&self, token: Address, slippage: f64) -> Result<Arc<OrderLeg>, OrderError> {
        if self
            .legs()
            .iter()
            .any(|leg| leg.output_token() == token)
        {
            return Err(OrderError::InvalidOperation(format!(
                "An order already exists in this operation for token {token}"
            )));
        }
        self.batch
            .add_leg(self.budget_token, token, slippage, false)
    }
}

/// Sells portfolio tokens to a single received token.
pub struct Withdrawal {
    batch: LegBatch,
    received_token: Address,
}

impl Deref for Withdrawal {
    type Target = LegBatch;

    fn deref(&self) -> &Self::Target {
        &self.batch
    }
}

impl Withdrawal {
    pub fn received_token(&self) -> Address {
        self.received_token
    }

    /// Adds a leg selling `token`. A token can only be sold once per withdrawal, the native
    /// token and its wrapped version being the same token.
    pub fn sell_token(&self, token: Address, slippage: f64) -> Result<Arc<OrderLeg>, OrderError> {
        let token = self.session().chain().wrap(&token);
        if self
            .legs()
            .iter()
            .any(|leg| leg.input_token() == token)
        {
            return Err(OrderError::InvalidOperation(format!(
                "An order already exists in this operation for token {token}"
            )));
        }
        self.batch
            .add_leg(token, self.received_token, slippage, false)
    }
}

/// Swaps tokens held by a portfolio, funds stay in the portfolio.
pub struct PortfolioSwap {
    batch: LegBatch,
}

impl Deref for PortfolioSwap {
    type Target = LegBatch;

    fn deref(&self) -> &Self::Target {
        &self.batch
    }
}

impl PortfolioSwap {
    pub fn swap_in_portfolio(
        &self,
        sell_token: Address,
        buy_token: Address,
        slippage: f64,
    ) -> Result<Arc<OrderLeg>, OrderError> {
        let chain = self.session().chain();
        if chain.same_token(&sell_token, &buy_token) {
            return Err(OrderError::InvalidOperation("You cannot swap a token to itself".into()));
        }
        self.batch
            .add_leg(chain.wrap(&sell_token), chain.wrap(&buy_token), slippage, false)
    }
}

/// Swaps several portfolio tokens to a single token kept in the portfolio.
pub struct MultiToSingleSwap {
    batch: LegBatch,
    to_token: Address,
}

impl Deref for MultiToSingleSwap {
    type Target = LegBatch;

    fn deref(&self) -> &Self::Target {
        &self.batch
    }
}

impl MultiToSingleSwap {
    /// The wrapped token every leg buys.
    pub fn to_token(&self) -> Address {
        self.to_token
    }

    /// Adds a leg selling `sell_token` for the target token. Fees are taken on the output.
    pub fn swap_from(
        &self,
        sell_token: Address,
        slippage: f64,
    ) -> Result<Arc<OrderLeg>, OrderError> {
        let sell_token = self.session().chain().wrap(&sell_token);
        if sell_token == self.to_token {
            return Err(OrderError::InvalidOperation("You cannot swap a token to itself".into()));
        }
        self.batch
            .add_leg(sell_token, self.to_token, slippage, false)
    }
}

/// Sells every holding of a portfolio. Legs fall back to a flat transfer when no route exists.
pub struct Liquidation {
    batch: LegBatch,
    received_token: Address,
}

impl Deref for Liquidation {
    type Target = LegBatch;

    fn deref(&self) -> &Self::Target {
        &self.batch
    }
}

impl Liquidation {
    pub fn received_token(&self) -> Address {
        self.received_token
    }
}

impl Session {
    pub fn deposit(&self, budget_token: Address) -> Deposit {
        Deposit { batch: LegBatch::new(self.clone(), BatchKind::Deposit), budget_token }
    }

    pub fn withdrawal(&self, received_token: Address) -> Withdrawal {
        Withdrawal { batch: LegBatch::new(self.clone(), BatchKind::Withdrawal), received_token }
    }

    pub fn portfolio_swap(&self) -> PortfolioSwap {
        PortfolioSwap { batch: LegBatch::new(self.clone(), BatchKind::Swap) }
    }

    pub fn multi_to_single_swap(&self, to_token: Address) -> MultiToSingleSwap {
        MultiToSingleSwap {
            batch: LegBatch::new(self.clone(), BatchKind::MultiToSingleSwap),
            to_token: self.chain().wrap(&to_token),
        }
    }

    /// Builds and prices a liquidation of every non empty holding.
    #[instrument(skip(self, holdings), fields(holdings = holdings.len()))]
    pub async fn liquidation(
        &self,
        received_token: Address,
        holdings: &[Holding],
        slippage: f64,
    ) -> Result<Liquidation, OrderError> {
        let liquidation = Liquidation {
            batch: LegBatch::new(self.clone(), BatchKind::Liquidation),
            received_token,
        };
        let legs = holdings
            .iter()
            .filter(|h| !h.amount.is_zero())
            .map(|h| {
                liquidation
                    .batch
                    .add_leg(h.token, received_token, slippage, true)
                    .map(|leg| (leg, h.amount))
            })
            .collect::<Result<Vec<_>, _>>()?;
        try_join_all(
            legs.iter()
                .map(|(leg, amount)| leg.set_input_amount(*amount)),
        )
        .await?;
        Ok(liquidation)
    }

    /// Spreads `budget` over the holdings in proportion to their current value, then prices one
    /// leg per holding receiving a share.
    #[instrument(skip(self, holdings, budget), fields(holdings = holdings.len()))]
    pub async fn compute_deposit(
        &self,
        holdings: &[Holding],
        budget_token: Address,
        budget: impl Into<TokenAmount>,
        slippage: f64,
    ) -> Result<Deposit, OrderError> {
        let chain = self.chain();
        let budget = self
            .decimals()
            .to_raw(chain, budget_token, budget.into())
            .await?;
        let holdings: Vec<Holding> = holdings
            .iter()
            .filter(|h| !h.amount.is_zero())
            .cloned()
            .collect();

        let prices = try_join_all(holdings.iter().map(|h| async move {
            if chain.same_token(&h.token, &budget_token) {
                return Ok::<_, OrderError>(Price::identity(budget));
            }
            let request = QuoteRequest::spend(
                chain,
                chain.wrap(&budget_token),
                chain.wrap(&h.token),
                slippage,
                budget,
            );
            let quote = self.best_quote(&request).await?;
            Ok(Price::new(quote.sell_amount, quote.buy_amount))
        }))
        .await?;
        let budgets = compute_budgets(&holdings, &prices, &to_bigint(budget));
        debug!(?budgets, "DepositBudgets");

        let deposit = self.deposit(budget_token);
        let legs = holdings
            .iter()
            .zip(budgets.iter())
            .filter_map(|(h, b)| positive_amount(b).map(|amount| (h.token, amount)))
            .map(|(token, amount)| {
                deposit
                    .add_token(token, slippage)
                    .map(|leg| (leg, amount))
            })
            .collect::<Result<Vec<_>, _>>()?;
        try_join_all(
            legs.iter()
                .map(|(leg, amount)| leg.set_input_amount(*amount)),
        )
        .await?;
        Ok(deposit)
    }

    /// Sells holdings in proportion to their current value until `amount` of `withdraw_token`
    /// is received.
    #[instrument(skip(self, holdings, amount), fields(holdings = holdings.len()))]
    pub async fn compute_withdrawal(
        &self,
        holdings: &[Holding],
        withdraw_token: Address,
        amount: impl Into<TokenAmount>,
        slippage: f64,
    ) -> Result<Withdrawal, OrderError> {
        let chain = self.chain();
        let amount = self
            .decimals()
            .to_raw(chain, withdraw_token, amount.into())
            .await?;
        let holdings: Vec<Holding> = holdings
            .iter()
            .filter(|h| !h.amount.is_zero())
            .cloned()
            .collect();

        let prices = try_join_all(holdings.iter().map(|h| async move {
            if chain.same_token(&h.token, &withdraw_token) {
                return Ok::<_, OrderError>(Price::identity(amount));
            }
            let request = QuoteRequest::bought(
                chain,
                chain.wrap(&h.token),
                chain.wrap(&withdraw_token),
                slippage,
                amount,
            );
            let quote = self.best_quote(&request).await?;
            Ok(Price::new(quote.buy_amount, quote.sell_amount))
        }))
        .await?;
        let budgets = compute_budgets(&holdings, &prices, &-to_bigint(amount));
        debug!(?budgets, "WithdrawalBudgets");

        let withdrawal = self.withdrawal(withdraw_token);
        let legs = holdings
            .iter()
            .zip(budgets.iter())
            .filter_map(|(h, b)| positive_amount(&-b).map(|amount| (h.token, amount)))
            .map(|(token, amount)| {
                withdrawal
                    .sell_token(token, slippage)
                    .map(|leg| (leg, amount))
            })
            .collect::<Result<Vec<_>, _>>()?;
        try_join_all(
            legs.iter()
                .map(|(leg, amount)| leg.set_output_amount(*amount)),
        )
        .await?;
        Ok(withdrawal)
    }
}

fn positive_amount(value: &BigInt) -> Option<U256> {
    if value <= &BigInt::zero() {
        return None;
    }
    to_u256(value)
}
