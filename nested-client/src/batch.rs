//! Batches of order legs priced together and exported as factory calls.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use alloy_primitives::{Address, U256};
use nested_common::{
    error::OrderError,
    fees::FeeRate,
    models::{
        ActionType, BatchedInputOrders, BatchedOutputOrders, EncodedOrder, FixedSide, NATIVE_TOKEN,
    },
};
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::{
    order::{LegSpec, LegState, OrderLeg},
    session::Session,
};

/// What a batch does to a portfolio. Fixes the fee side and the fee rate looked up for its legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// Buys tokens into a portfolio with a budget token.
    Deposit,
    /// Sells portfolio tokens to a single received token.
    Withdrawal,
    /// Swaps tokens already held by a portfolio.
    Swap,
    /// Sells every holding of a portfolio, legs can't be removed.
    Liquidation,
    /// Swaps several portfolio tokens to one token credited back to the portfolio.
    MultiToSingleSwap,
}

impl BatchKind {
    pub fn action(&self) -> ActionType {
        match self {
            BatchKind::Deposit | BatchKind::Swap => ActionType::Entry,
            BatchKind::Withdrawal | BatchKind::Liquidation | BatchKind::MultiToSingleSwap => {
                ActionType::Exit
            }
        }
    }

    /// Side of every leg bearing the protocol fees.
    pub fn fees_on(&self) -> FixedSide {
        match self {
            BatchKind::Deposit | BatchKind::Swap => FixedSide::Input,
            BatchKind::Withdrawal | BatchKind::Liquidation | BatchKind::MultiToSingleSwap => {
                FixedSide::Output
            }
        }
    }

    fn allows_removal(&self) -> bool {
        !matches!(self, BatchKind::Liquidation)
    }

    fn uses_reserve(&self) -> bool {
        matches!(self, BatchKind::Swap)
    }

    fn credits_reserve(&self) -> bool {
        matches!(self, BatchKind::MultiToSingleSwap)
    }
}

/// State shared by the legs of a batch.
pub(crate) struct BatchContext {
    session: Session,
    kind: BatchKind,
    fee_rate: OnceCell<FeeRate>,
}

impl BatchContext {
    pub(crate) fn session(&self) -> &Session {
        &self.session
    }

    pub(crate) fn kind(&self) -> BatchKind {
        self.kind
    }

    /// Fee rate of the batch, fetched once. A failed fetch is retried by the next caller.
    pub(crate) async fn fee_rate(&self) -> Result<FeeRate, OrderError> {
        self.fee_rate
            .get_or_try_init(|| async {
                let action = self.kind.action();
                let rate = self
                    .session
                    .fee_rates()
                    .fee_rate(action)
                    .await
                    .map_err(OrderError::FeeRate)?;
                debug!(%action, rate, "FetchedFeeRate");
                Ok::<_, OrderError>(rate)
            })
            .await
            .copied()
    }
}

/// Legs owned by a batch.
pub(crate) struct LegSet {
    removable: bool,
    next_id: AtomicU64,
    legs: Mutex<Vec<Arc<OrderLeg>>>,
}

impl LegSet {
    pub(crate) fn detach(&self, id: u64) -> Result<(), OrderError> {
        if !self.removable {
            return Err(OrderError::InvalidOperation(
                "Cannot remove an order from a liquidation".to_string(),
            ));
        }
        self.legs
            .lock()
            .retain(|leg| leg.id() != id);
        Ok(())
    }
}

/// An ordered set of legs sharing a session, a fee side and a fee rate.
pub struct LegBatch {
    ctx: Arc<BatchContext>,
    legs: Arc<LegSet>,
}

impl LegBatch {
    pub fn new(session: Session, kind: BatchKind) -> Self {
        Self {
            ctx: Arc::new(BatchContext { session, kind, fee_rate: OnceCell::new() }),
            legs: Arc::new(LegSet {
                removable: kind.allows_removal(),
                next_id: AtomicU64::new(0),
                legs: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn kind(&self) -> BatchKind {
        self.ctx.kind
    }

    pub fn session(&self) -> &Session {
        &self.ctx.session
    }

    /// Adds an unpriced leg. Quantities are set through the returned handle.
    pub fn add_leg(
        &self,
        input_token: Address,
        output_token: Address,
        slippage: f64,
        fallback_to_flat: bool,
    ) -> Result<Arc<OrderLeg>, OrderError> {
        let spec = LegSpec { input_token, output_token, slippage, fallback_to_flat };
        let id = self
            .legs
            .next_id
            .fetch_add(1, Ordering::Relaxed);
        let leg = Arc::new(OrderLeg::new(id, self.ctx.clone(), Arc::downgrade(&self.legs), spec)?);
        self.legs
            .legs
            .lock()
            .push(leg.clone());
        debug!(leg = id, %input_token, %output_token, "LegAdded");
        Ok(leg)
    }

    /// Legs in insertion order.
    pub fn legs(&self) -> Vec<Arc<OrderLeg>> {
        self.legs.legs.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.legs.legs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, leg: &OrderLeg) -> Result<(), OrderError> {
        if !leg.belongs_to(&self.legs) {
            return Err(OrderError::InvalidOperation(
                "Order is not part of this operation".to_string(),
            ));
        }
        leg.remove()
    }

    fn settled(&self) -> Result<Vec<(Arc<OrderLeg>, LegState, EncodedOrder)>, OrderError> {
        self.legs()
            .into_iter()
            .map(|leg| {
                let state = leg.state();
                let order = state
                    .order
                    .clone()
                    .ok_or(OrderError::NotSettled)?;
                Ok((leg, state, order))
            })
            .collect()
    }

    /// Encoded orders of every leg, fails if any leg is loading or errored.
    pub fn settled_orders(&self) -> Result<Vec<EncodedOrder>, OrderError> {
        Ok(self
            .settled()?
            .into_iter()
            .map(|(_, _, order)| order)
            .collect())
    }

    /// Sum of the input quantities of every leg, fees included.
    pub fn total_input(&self) -> Result<U256, OrderError> {
        Ok(self
            .settled()?
            .iter()
            .fold(U256::ZERO, |acc, (_, state, _)| acc.saturating_add(state.input_qty)))
    }

    pub fn total_output(&self) -> Result<U256, OrderError> {
        Ok(self
            .settled()?
            .iter()
            .fold(U256::ZERO, |acc, (_, state, _)| acc.saturating_add(state.output_qty)))
    }

    /// Native value to attach to the transaction.
    pub fn native_value(&self) -> Result<U256, OrderError> {
        Ok(self
            .settled()?
            .iter()
            .filter(|(leg, _, _)| leg.input_token() == NATIVE_TOKEN)
            .fold(U256::ZERO, |acc, (_, state, _)| acc.saturating_add(state.input_qty)))
    }

    /// Settled orders grouped by input token, in first seen order.
    pub fn input_orders(&self) -> Result<Vec<BatchedInputOrders>, OrderError> {
        let settled = self.settled()?;
        let mut batches: Vec<BatchedInputOrders> = Vec::new();
        let mut index: HashMap<Address, usize> = HashMap::new();
        for (leg, state, order) in settled {
            let token = leg.input_token();
            let position = *index.entry(token).or_insert_with(|| {
                batches.push(BatchedInputOrders {
                    input_token: token,
                    amount: U256::ZERO,
                    orders: Vec::new(),
                    from_reserve: self.ctx.kind.uses_reserve(),
                });
                batches.len() - 1
            });
            let batch = &mut batches[position];
            batch.amount = batch.amount.saturating_add(state.input_qty);
            batch.orders.push(order);
        }
        if batches.is_empty() || batches.iter().all(|b| b.amount.is_zero()) {
            return Err(OrderError::InvalidOperation("No valid order in operation".to_string()));
        }
        Ok(batches)
    }

    /// Settled orders grouped by wrapped output token, in first seen order.
    pub fn output_orders(&self) -> Result<Vec<BatchedOutputOrders>, OrderError> {
        let settled = self.settled()?;
        let chain = self.ctx.session.chain();
        let mut batches: Vec<BatchedOutputOrders> = Vec::new();
        let mut index: HashMap<Address, usize> = HashMap::new();
        for (leg, state, order) in settled {
            let token = chain.wrap(&leg.output_token());
            let position = *index.entry(token).or_insert_with(|| {
                batches.push(BatchedOutputOrders {
                    output_token: token,
                    amounts: Vec::new(),
                    orders: Vec::new(),
                    to_reserve: self.ctx.kind.credits_reserve(),
                });
                batches.len() - 1
            });
            batches[position]
                .amounts
                .push(state.input_qty);
            batches[position].orders.push(order);
        }
        if batches.is_empty() {
            return Err(OrderError::InvalidOperation("Nothing to sell".to_string()));
        }
        Ok(batches)
    }
}
