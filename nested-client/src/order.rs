//! A single swap leg of a batch and its quote lifecycle.
//!
//! A leg has one side fixed by the caller and the other side derived from the latest settled
//! quote. Every mutator issues a ticket; once a newer ticket exists, the older operation stops
//! at its next checkpoint, does not touch the leg and reports `Ok(false)`.
//!
//! Quantity changes are also numbered on their own: only a newer quantity change (or a removal)
//! can discard a quantity that is still being converted. Its quote ticket is issued once the
//! quantity is written, so a slippage change issued meanwhile is re-quoted with it.
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

use alloy_primitives::{Address, U256};
use nested_common::{
    error::OrderError,
    fees::{add_fees, remove_fees, FeeRate},
    models::{
        AggregatorId, AggregatorQuote, Chain, EncodedOrder, FixedSide, Operator, OrderArg,
        OrderFees, QuoteRequest, RequestedAmount, TokenAmount,
    },
};
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::{
    batch::{BatchContext, LegSet},
    coalescer::{QuoteCoalescer, Ticket},
};

/// Parameters of a new leg.
pub(crate) struct LegSpec {
    pub input_token: Address,
    pub output_token: Address,
    pub slippage: f64,
    pub fallback_to_flat: bool,
}

/// Snapshot of a leg.
#[derive(Debug, Clone, PartialEq)]
pub struct LegState {
    pub slippage: f64,
    pub fixed_side: FixedSide,
    pub input_qty: U256,
    pub output_qty: U256,
    pub price: f64,
    pub guaranteed_price: f64,
    pub fees: OrderFees,
    pub estimated_price_impact: f64,
    /// Source of the settled quote, `None` for flat legs.
    pub source_id: Option<AggregatorId>,
    pub allowance_target: Option<Address>,
    /// `None` while loading, after a failure or when both quantities are zero.
    pub order: Option<EncodedOrder>,
}

impl LegState {
    fn empty(fixed_side: FixedSide, slippage: f64, fees: OrderFees) -> Self {
        Self {
            slippage,
            fixed_side,
            input_qty: U256::ZERO,
            output_qty: U256::ZERO,
            price: 0.0,
            guaranteed_price: 0.0,
            fees,
            estimated_price_impact: 0.0,
            source_id: None,
            allowance_target: None,
            order: None,
        }
    }

    /// Quantity of the side set by the caller.
    pub fn fixed_qty(&self) -> U256 {
        match self.fixed_side {
            FixedSide::Input => self.input_qty,
            FixedSide::Output => self.output_qty,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.order.is_some()
    }
}

fn validate_slippage(slippage: f64) -> Result<(), OrderError> {
    if !(0.0..1.0).contains(&slippage) {
        return Err(OrderError::InvalidOperation(format!(
            "Slippage must be within [0, 1), got {slippage}"
        )));
    }
    Ok(())
}

/// Amount to ask the price sources for, once fees are taken out of (or added to) the fixed side.
fn requested_amount(
    fixed_side: FixedSide,
    fees_on: FixedSide,
    fixed_qty: U256,
    rate: FeeRate,
) -> RequestedAmount {
    match (fixed_side, fees_on) {
        (FixedSide::Input, FixedSide::Input) => {
            RequestedAmount::Spend(remove_fees(fixed_qty, rate))
        }
        (FixedSide::Input, FixedSide::Output) => RequestedAmount::Spend(fixed_qty),
        (FixedSide::Output, FixedSide::Input) => RequestedAmount::Bought(fixed_qty),
        (FixedSide::Output, FixedSide::Output) => {
            RequestedAmount::Bought(add_fees(fixed_qty, rate))
        }
    }
}

/// Settled `(input, output, fees)` of a leg from the amounts exchanged by the swap.
fn settle_amounts(
    requested: RequestedAmount,
    fees_on: FixedSide,
    fixed_qty: U256,
    rate: FeeRate,
    sold: U256,
    bought: U256,
) -> (U256, U256, U256) {
    match (requested, fees_on) {
        (RequestedAmount::Spend(spent), FixedSide::Input) => {
            (fixed_qty, bought, fixed_qty.saturating_sub(spent))
        }
        (RequestedAmount::Spend(_), FixedSide::Output) => {
            let output = remove_fees(bought, rate);
            (fixed_qty, output, bought.saturating_sub(output))
        }
        (RequestedAmount::Bought(_), FixedSide::Input) => {
            let input = add_fees(sold, rate);
            (input, fixed_qty, input.saturating_sub(sold))
        }
        (RequestedAmount::Bought(bought_with_fees), FixedSide::Output) => {
            (sold, fixed_qty, bought_with_fees.saturating_sub(fixed_qty))
        }
    }
}

/// A swap from an input token to an output token, priced by the session's sources.
///
/// Legs are created through a batch and shared as `Arc<OrderLeg>`. Mutators may be called
/// concurrently: the leg always converges to the state computed for the latest call.
pub struct OrderLeg {
    id: u64,
    ctx: Arc<BatchContext>,
    parent: Weak<LegSet>,
    input_token: Address,
    output_token: Address,
    fees_on: FixedSide,
    fallback_to_flat: bool,
    coalescer: QuoteCoalescer,
    /// Sequence of the quantity changes.
    amounts: AtomicU64,
    /// Held shared while an amount is converted to raw units, exclusively by slippage changes.
    conversions: RwLock<()>,
    state: Mutex<LegState>,
}

impl OrderLeg {
    pub(crate) fn new(
        id: u64,
        ctx: Arc<BatchContext>,
        parent: Weak<LegSet>,
        spec: LegSpec,
    ) -> Result<Self, OrderError> {
        validate_slippage(spec.slippage)?;
        let fees_on = ctx.kind().fees_on();
        let fee_token = match fees_on {
            FixedSide::Input => spec.input_token,
            FixedSide::Output => spec.output_token,
        };
        let window = ctx
            .session()
            .config()
            .coalescing_window();
        Ok(Self {
            id,
            ctx,
            parent,
            input_token: spec.input_token,
            output_token: spec.output_token,
            fees_on,
            fallback_to_flat: spec.fallback_to_flat,
            coalescer: QuoteCoalescer::new(window),
            amounts: AtomicU64::new(0),
            conversions: RwLock::new(()),
            state: Mutex::new(LegState::empty(
                FixedSide::Input,
                spec.slippage,
                OrderFees::zero(fees_on, fee_token),
            )),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn input_token(&self) -> Address {
        self.input_token
    }

    pub fn output_token(&self) -> Address {
        self.output_token
    }

    pub fn fees_on(&self) -> FixedSide {
        self.fees_on
    }

    pub fn fallback_to_flat(&self) -> bool {
        self.fallback_to_flat
    }

    pub fn state(&self) -> LegState {
        self.state.lock().clone()
    }

    pub fn slippage(&self) -> f64 {
        self.state.lock().slippage
    }

    pub fn fixed_side(&self) -> FixedSide {
        self.state.lock().fixed_side
    }

    pub fn input_qty(&self) -> U256 {
        self.state.lock().input_qty
    }

    pub fn output_qty(&self) -> U256 {
        self.state.lock().output_qty
    }

    pub fn price(&self) -> f64 {
        self.state.lock().price
    }

    pub fn guaranteed_price(&self) -> f64 {
        self.state.lock().guaranteed_price
    }

    pub fn fees(&self) -> OrderFees {
        self.state.lock().fees.clone()
    }

    pub fn estimated_price_impact(&self) -> f64 {
        self.state.lock().estimated_price_impact
    }

    pub fn source_id(&self) -> Option<AggregatorId> {
        self.state.lock().source_id
    }

    pub fn allowance_target(&self) -> Option<Address> {
        self.state.lock().allowance_target
    }

    pub fn order(&self) -> Option<EncodedOrder> {
        self.state.lock().order.clone()
    }

    pub fn is_settled(&self) -> bool {
        self.state.lock().is_settled()
    }

    fn chain(&self) -> Chain {
        self.ctx.session().chain()
    }

    /// Whether the leg moves a token to itself (no swap, only fees).
    pub fn is_flat(&self) -> bool {
        self.chain()
            .same_token(&self.input_token, &self.output_token)
    }

    /// Token the encoded order outputs, as seen by the factory fee logic.
    fn order_token(&self) -> Address {
        let chain = self.chain();
        match self.fees_on {
            FixedSide::Input => chain.wrap(&self.output_token),
            FixedSide::Output => chain.wrap(&self.input_token),
        }
    }

    pub(crate) fn belongs_to(&self, set: &Arc<LegSet>) -> bool {
        std::ptr::eq(self.parent.as_ptr(), Arc::as_ptr(set))
    }

    /// Fixes the amount of input token to spend, fees included when they are taken on input.
    ///
    /// Returns `Ok(false)` if a newer operation superseded this one.
    pub async fn set_input_amount(
        &self,
        amount: impl Into<TokenAmount>,
    ) -> Result<bool, OrderError> {
        self.set_amount(FixedSide::Input, amount.into())
            .await
    }

    /// Fixes the amount of output token to receive, net of fees when they are taken on output.
    ///
    /// Returns `Ok(false)` if a newer operation superseded this one.
    pub async fn set_output_amount(
        &self,
        amount: impl Into<TokenAmount>,
    ) -> Result<bool, OrderError> {
        self.set_amount(FixedSide::Output, amount.into())
            .await
    }

    #[instrument(skip(self), fields(leg = self.id))]
    async fn set_amount(&self, side: FixedSide, amount: TokenAmount) -> Result<bool, OrderError> {
        let seq = self.next_amount();
        if amount.is_zero() {
            let ticket = self.coalescer.issue();
            return Ok(self.reset(ticket, side));
        }
        let token = match side {
            FixedSide::Input => self.input_token,
            FixedSide::Output => self.output_token,
        };
        let ticket = {
            let _conversion = self.conversions.read().await;
            let qty = self
                .ctx
                .session()
                .decimals()
                .to_raw(self.chain(), token, amount)
                .await;
            let mut state = self.state.lock();
            if self.amounts.load(Ordering::SeqCst) != seq {
                debug!(seq, "Superseded");
                return Ok(false);
            }
            let qty = qty?;
            state.fixed_side = side;
            match side {
                FixedSide::Input => state.input_qty = qty,
                FixedSide::Output => state.output_qty = qty,
            }
            self.coalescer.issue()
        };
        self.update(ticket).await
    }

    fn next_amount(&self) -> u64 {
        self.amounts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Changes the accepted slippage and re-quotes the leg.
    ///
    /// Waits for amount conversions in flight so the new quote sees their result.
    pub async fn change_slippage(&self, slippage: f64) -> Result<bool, OrderError> {
        validate_slippage(slippage)?;
        {
            let mut state = self.state.lock();
            if state.slippage == slippage {
                return Ok(true);
            }
            state.slippage = slippage;
        }
        let ticket = {
            let _conversions = self.conversions.write().await;
            self.coalescer.issue()
        };
        self.update(ticket).await
    }

    /// Re-quotes the leg with its current quantities.
    pub async fn refresh(&self) -> Result<bool, OrderError> {
        let ticket = self.coalescer.issue();
        self.update(ticket).await
    }

    /// Detaches the leg from its batch and abandons any operation in flight.
    pub fn remove(&self) -> Result<(), OrderError> {
        if let Some(parent) = self.parent.upgrade() {
            parent.detach(self.id)?;
        }
        self.next_amount();
        self.coalescer.issue();
        self.coalescer.cancel_pending();
        debug!(leg = self.id, "LegRemoved");
        Ok(())
    }

    /// Zeroes both quantities and drops the order, without contacting any source.
    fn reset(&self, ticket: Ticket, side: FixedSide) -> bool {
        let mut state = self.state.lock();
        if !self.coalescer.is_current(ticket) {
            return false;
        }
        self.coalescer.cancel_pending();
        let fees = OrderFees::zero(self.fees_on, state.fees.on_token);
        *state = LegState::empty(side, state.slippage, fees);
        true
    }

    async fn update(&self, ticket: Ticket) -> Result<bool, OrderError> {
        let (side, fixed_qty, slippage) = {
            let state = self.state.lock();
            (state.fixed_side, state.fixed_qty(), state.slippage)
        };
        if fixed_qty.is_zero() {
            return Ok(self.reset(ticket, side));
        }

        let rate = self.ctx.fee_rate().await;
        if !self.coalescer.is_current(ticket) {
            debug!(leg = self.id, ticket, "Superseded");
            return Ok(false);
        }
        let rate = rate?;
        let requested = requested_amount(side, self.fees_on, fixed_qty, rate);

        if self.is_flat() {
            self.coalescer.cancel_pending();
            return Ok(self.settle(ticket, fixed_qty, rate, requested, None));
        }

        self.mark_loading(ticket);
        if !self.coalescer.debounce(ticket).await {
            debug!(leg = self.id, ticket, "Superseded");
            return Ok(false);
        }
        let chain = self.chain();
        let request = QuoteRequest {
            chain,
            input_token: chain.wrap(&self.input_token),
            output_token: chain.wrap(&self.output_token),
            slippage,
            amount: requested,
        };
        let quote = self
            .ctx
            .session()
            .selector()
            .best_quote(&request)
            .await;
        if !self.coalescer.is_current(ticket) {
            debug!(leg = self.id, ticket, "Superseded");
            return Ok(false);
        }

        match quote {
            Ok(quote) => Ok(self.settle(ticket, fixed_qty, rate, requested, Some(quote))),
            Err(error) if self.fallback_to_flat => {
                warn!(leg = self.id, %error, "FallbackToFlat");
                Ok(self.settle(ticket, fixed_qty, rate, requested, None))
            }
            Err(error) => Err(error),
        }
    }

    fn mark_loading(&self, ticket: Ticket) {
        let mut state = self.state.lock();
        if self.coalescer.is_current(ticket) {
            state.order = None;
        }
    }

    /// Writes the outcome of `ticket`. A flat settlement is used when `quote` is `None`.
    fn settle(
        &self,
        ticket: Ticket,
        fixed_qty: U256,
        rate: FeeRate,
        requested: RequestedAmount,
        quote: Option<AggregatorQuote>,
    ) -> bool {
        let chain = self.chain();
        let (sold, bought) = match &quote {
            Some(quote) => (quote.sell_amount, quote.buy_amount),
            None => (requested.amount(), requested.amount()),
        };
        let (input_qty, output_qty, fees) =
            settle_amounts(requested, self.fees_on, fixed_qty, rate, sold, bought);

        let (operator, args) = match &quote {
            Some(quote) => (
                Operator::from(quote.source_id),
                vec![
                    OrderArg::Address(chain.wrap(&self.input_token)),
                    OrderArg::Address(chain.wrap(&self.output_token)),
                    OrderArg::Bytes(quote.encoded_call_fragment.clone()),
                ],
            ),
            None => (
                Operator::Flat,
                vec![OrderArg::Address(chain.wrap(&self.input_token)), OrderArg::Uint(sold)],
            ),
        };
        let order = self
            .ctx
            .session()
            .encoder()
            .encode(operator, self.order_token(), &args);

        let mut state = self.state.lock();
        if !self.coalescer.is_current(ticket) {
            return false;
        }
        state.input_qty = input_qty;
        state.output_qty = output_qty;
        state.fees.amount = fees;
        state.order = Some(order);
        match quote {
            Some(quote) => {
                state.price = quote.price;
                state.guaranteed_price = quote.guaranteed_price;
                state.estimated_price_impact = quote.estimated_price_impact;
                state.source_id = Some(quote.source_id);
                state.allowance_target = Some(quote.allowance_target);
            }
            None => {
                state.price = 1.0;
                state.guaranteed_price = 1.0;
                state.estimated_price_impact = 0.0;
                state.source_id = None;
                state.allowance_target = None;
            }
        }
        debug!(leg = self.id, %input_qty, %output_qty, %fees, "LegSettled");
        true
    }
}
