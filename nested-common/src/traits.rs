use alloy_primitives::Address;
use async_trait::async_trait;

use crate::{
    error::QuoteError,
    fees::FeeRate,
    models::{
        ActionType, AggregatorId, AggregatorQuote, Chain, EncodedOrder, Operator, OrderArg,
        QuoteRequest,
    },
};

/// Trait for looking up the number of decimals of an ERC20 token.
#[cfg_attr(feature = "test-utils", mockall::automock)]
#[async_trait]
pub trait TokenDecimals: Send + Sync {
    async fn decimals(&self, chain: Chain, token: &Address) -> Result<u8, QuoteError>;
}

/// An external price-routing service returning executable swap quotes.
#[cfg_attr(feature = "test-utils", mockall::automock)]
#[async_trait]
pub trait AggregatorSource: Send + Sync {
    /// Identifies the source, also used as the on-chain operator of the legs it wins.
    fn id(&self) -> AggregatorId;

    /// Requests a quote.
    ///
    /// # Returns
    /// * `Ok(Some(quote))` - the source can route the request.
    /// * `Ok(None)` - the source does not serve this request (e.g. unsupported chain). It is left
    ///   out of the competition and is not counted as a failure.
    /// * `Err(_)` - the attempt failed. [`QuoteError::InsufficientLiquidity`] must be used when
    ///   the pair cannot be routed for lack of liquidity.
    async fn quote(&self, request: &QuoteRequest) -> Result<Option<AggregatorQuote>, QuoteError>;
}

/// Trait for fetching the protocol fee rate charged on a batch.
#[cfg_attr(feature = "test-utils", mockall::automock)]
#[async_trait]
pub trait ProtocolFeeRate: Send + Sync {
    async fn fee_rate(&self, action: ActionType) -> Result<FeeRate, QuoteError>;
}

/// Encodes the call of an on-chain operator into an order fragment.
#[cfg_attr(feature = "test-utils", mockall::automock)]
pub trait OrderEncoder: Send + Sync {
    /// # Arguments
    ///
    /// * `operator` - the operator executing the order.
    /// * `token` - the token this order outputs (as seen by the contract fee logic).
    /// * `args` - typed arguments of the operator call.
    fn encode(&self, operator: Operator, token: Address, args: &[OrderArg]) -> EncodedOrder;
}
