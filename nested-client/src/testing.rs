//! Fixtures shared by the engine tests.
use std::{sync::Arc, time::Duration};

use alloy_primitives::{address, Address, Bytes, U256};
use async_trait::async_trait;
use nested_common::{
    error::QuoteError,
    fees::FeeRate,
    models::{AggregatorId, AggregatorQuote, Chain, QuoteRequest, RequestedAmount},
    traits::{AggregatorSource, MockProtocolFeeRate, MockTokenDecimals, TokenDecimals},
};
use parking_lot::Mutex;

use crate::{config::ClientConfig, session::Session};

pub(crate) const DAI: Address = address!("8f3cf7ad23cd3cadbd9735aff958023239c6a063");
pub(crate) const USDC: Address = address!("2791bca1f2de4661ed88a30c99a7a9449aa84174");
pub(crate) const ALLOWANCE_TARGET: Address = address!("def1c0ded9bec7f1a1670819833240f027b25eff");

type DelayFn = Box<dyn Fn(&QuoteRequest) -> Duration + Send + Sync>;

/// A source where one input token is worth two output tokens.
///
/// Records every request and can delay its answer depending on the request.
pub(crate) struct ScriptedSource {
    id: AggregatorId,
    delay: DelayFn,
    failure: Option<QuoteError>,
    requests: Mutex<Vec<QuoteRequest>>,
}

impl ScriptedSource {
    pub(crate) fn doubling(id: AggregatorId) -> Self {
        Self {
            id,
            delay: Box::new(|_| Duration::ZERO),
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(id: AggregatorId, error: QuoteError) -> Self {
        Self { failure: Some(error), ..Self::doubling(id) }
    }

    pub(crate) fn with_delay(
        mut self,
        delay: impl Fn(&QuoteRequest) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.delay = Box::new(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub(crate) fn requests(&self) -> Vec<QuoteRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl AggregatorSource for ScriptedSource {
    fn id(&self) -> AggregatorId {
        self.id
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Option<AggregatorQuote>, QuoteError> {
        self.requests
            .lock()
            .push(request.clone());
        let delay = (self.delay)(request);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        let (sell_amount, buy_amount) = match request.amount {
            RequestedAmount::Spend(qty) => (qty, qty * U256::from(2)),
            RequestedAmount::Bought(qty) => ((qty + U256::from(1)) / U256::from(2), qty),
        };
        Ok(Some(AggregatorQuote {
            source_id: self.id,
            price: 2.0,
            guaranteed_price: 2.0 * (1.0 - request.slippage),
            buy_amount,
            sell_amount,
            estimated_price_impact: 0.01,
            encoded_call_fragment: Bytes::from(sell_amount.to_be_bytes_vec()),
            allowance_target: ALLOWANCE_TARGET,
        }))
    }
}

/// A decimals provider answering 18 for every token, after `delay`.
pub(crate) struct SlowDecimals {
    pub delay: Duration,
}

#[async_trait]
impl TokenDecimals for SlowDecimals {
    async fn decimals(&self, _chain: Chain, _token: &Address) -> Result<u8, QuoteError> {
        tokio::time::sleep(self.delay).await;
        Ok(18)
    }
}

pub(crate) fn fee_rates(rate: FeeRate) -> MockProtocolFeeRate {
    let mut fee_rates = MockProtocolFeeRate::new();
    fee_rates
        .expect_fee_rate()
        .returning(move |_| Ok(rate));
    fee_rates
}

/// A Polygon session where every token has 18 decimals.
pub(crate) fn session(sources: Vec<Arc<dyn AggregatorSource>>, fee_rate: FeeRate) -> Session {
    session_with_fee_rates(sources, fee_rates(fee_rate))
}

pub(crate) fn session_with_fee_rates(
    sources: Vec<Arc<dyn AggregatorSource>>,
    fee_rates: MockProtocolFeeRate,
) -> Session {
    let mut decimals = MockTokenDecimals::new();
    decimals
        .expect_decimals()
        .returning(|_, _| Ok(18));
    build_session(sources, Arc::new(decimals), fee_rates)
}

pub(crate) fn session_with_decimals(
    sources: Vec<Arc<dyn AggregatorSource>>,
    decimals: Arc<dyn TokenDecimals>,
    fee_rate: FeeRate,
) -> Session {
    build_session(sources, decimals, fee_rates(fee_rate))
}

fn build_session(
    sources: Vec<Arc<dyn AggregatorSource>>,
    decimals: Arc<dyn TokenDecimals>,
    fee_rates: MockProtocolFeeRate,
) -> Session {
    let mut builder = Session::builder(Chain::Poly)
        .config(ClientConfig { coalescing_window_ms: 30, ..Default::default() })
        .decimals_provider(decimals)
        .fee_rate_provider(Arc::new(fee_rates));
    for source in sources {
        builder = builder.source(source);
    }
    builder.build().unwrap()
}
