use std::sync::Arc;

use futures03::future::join_all;
use nested_common::{
    error::{OrderError, SourceFailure},
    models::{AggregatorId, AggregatorQuote, QuoteRequest},
    traits::AggregatorSource,
};
use tracing::{debug, instrument, warn};

/// Runs a price competition between the enabled sources of a session.
pub struct AggregatorSelector {
    sources: Vec<Arc<dyn AggregatorSource>>,
}

impl AggregatorSelector {
    /// `sources` are listed by priority: on equal `buy_amount` the first one wins.
    pub fn new(sources: Vec<Arc<dyn AggregatorSource>>) -> Self {
        Self { sources }
    }

    pub fn source_ids(&self) -> Vec<AggregatorId> {
        self.sources
            .iter()
            .map(|s| s.id())
            .collect()
    }

    /// Queries every source concurrently and returns the quote buying the most output token.
    ///
    /// All attempts are awaited, a fast success does not cancel slower sources. Sources reporting
    /// no route are left out. When nothing succeeds, any liquidity failure takes precedence and
    /// yields [`OrderError::InsufficientLiquidity`]; otherwise every reason is returned in
    /// [`OrderError::AggregatorFailure`].
    #[instrument(skip_all, fields(input = %request.input_token, output = %request.output_token))]
    pub async fn best_quote(&self, request: &QuoteRequest) -> Result<AggregatorQuote, OrderError> {
        if self.sources.is_empty() {
            return Err(OrderError::InvalidOperation("No price source enabled".to_string()));
        }

        let attempts = join_all(
            self.sources
                .iter()
                .map(|source| async move { (source.id(), source.quote(request).await) }),
        )
        .await;

        let mut best: Option<AggregatorQuote> = None;
        let mut failures = Vec::new();
        let mut no_route = 0;
        for (id, attempt) in attempts {
            match attempt {
                Ok(Some(quote)) => {
                    debug!(source = %id, buy_amount = %quote.buy_amount, "QuoteReceived");
                    if best
                        .as_ref()
                        .map_or(true, |b| quote.buy_amount > b.buy_amount)
                    {
                        best = Some(quote);
                    }
                }
                Ok(None) => {
                    debug!(source = %id, "NoRoute");
                    no_route += 1;
                }
                Err(error) => {
                    warn!(source = %id, %error, "QuoteFailed");
                    failures.push(SourceFailure::new(id, error));
                }
            }
        }

        if let Some(quote) = best {
            return Ok(quote);
        }
        if failures.is_empty() {
            // every source answered that it cannot route this pair
            debug!(no_route, "NoSourceCanRoute");
            return Err(OrderError::InsufficientLiquidity);
        }
        if failures
            .iter()
            .any(|f| f.error.is_insufficient_liquidity())
        {
            return Err(OrderError::InsufficientLiquidity);
        }
        Err(OrderError::AggregatorFailure(failures))
    }
}
