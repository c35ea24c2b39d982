use std::sync::Arc;

use nested_common::{
    error::{OrderError, QuoteError},
    models::{AggregatorQuote, Chain, QuoteRequest},
    traits::{AggregatorSource, OrderEncoder, ProtocolFeeRate, TokenDecimals},
};
use thiserror::Error;
use tracing::info;

use crate::{
    config::ClientConfig, decimals::DecimalsCache, encoder::AbiOrderEncoder,
    selector::AggregatorSelector, sources,
};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Missing {0} provider")]
    MissingProvider(&'static str),
    #[error("Failed to set up price source: {0}")]
    Source(#[from] QuoteError),
}

struct SessionInner {
    chain: Chain,
    config: ClientConfig,
    decimals: Arc<DecimalsCache>,
    selector: AggregatorSelector,
    fee_rates: Arc<dyn ProtocolFeeRate>,
    encoder: Arc<dyn OrderEncoder>,
}

/// Collaborators shared by every batch built on one chain.
///
/// Cloning is cheap, clones share the decimals cache and the price sources.
#[derive(Clone)]
pub struct Session(Arc<SessionInner>);

impl Session {
    pub fn builder(chain: Chain) -> SessionBuilder {
        SessionBuilder::new(chain)
    }

    pub fn chain(&self) -> Chain {
        self.0.chain
    }

    pub fn config(&self) -> &ClientConfig {
        &self.0.config
    }

    pub fn decimals(&self) -> &DecimalsCache {
        &self.0.decimals
    }

    pub fn selector(&self) -> &AggregatorSelector {
        &self.0.selector
    }

    pub fn fee_rates(&self) -> &dyn ProtocolFeeRate {
        self.0.fee_rates.as_ref()
    }

    pub fn encoder(&self) -> &dyn OrderEncoder {
        self.0.encoder.as_ref()
    }

    /// One-off quote outside of any batch.
    pub async fn best_quote(&self, request: &QuoteRequest) -> Result<AggregatorQuote, OrderError> {
        self.0
            .selector
            .best_quote(request)
            .await
    }
}

/// Builder of a [`Session`].
///
/// The decimals and fee rate providers are mandatory. Sources registered with
/// [`SessionBuilder::source`] compete after the HTTP sources, in registration order.
pub struct SessionBuilder {
    chain: Chain,
    config: ClientConfig,
    decimals: Option<Arc<dyn TokenDecimals>>,
    fee_rates: Option<Arc<dyn ProtocolFeeRate>>,
    encoder: Arc<dyn OrderEncoder>,
    sources: Vec<Arc<dyn AggregatorSource>>,
    http_sources: bool,
}

impl SessionBuilder {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            config: ClientConfig::default(),
            decimals: None,
            fee_rates: None,
            encoder: Arc::new(AbiOrderEncoder),
            sources: Vec::new(),
            http_sources: false,
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn decimals_provider(mut self, provider: Arc<dyn TokenDecimals>) -> Self {
        self.decimals = Some(provider);
        self
    }

    pub fn fee_rate_provider(mut self, provider: Arc<dyn ProtocolFeeRate>) -> Self {
        self.fee_rates = Some(provider);
        self
    }

    pub fn encoder(mut self, encoder: Arc<dyn OrderEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn source(mut self, source: Arc<dyn AggregatorSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Registers the 0x and ParaSwap adapters configured by [`ClientConfig`].
    pub fn with_http_sources(mut self) -> Self {
        self.http_sources = true;
        self
    }

    pub fn build(self) -> Result<Session, SessionError> {
        let provider = self
            .decimals
            .ok_or(SessionError::MissingProvider("token decimals"))?;
        let fee_rates = self
            .fee_rates
            .ok_or(SessionError::MissingProvider("fee rate"))?;
        let decimals = Arc::new(DecimalsCache::new(
            provider,
            self.config.decimals_cache_capacity,
            self.config.decimals_cache_ttl(),
        ));

        let mut enabled = if self.http_sources {
            sources::from_config(&self.config, Some(decimals.clone()))?
        } else {
            Vec::new()
        };
        enabled.extend(
            self.sources
                .into_iter()
                .filter(|s| self.config.is_enabled(s.id())),
        );
        let selector = AggregatorSelector::new(enabled);
        info!(chain = %self.chain, sources = ?selector.source_ids(), "SessionStarted");

        Ok(Session(Arc::new(SessionInner {
            chain: self.chain,
            config: self.config,
            decimals,
            selector,
            fee_rates,
            encoder: self.encoder,
        })))
    }
}
