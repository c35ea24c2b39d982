//! HTTP adapters of the price aggregators.
use std::sync::Arc;

use nested_common::{error::QuoteError, models::AggregatorId, traits::AggregatorSource};

use crate::{config::ClientConfig, decimals::DecimalsCache};

mod http;
pub mod paraswap;
pub mod zero_ex;

pub use paraswap::ParaSwapSource;
pub use zero_ex::ZeroExSource;

/// Builds the sources enabled by `config`, in priority order.
pub fn from_config(
    config: &ClientConfig,
    decimals: Option<Arc<DecimalsCache>>,
) -> Result<Vec<Arc<dyn AggregatorSource>>, QuoteError> {
    let mut sources: Vec<Arc<dyn AggregatorSource>> = Vec::new();
    if config.is_enabled(AggregatorId::ZeroEx) {
        sources.push(Arc::new(ZeroExSource::new(config)?));
    }
    if config.is_enabled(AggregatorId::Paraswap) {
        let mut paraswap = ParaSwapSource::new(config)?;
        if let Some(decimals) = decimals {
            paraswap = paraswap.with_decimals(decimals);
        }
        sources.push(Arc::new(paraswap));
    }
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_skips_excluded() {
        let config =
            ClientConfig { excluded_aggregators: vec![AggregatorId::ZeroEx], ..Default::default() };

        let sources = from_config(&config, None).unwrap();

        let ids: Vec<_> = sources.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![AggregatorId::Paraswap]);
    }

    #[test]
    fn test_from_config_priority_order() {
        let sources = from_config(&ClientConfig::default(), None).unwrap();

        let ids: Vec<_> = sources.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![AggregatorId::ZeroEx, AggregatorId::Paraswap]);
    }
}
