use std::{sync::Arc, time::Duration};

use alloy_primitives::{Address, U256};
use nested_common::{
    error::{OrderError, QuoteError},
    models::{parse_units, Chain, TokenAmount, NATIVE_TOKEN},
    traits::TokenDecimals,
};

use crate::cache::SharedCache;

/// Decimals of the native gas token on every supported chain.
pub const NATIVE_DECIMALS: u8 = 18;

/// Token decimals lookup shared by every leg of a session.
///
/// Concurrent lookups of the same token share one call to the underlying provider and a failed
/// lookup is not remembered.
pub struct DecimalsCache {
    provider: Arc<dyn TokenDecimals>,
    cache: SharedCache<(Chain, Address), u8>,
}

impl DecimalsCache {
    pub fn new(provider: Arc<dyn TokenDecimals>, capacity: u64, ttl: Duration) -> Self {
        Self { provider, cache: SharedCache::new("decimals", capacity, ttl) }
    }

    pub async fn decimals(&self, chain: Chain, token: Address) -> Result<u8, QuoteError> {
        if token == NATIVE_TOKEN {
            return Ok(NATIVE_DECIMALS);
        }
        let provider = self.provider.clone();
        self.cache
            .get_or_populate((chain, token), |(chain, token)| async move {
                provider
                    .decimals(chain, &token)
                    .await
            })
            .await
    }

    /// Converts `amount` to the token's smallest unit. Raw amounts never hit the provider.
    pub async fn to_raw(
        &self,
        chain: Chain,
        token: Address,
        amount: TokenAmount,
    ) -> Result<U256, OrderError> {
        match amount {
            TokenAmount::Raw(value) => Ok(value),
            TokenAmount::Units(value) => {
                let decimals = self
                    .decimals(chain, token)
                    .await
                    .map_err(OrderError::Decimals)?;
                parse_units(value, decimals)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use alloy_primitives::address;
    use futures03::future::join_all;
    use nested_common::traits::MockTokenDecimals;
    use rust_decimal::Decimal;

    use super::*;

    const USDC: Address = address!("2791bca1f2de4661ed88a30c99a7a9449aa84174");

    fn cache(provider: MockTokenDecimals) -> DecimalsCache {
        DecimalsCache::new(Arc::new(provider), 100, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_native_token_skips_provider() {
        let mut provider = MockTokenDecimals::new();
        provider.expect_decimals().never();

        let decimals = cache(provider)
            .decimals(Chain::Poly, NATIVE_TOKEN)
            .await
            .unwrap();

        assert_eq!(decimals, 18);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_call() {
        let mut provider = MockTokenDecimals::new();
        provider
            .expect_decimals()
            .times(1)
            .returning(|_, _| Ok(6));
        let cache = cache(provider);

        let results = join_all((0..5).map(|_| cache.decimals(Chain::Poly, USDC))).await;

        assert!(results.iter().all(|r| *r == Ok(6)));
    }

    #[tokio::test]
    async fn test_failed_lookup_is_retried() {
        let mut provider = MockTokenDecimals::new();
        let mut seq = mockall::Sequence::new();
        provider
            .expect_decimals()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(QuoteError::Transport("rpc down".into())));
        provider
            .expect_decimals()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(6));
        let cache = cache(provider);

        assert!(cache.decimals(Chain::Poly, USDC).await.is_err());
        assert_eq!(cache.decimals(Chain::Poly, USDC).await, Ok(6));
        assert_eq!(cache.decimals(Chain::Poly, USDC).await, Ok(6));
    }

    #[tokio::test]
    async fn test_to_raw() {
        let mut provider = MockTokenDecimals::new();
        provider
            .expect_decimals()
            .returning(|_, _| Ok(6));
        let cache = cache(provider);

        let units = cache
            .to_raw(Chain::Poly, USDC, TokenAmount::Units(Decimal::from_str("1.5").unwrap()))
            .await
            .unwrap();
        let raw = cache
            .to_raw(Chain::Poly, USDC, TokenAmount::Raw(U256::from(42)))
            .await
            .unwrap();

        assert_eq!(units, U256::from(1_500_000));
        assert_eq!(raw, U256::from(42));
    }

    #[tokio::test]
    async fn test_to_raw_reports_decimals_failure() {
        let mut provider = MockTokenDecimals::new();
        provider
            .expect_decimals()
            .returning(|_, _| Err(QuoteError::Unknown("not a token".into())));

        let res = cache(provider)
            .to_raw(Chain::Poly, USDC, TokenAmount::Units(Decimal::ONE))
            .await;

        assert!(matches!(res, Err(OrderError::Decimals(_))));
    }
}
