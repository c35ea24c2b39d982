use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use nested_common::{
    error::QuoteError,
    fees::mul_ratio,
    models::{AggregatorId, AggregatorQuote, Chain, QuoteRequest, RequestedAmount},
    traits::AggregatorSource,
};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, trace};

use super::http::{amount_to_f64, parse_amount, parse_float, HttpClient, HttpError};
use crate::{config::ClientConfig, decimals::DecimalsCache};

const NO_ROUTE_LIQUIDITY: &str = "No routes found with enough liquidity";
const PARTNER: &str = "nested";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PricesAnswer {
    price_route: Value,
}

/// Fields of the ParaSwap price route the quote is built from. The route itself is sent back
/// untouched when building the transaction.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceRoute {
    src_amount: String,
    dest_amount: String,
    #[serde(rename = "srcUSD")]
    src_usd: String,
    #[serde(rename = "destUSD")]
    dest_usd: String,
    src_decimals: u8,
    dest_decimals: u8,
    token_transfer_proxy: Address,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionRequest<'a> {
    src_token: Address,
    dest_token: Address,
    src_amount: String,
    dest_amount: String,
    price_route: &'a Value,
    user_address: Address,
    partner: &'static str,
    src_decimals: u8,
    dest_decimals: u8,
}

#[derive(Debug, Deserialize)]
struct TransactionAnswer {
    data: Bytes,
}

#[derive(Debug, Deserialize)]
struct ParaSwapFailure {
    error: String,
}

/// Quotes from the ParaSwap v5 API: a price route first, then the transaction executing it.
pub struct ParaSwapSource {
    http: HttpClient,
    base_url: String,
    user_address: Address,
    decimals: Option<Arc<DecimalsCache>>,
}

impl ParaSwapSource {
    pub fn new(config: &ClientConfig) -> Result<Self, QuoteError> {
        Ok(Self {
            http: HttpClient::new(config, HeaderMap::new())?,
            base_url: config
                .paraswap_api_url
                .trim_end_matches('/')
                .to_string(),
            user_address: config.user_address.unwrap_or_default(),
            decimals: None,
        })
    }

    /// Sends token decimals along with the requests instead of letting ParaSwap resolve them.
    pub fn with_decimals(mut self, decimals: Arc<DecimalsCache>) -> Self {
        self.decimals = Some(decimals);
        self
    }

    #[cfg(test)]
    fn with_test_backoff_policy(mut self) -> Self {
        self.http = self.http.with_test_backoff_policy();
        self
    }

    fn is_supported(chain: Chain) -> bool {
        !matches!(chain, Chain::Celo | Chain::Ftm | Chain::Opti)
    }

    fn parse_failure(body: &str, context: &str) -> QuoteError {
        match serde_json::from_str::<ParaSwapFailure>(body) {
            Ok(failure) if failure.error == NO_ROUTE_LIQUIDITY => QuoteError::InsufficientLiquidity,
            Ok(failure) => QuoteError::Unknown(format!(
                "Failed to fetch ParaSwap {context}: {error}",
                error = failure.error
            )),
            Err(_) => QuoteError::Unknown(format!("Failed to fetch ParaSwap {context}: {body}")),
        }
    }

    async fn send(
        &self,
        request: impl Fn() -> reqwest::RequestBuilder + Send + Sync,
        context: &str,
    ) -> Result<String, QuoteError> {
        match self.http.send(request).await {
            Ok(body) => Ok(body),
            Err(HttpError::Status(status, body)) if status.is_client_error() => {
                Err(Self::parse_failure(&body, context))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn token_decimals(
        &self,
        request: &QuoteRequest,
    ) -> Result<Option<(u8, u8)>, QuoteError> {
        let Some(decimals) = &self.decimals else {
            return Ok(None);
        };
        let src = decimals
            .decimals(request.chain, request.input_token)
            .await?;
        let dest = decimals
            .decimals(request.chain, request.output_token)
            .await?;
        Ok(Some((src, dest)))
    }
}

#[async_trait]
impl AggregatorSource for ParaSwapSource {
    fn id(&self) -> AggregatorId {
        AggregatorId::Paraswap
    }

    #[instrument(skip_all, fields(chain = %request.chain))]
    async fn quote(&self, request: &QuoteRequest) -> Result<Option<AggregatorQuote>, QuoteError> {
        if !Self::is_supported(request.chain) {
            debug!("UnsupportedChain");
            return Ok(None);
        }
        let network = request.chain.id();
        let (side, amount) = match request.amount {
            RequestedAmount::Spend(qty) => ("SELL", qty),
            RequestedAmount::Bought(qty) => ("BUY", qty),
        };

        let mut params = vec![
            ("srcToken", request.input_token.to_string()),
            ("destToken", request.output_token.to_string()),
            ("amount", amount.to_string()),
            ("side", side.to_string()),
            ("network", network.to_string()),
            ("excludeDEXS", "0x".to_string()),
            ("partner", PARTNER.to_string()),
        ];
        if let Some((src, dest)) = self.token_decimals(request).await? {
            params.push(("srcDecimals", src.to_string()));
            params.push(("destDecimals", dest.to_string()));
        }
        let prices_url = format!("{}/prices", self.base_url);
        trace!(url = %prices_url, ?params, "Sending ParaSwap prices request");
        let body = self
            .send(|| self.http.get(&prices_url).query(&params), "quote")
            .await?;
        let answer = serde_json::from_str::<PricesAnswer>(&body)
            .map_err(|err| QuoteError::ParseResponse(format!("Error: {err}, Body: {body}")))?;
        let route = serde_json::from_value::<PriceRoute>(answer.price_route.clone())
            .map_err(|err| QuoteError::ParseResponse(format!("Invalid price route: {err}")))?;

        let src_amount = parse_amount(&route.src_amount)?;
        let dest_amount = parse_amount(&route.dest_amount)?;
        // the non-fixed side carries the slippage
        let (src_limit, dest_limit) = match request.amount {
            RequestedAmount::Spend(_) => {
                (src_amount, mul_ratio(dest_amount, 1.0 - request.slippage))
            }
            RequestedAmount::Bought(_) => {
                (mul_ratio(src_amount, 1.0 + request.slippage), dest_amount)
            }
        };

        let tx_request = TransactionRequest {
            src_token: request.input_token,
            dest_token: request.output_token,
            src_amount: src_limit.to_string(),
            dest_amount: dest_limit.to_string(),
            price_route: &answer.price_route,
            user_address: self.user_address,
            partner: PARTNER,
            src_decimals: route.src_decimals,
            dest_decimals: route.dest_decimals,
        };
        let tx_url = format!("{}/transactions/{network}", self.base_url);
        let tx_params = [("ignoreChecks", "true"), ("ignoreGasEstimate", "true")];
        let body = self
            .send(
                || {
                    self.http
                        .post(&tx_url)
                        .query(&tx_params)
                        .json(&tx_request)
                },
                "transaction",
            )
            .await?;
        let tx = serde_json::from_str::<TransactionAnswer>(&body)
            .map_err(|err| QuoteError::ParseResponse(format!("Error: {err}, Body: {body}")))?;

        let decimals_shift = i32::from(route.src_decimals) - i32::from(route.dest_decimals);
        let price = display_price(src_amount, dest_amount, decimals_shift);
        let guaranteed_price = display_price(src_limit, dest_limit, decimals_shift);
        let estimated_price_impact =
            parse_float(&route.src_usd)? / parse_float(&route.dest_usd)? - 1.0;

        Ok(Some(AggregatorQuote {
            source_id: AggregatorId::Paraswap,
            price,
            guaranteed_price,
            buy_amount: dest_amount,
            sell_amount: src_amount,
            estimated_price_impact,
            encoded_call_fragment: tx.data,
            allowance_target: route.token_transfer_proxy,
        }))
    }
}

/// Output token units received per input token unit.
fn display_price(src: U256, dest: U256, decimals_shift: i32) -> f64 {
    if src.is_zero() {
        return 0.0;
    }
    amount_to_f64(dest) / amount_to_f64(src) * 10f64.powi(decimals_shift)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy_primitives::address;
    use mockito::{Matcher, Server};
    use nested_common::traits::MockTokenDecimals;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    const DAI: Address = address!("8f3cf7ad23cd3cadbd9735aff958023239c6a063");
    const USDC: Address = address!("2791bca1f2de4661ed88a30c99a7a9449aa84174");
    const PROXY: Address = address!("216b4b4ba9f3e719726886d34a177484278bfcae");

    fn source(url: String) -> ParaSwapSource {
        let config = ClientConfig { paraswap_api_url: url, ..Default::default() };
        ParaSwapSource::new(&config)
            .unwrap()
            .with_test_backoff_policy()
    }

    fn price_route(src_amount: &str, dest_amount: &str) -> String {
        json!({
            "priceRoute": {
                "srcAmount": src_amount,
                "destAmount": dest_amount,
                "srcUSD": "100",
                "destUSD": "80",
                "srcDecimals": 18,
                "destDecimals": 18,
                "tokenTransferProxy": PROXY,
                "bestRoute": []
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_sell_quote_applies_slippage_to_output() {
        let mut server = Server::new_async().await;
        let prices = server
            .mock("GET", "/prices")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("amount".into(), "1000".into()),
                Matcher::UrlEncoded("side".into(), "SELL".into()),
                Matcher::UrlEncoded("network".into(), "137".into()),
            ]))
            .with_status(200)
            .with_body(price_route("1000", "2000"))
            .create_async()
            .await;
        let tx = server
            .mock("POST", "/transactions/137")
            .match_query(Matcher::UrlEncoded("ignoreChecks".into(), "true".into()))
            .match_body(Matcher::PartialJson(json!({
                "srcAmount": "1000",
                "destAmount": "1000",
                "partner": "nested",
                "priceRoute": {"bestRoute": []}
            })))
            .with_status(200)
            .with_body(json!({"from": Address::ZERO, "data": "0xabcd"}).to_string())
            .create_async()
            .await;

        let quote = source(server.url())
            .quote(&QuoteRequest::spend(Chain::Poly, DAI, USDC, 0.5, U256::from(1000)))
            .await
            .unwrap()
            .unwrap();

        prices.assert();
        tx.assert();
        assert_eq!(quote.source_id, AggregatorId::Paraswap);
        assert_eq!(quote.buy_amount, U256::from(2000));
        assert_eq!(quote.sell_amount, U256::from(1000));
        assert_eq!(quote.price, 2.0);
        assert_eq!(quote.guaranteed_price, 1.0);
        assert_eq!(quote.estimated_price_impact, 0.25);
        assert_eq!(quote.encoded_call_fragment, Bytes::from_static(&[0xab, 0xcd]));
        assert_eq!(quote.allowance_target, PROXY);
    }

    #[tokio::test]
    async fn test_buy_quote_applies_slippage_to_input() {
        let mut server = Server::new_async().await;
        let _prices = server
            .mock("GET", "/prices")
            .match_query(Matcher::UrlEncoded("side".into(), "BUY".into()))
            .with_status(200)
            .with_body(price_route("1000", "500"))
            .create_async()
            .await;
        let tx = server
            .mock("POST", "/transactions/1")
            .match_query(Matcher::Any)
            .match_body(Matcher::PartialJson(json!({"srcAmount": "1250", "destAmount": "500"})))
            .with_status(200)
            .with_body(r#"{"data": "0x"}"#)
            .create_async()
            .await;

        let quote = source(server.url())
            .quote(&QuoteRequest::bought(Chain::Eth, DAI, USDC, 0.25, U256::from(500)))
            .await
            .unwrap()
            .unwrap();

        tx.assert();
        assert_eq!(quote.sell_amount, U256::from(1000));
        assert_eq!(quote.buy_amount, U256::from(500));
    }

    #[tokio::test]
    async fn test_no_liquidity() {
        let mut server = Server::new_async().await;
        let _prices = server
            .mock("GET", "/prices")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error": "No routes found with enough liquidity"}"#)
            .create_async()
            .await;

        let res = source(server.url())
            .quote(&QuoteRequest::spend(Chain::Poly, DAI, USDC, 0.03, U256::from(1000)))
            .await;

        assert_eq!(res, Err(QuoteError::InsufficientLiquidity));
    }

    #[tokio::test]
    async fn test_transaction_failure() {
        let mut server = Server::new_async().await;
        let _prices = server
            .mock("GET", "/prices")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(price_route("1000", "2000"))
            .create_async()
            .await;
        let _tx = server
            .mock("POST", "/transactions/137")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error": "Unable to build transaction"}"#)
            .create_async()
            .await;

        let res = source(server.url())
            .quote(&QuoteRequest::spend(Chain::Poly, DAI, USDC, 0.03, U256::from(1000)))
            .await;

        assert_eq!(
            res,
            Err(QuoteError::Unknown(
                "Failed to fetch ParaSwap transaction: Unable to build transaction".into()
            ))
        );
    }

    #[tokio::test]
    async fn test_sends_token_decimals() {
        let mut server = Server::new_async().await;
        let prices = server
            .mock("GET", "/prices")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("srcDecimals".into(), "18".into()),
                Matcher::UrlEncoded("destDecimals".into(), "6".into()),
            ]))
            .with_status(400)
            .with_body(r#"{"error": "No routes found with enough liquidity"}"#)
            .create_async()
            .await;
        let mut provider = MockTokenDecimals::new();
        provider
            .expect_decimals()
            .returning(|_, token| Ok(if *token == USDC { 6 } else { 18 }));
        let decimals =
            Arc::new(DecimalsCache::new(Arc::new(provider), 10, Duration::from_secs(60)));

        let res = source(server.url())
            .with_decimals(decimals)
            .quote(&QuoteRequest::spend(Chain::Poly, DAI, USDC, 0.03, U256::from(1000)))
            .await;

        prices.assert();
        assert_eq!(res, Err(QuoteError::InsufficientLiquidity));
    }

    #[tokio::test]
    async fn test_unsupported_chains_report_no_route() {
        let source = ParaSwapSource::new(&ClientConfig::default()).unwrap();

        for chain in [Chain::Celo, Chain::Ftm, Chain::Opti] {
            let res = source
                .quote(&QuoteRequest::spend(chain, DAI, USDC, 0.03, U256::from(1000)))
                .await;
            assert_eq!(res, Ok(None));
        }
    }

    #[test]
    fn test_display_price_accounts_for_decimals() {
        // 1 DAI (18 decimals) for 2 USDC (6 decimals)
        let price = display_price(
            U256::from(1_000_000_000_000_000_000u128),
            U256::from(2_000_000u64),
            12,
        );

        assert!((price - 2.0).abs() < 1e-9);
    }
}
