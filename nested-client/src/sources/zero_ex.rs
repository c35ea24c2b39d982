use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use nested_common::{
    error::QuoteError,
    models::{AggregatorId, AggregatorQuote, Chain, QuoteRequest, RequestedAmount},
    traits::AggregatorSource,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use tracing::{debug, instrument, trace};

use super::http::{parse_amount, parse_float, HttpClient, HttpError};
use crate::config::ClientConfig;

const INSUFFICIENT_LIQUIDITY: &str = "INSUFFICIENT_ASSET_LIQUIDITY";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZeroExAnswer {
    price: String,
    guaranteed_price: String,
    buy_amount: String,
    sell_amount: String,
    data: Bytes,
    allowance_target: Address,
    #[serde(default)]
    estimated_price_impact: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZeroExFailure {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    validation_errors: Vec<ValidationError>,
}

#[derive(Debug, Deserialize)]
struct ValidationError {
    reason: String,
}

/// Quotes from the 0x swap API.
pub struct ZeroExSource {
    http: HttpClient,
    url_override: Option<String>,
}

impl ZeroExSource {
    pub fn new(config: &ClientConfig) -> Result<Self, QuoteError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = config.zero_ex_api_key.as_deref() {
            let mut value = HeaderValue::from_str(key)
                .map_err(|e| QuoteError::Transport(format!("Invalid 0x api key format: {e}")))?;
            value.set_sensitive(true);
            headers.insert(HeaderName::from_static("0x-api-key"), value);
        }
        Ok(Self {
            http: HttpClient::new(config, headers)?,
            url_override: config.zero_ex_api_url.clone(),
        })
    }

    #[cfg(test)]
    fn with_test_backoff_policy(mut self) -> Self {
        self.http = self.http.with_test_backoff_policy();
        self
    }

    fn endpoint(&self, chain: Chain) -> Option<String> {
        if let Some(url) = self.url_override.as_deref() {
            return Some(url.trim_end_matches('/').to_string());
        }
        let url = match chain {
            Chain::Eth => "https://api.0x.org",
            Chain::Bsc => "https://bsc.api.0x.org",
            Chain::Avax => "https://avalanche.api.0x.org",
            Chain::Poly => "https://polygon.api.0x.org",
            Chain::Opti => "https://optimism.api.0x.org",
            Chain::Arbi => "https://arbitrum.api.0x.org",
            Chain::Ftm => "https://fantom.api.0x.org",
            Chain::Celo => return None,
        };
        Some(url.to_string())
    }

    fn parse_failure(body: &str) -> QuoteError {
        match serde_json::from_str::<ZeroExFailure>(body) {
            Ok(failure)
                if failure
                    .validation_errors
                    .iter()
                    .any(|e| e.reason == INSUFFICIENT_LIQUIDITY) =>
            {
                QuoteError::InsufficientLiquidity
            }
            Ok(failure) => {
                let reason = failure
                    .validation_errors
                    .first()
                    .map(|e| e.reason.clone())
                    .or(failure.reason)
                    .unwrap_or_else(|| "Unknown error".to_string());
                QuoteError::Unknown(format!("Failed to fetch 0x quote: {reason}"))
            }
            Err(_) => QuoteError::Unknown(format!("Failed to fetch 0x quote: {body}")),
        }
    }

    fn to_quote(answer: ZeroExAnswer) -> Result<AggregatorQuote, QuoteError> {
        Ok(AggregatorQuote {
            source_id: AggregatorId::ZeroEx,
            price: parse_float(&answer.price)?,
            guaranteed_price: parse_float(&answer.guaranteed_price)?,
            buy_amount: parse_amount(&answer.buy_amount)?,
            sell_amount: parse_amount(&answer.sell_amount)?,
            estimated_price_impact: answer
                .estimated_price_impact
                .as_deref()
                .map(parse_float)
                .transpose()?
                .unwrap_or_default(),
            encoded_call_fragment: answer.data,
            allowance_target: answer.allowance_target,
        })
    }
}

#[async_trait]
impl AggregatorSource for ZeroExSource {
    fn id(&self) -> AggregatorId {
        AggregatorId::ZeroEx
    }

    #[instrument(skip_all, fields(chain = %request.chain))]
    async fn quote(&self, request: &QuoteRequest) -> Result<Option<AggregatorQuote>, QuoteError> {
        let Some(endpoint) = self.endpoint(request.chain) else {
            debug!("UnsupportedChain");
            return Ok(None);
        };
        let url = format!("{endpoint}/swap/v1/quote");
        let amount = match request.amount {
            RequestedAmount::Spend(qty) => ("sellAmount", qty.to_string()),
            RequestedAmount::Bought(qty) => ("buyAmount", qty.to_string()),
        };
        let params = [
            ("sellToken", request.input_token.to_string()),
            ("buyToken", request.output_token.to_string()),
            (amount.0, amount.1),
            ("slippagePercentage", request.slippage.to_string()),
        ];
        trace!(%url, ?params, "Sending 0x quote request");

        let body = match self
            .http
            .send(|| self.http.get(&url).query(&params))
            .await
        {
            Ok(body) => body,
            Err(HttpError::Status(status, body)) if status.is_client_error() => {
                return Err(Self::parse_failure(&body));
            }
            Err(e) => return Err(e.into()),
        };

        let answer = serde_json::from_str::<ZeroExAnswer>(&body)
            .map_err(|err| QuoteError::ParseResponse(format!("Error: {err}, Body: {body}")))?;
        Self::to_quote(answer).map(Some)
    }
}
