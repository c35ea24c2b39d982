use std::time::Duration;

#[cfg(test)]
use backoff::exponential::ExponentialBackoffBuilder;
use backoff::ExponentialBackoff;
use nested_common::error::QuoteError;
use reqwest::{header, Client, ClientBuilder, RequestBuilder, StatusCode};
use thiserror::Error;
use tracing::{debug, trace};

use crate::config::ClientConfig;

#[derive(Error, Debug)]
pub(crate) enum HttpError {
    #[error("Rate limited")]
    RateLimited(Option<Duration>),
    #[error("Server unreachable: {0}")]
    ServerUnreachable(String),
    #[error("Unexpected status {0}: {1}")]
    Status(StatusCode, String),
    #[error("Http client error: {0}")]
    Client(String),
}

impl From<HttpError> for QuoteError {
    fn from(value: HttpError) -> Self {
        match value {
            HttpError::RateLimited(_) => QuoteError::RateLimited,
            HttpError::ServerUnreachable(msg) | HttpError::Client(msg) => {
                QuoteError::Transport(msg)
            }
            HttpError::Status(status, body) => QuoteError::Unknown(format!("{status}: {body}")),
        }
    }
}

/// Thin JSON-over-HTTP client shared by the price sources.
///
/// Rate limits and gateway errors are retried with an exponential backoff, every other failure is
/// returned right away.
#[derive(Debug, Clone)]
pub(crate) struct HttpClient {
    client: Client,
    backoff_policy: ExponentialBackoff,
}

impl HttpClient {
    pub(crate) fn new(
        config: &ClientConfig,
        extra_headers: header::HeaderMap,
    ) -> Result<Self, QuoteError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        let user_agent = format!("nested-client-{version}", version = env!("CARGO_PKG_VERSION"));
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_str(&user_agent)
                .map_err(|e| QuoteError::Transport(format!("Invalid user agent format: {e}")))?,
        );
        headers.extend(extra_headers);

        let client = ClientBuilder::new()
            .default_headers(headers)
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| QuoteError::Transport(e.to_string()))?;
        Ok(Self { client, backoff_policy: config.retry.policy() })
    }

    #[cfg(test)]
    pub(crate) fn with_test_backoff_policy(mut self) -> Self {
        self.backoff_policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(1))
            .with_multiplier(1.1)
            .with_max_interval(Duration::from_millis(5))
            .with_max_elapsed_time(Some(Duration::from_millis(50)))
            .build();
        self
    }

    pub(crate) fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }

    pub(crate) fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url)
    }

    /// Raises an error if the status code is 429, 502, 503 or 504. In the 429 case the
    /// retry-after header, if any, is passed along.
    async fn error_for_response(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, HttpError> {
        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|h| h.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(HttpError::RateLimited(retry_after))
            }
            StatusCode::BAD_GATEWAY |
            StatusCode::SERVICE_UNAVAILABLE |
            StatusCode::GATEWAY_TIMEOUT => Err(HttpError::ServerUnreachable(
                response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Server Unreachable".to_string()),
            )),
            _ => Ok(response),
        }
    }

    fn handle_error_for_backoff(e: HttpError) -> backoff::Error<HttpError> {
        match e {
            HttpError::RateLimited(Some(duration)) => backoff::Error::retry_after(e, duration),
            HttpError::RateLimited(None) | HttpError::ServerUnreachable(_) => e.into(),
            _ => backoff::Error::permanent(e),
        }
    }

    /// Sends the request built by `make_request` and returns the body of a successful response.
    ///
    /// Non-success statuses that are not retried come back as [`HttpError::Status`] so that
    /// callers can inspect the body.
    pub(crate) async fn send<F>(&self, make_request: F) -> Result<String, HttpError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let make_request = &make_request;
        backoff::future::retry(self.backoff_policy.clone(), || async {
            let response = make_request()
                .send()
                .await
                .map_err(|e| backoff::Error::permanent(HttpError::Client(e.to_string())))?;
            trace!(status = %response.status(), url = %response.url(), "ReceivedResponse");

            let response = self
                .error_for_response(response)
                .await
                .map_err(|e| {
                    debug!(error = %e, "RetryableHttpError");
                    Self::handle_error_for_backoff(e)
                })?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| backoff::Error::permanent(HttpError::Client(e.to_string())))?;
            if !status.is_success() {
                return Err(backoff::Error::permanent(HttpError::Status(status, body)));
            }
            Ok(body)
        })
        .await
    }
}

/// Parses a decimal integer amount as returned by the aggregator APIs.
pub(crate) fn parse_amount(value: &str) -> Result<alloy_primitives::U256, QuoteError> {
    alloy_primitives::U256::from_str_radix(value, 10)
        .map_err(|e| QuoteError::ParseResponse(format!("Invalid amount {value}: {e}")))
}

pub(crate) fn parse_float(value: &str) -> Result<f64, QuoteError> {
    value
        .parse::<f64>()
        .map_err(|e| QuoteError::ParseResponse(format!("Invalid number {value}: {e}")))
}

/// Lossy conversion of an integer amount, used for display prices only.
pub(crate) fn amount_to_f64(value: alloy_primitives::U256) -> f64 {
    value
        .to_string()
        .parse::<f64>()
        .unwrap_or(f64::MAX)
}

#[cfg(test)]
mod tests {
    use mockito::Server;

    use super::*;

    fn client() -> HttpClient {
        HttpClient::new(&ClientConfig::default(), header::HeaderMap::new())
            .unwrap()
            .with_test_backoff_policy()
    }

    #[tokio::test]
    async fn test_send_returns_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/ok")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let client = client();
        let url = format!("{}/ok", server.url());

        let body = client
            .send(|| client.get(&url))
            .await
            .unwrap();

        mock.assert();
        assert_eq!(body, "{}");
    }

    #[tokio::test]
    async fn test_send_retries_server_errors() {
        let mut server = Server::new_async().await;
        let failing = server
            .mock("GET", "/flaky")
            .with_status(503)
            .expect_at_least(2)
            .create_async()
            .await;
        let client = client();
        let url = format!("{}/flaky", server.url());

        let res = client.send(|| client.get(&url)).await;

        failing.assert();
        assert!(matches!(res, Err(HttpError::ServerUnreachable(_))));
    }

    #[tokio::test]
    async fn test_send_does_not_retry_client_errors() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/bad")
            .with_status(400)
            .with_body("nope")
            .expect(1)
            .create_async()
            .await;
        let client = client();
        let url = format!("{}/bad", server.url());

        let res = client.send(|| client.get(&url)).await;

        mock.assert();
        match res {
            Err(HttpError::Status(status, body)) => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(body, "nope");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_quote_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/limited")
            .with_status(429)
            .create_async()
            .await;
        let client = client();
        let url = format!("{}/limited", server.url());

        let res = client.send(|| client.get(&url)).await;

        let err: QuoteError = res.unwrap_err().into();
        assert_eq!(err, QuoteError::RateLimited);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1000").unwrap(), alloy_primitives::U256::from(1000));
        assert!(matches!(parse_amount("0x10"), Err(QuoteError::ParseResponse(_))));
    }
}
