use std::{fs::File, io::Read, time::Duration};

use alloy_primitives::Address;
use backoff::{exponential::ExponentialBackoffBuilder, ExponentialBackoff};
use nested_common::models::AggregatorId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(String, #[source] std::io::Error),
    #[error("Failed to parse config file {0}: {1}")]
    Parse(String, #[source] serde_yaml::Error),
}

/// Exponential backoff applied by the HTTP price sources on rate limits and gateway errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_ms: u64,
    /// Give up once all retries took longer than this.
    pub max_elapsed_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 250,
            multiplier: 1.75,
            max_interval_ms: 2_000,
            max_elapsed_ms: 10_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_interval_ms))
            .with_multiplier(self.multiplier)
            .with_max_interval(Duration::from_millis(self.max_interval_ms))
            .with_max_elapsed_time(Some(Duration::from_millis(self.max_elapsed_ms)))
            .build()
    }
}

/// Settings of a quoting session.
///
/// Every field has a default so a YAML file only needs to list what it overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Quiet window merging bursts of changes on a leg into one quote request.
    pub coalescing_window_ms: u64,
    /// Price sources left out of the competition.
    pub excluded_aggregators: Vec<AggregatorId>,
    pub decimals_cache_capacity: u64,
    pub decimals_cache_ttl_secs: u64,
    /// Overrides the per-chain 0x endpoint (all chains then share this URL).
    pub zero_ex_api_url: Option<String>,
    pub zero_ex_api_key: Option<String>,
    pub paraswap_api_url: String,
    /// Address the ParaSwap transactions are built for.
    pub user_address: Option<Address>,
    pub http_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            coalescing_window_ms: 30,
            excluded_aggregators: Vec::new(),
            decimals_cache_capacity: 10_000,
            decimals_cache_ttl_secs: 24 * 3600,
            zero_ex_api_url: None,
            zero_ex_api_key: None,
            paraswap_api_url: "https://apiv5.paraswap.io".to_string(),
            user_address: None,
            http_timeout_secs: 30,
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_yaml(path: &str) -> Result<Self, ConfigError> {
        let mut file = File::open(path).map_err(|e| ConfigError::Io(path.to_string(), e))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ConfigError::Io(path.to_string(), e))?;
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_string(), e))
    }

    pub fn coalescing_window(&self) -> Duration {
        Duration::from_millis(self.coalescing_window_ms)
    }

    pub fn decimals_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.decimals_cache_ttl_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn is_enabled(&self, aggregator: AggregatorId) -> bool {
        !self
            .excluded_aggregators
            .contains(&aggregator)
    }
}
