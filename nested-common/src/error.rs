use std::fmt::Display;

use thiserror::Error;

use crate::models::AggregatorId;

/// Failure reported by a single external collaborator (a price source, the decimals lookup or the
/// protocol fee rate lookup).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuoteError {
    /// The source understood the request but could not find enough liquidity to route it.
    #[error("Insufficient asset liquidity")]
    InsufficientLiquidity,
    #[error("Rate limited")]
    RateLimited,
    /// Errors forwarded from the transport layer (connection, timeout, unexpected status).
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Failed to parse response: {0}")]
    ParseResponse(String),
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl QuoteError {
    pub fn is_insufficient_liquidity(&self) -> bool {
        matches!(self, Self::InsufficientLiquidity)
    }
}

/// A failed attempt of one price source, kept so that callers can inspect every reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source: AggregatorId,
    pub error: QuoteError,
}

impl SourceFailure {
    pub fn new(source: AggregatorId, error: QuoteError) -> Self {
        Self { source, error }
    }
}

impl Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source, self.error)
    }
}

fn format_failures(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors surfaced to callers of order mutators and batch operations.
///
/// A superseded operation is not an error: mutators report it as `Ok(false)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    /// No enabled source could route the leg.
    #[error("No price source could route this order: insufficient liquidity")]
    InsufficientLiquidity,
    /// At least one source failed for a reason other than liquidity and none succeeded.
    #[error("All price sources failed: {}", format_failures(.0))]
    AggregatorFailure(Vec<SourceFailure>),
    /// Contradictory or unsupported input.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Failed to fetch token decimals: {0}")]
    Decimals(#[source] QuoteError),
    #[error("Failed to fetch protocol fee rate: {0}")]
    FeeRate(#[source] QuoteError),
    #[error("Operation is not yet ready (an order is still loading, or errored)")]
    NotSettled,
}

impl OrderError {
    pub fn is_insufficient_liquidity(&self) -> bool {
        matches!(self, Self::InsufficientLiquidity)
    }
}
