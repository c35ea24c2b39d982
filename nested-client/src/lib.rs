//! Pricing and assembly of Nested portfolio orders.
//!
//! A [`Session`] holds the collaborators of one chain (price sources, decimals lookup, fee rate
//! lookup, order encoder). Operations such as [`Session::deposit`] create batches of
//! [`OrderLeg`]s. Each leg quotes itself against every enabled source, keeps the best answer and
//! converges to the result of its latest mutation even when quotes land out of order.
pub mod batch;
pub mod cache;
pub mod cli;
pub mod coalescer;
pub mod config;
pub mod decimals;
pub mod encoder;
pub mod operations;
pub mod order;
pub mod selector;
pub mod session;
pub mod sources;

#[cfg(test)]
mod testing;

pub use batch::{BatchKind, LegBatch};
pub use config::ClientConfig;
pub use operations::{Deposit, Liquidation, MultiToSingleSwap, PortfolioSwap, Withdrawal};
pub use order::{LegState, OrderLeg};
pub use session::{Session, SessionBuilder, SessionError};
