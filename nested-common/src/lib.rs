//! Shared building blocks of the Nested order quoting engine.
//!
//! This crate carries no I/O. It defines the models exchanged with price sources, the traits of
//! every external collaborator, and the two pieces of integer arithmetic the engine relies on:
//! protocol fee accounting ([`fees`]) and proportional budget allocation ([`budget`]).
pub mod budget;
pub mod error;
pub mod fees;
pub mod models;
pub mod traits;

pub use alloy_primitives::{Address, Bytes, U256};
