//! Witness chain: a tamper-evident log of store mutations.
//!
//! See [`chain::WitnessChain`] for the append/verify API and
//! [`chain::WitnessEntry`] for the on-disk entry layout.

pub mod chain;

pub use chain::{VerifyReport, WitnessChain, WitnessEntry, WitnessOp, ENTRY_SIZE, GENESIS_HASH};
