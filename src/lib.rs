//! Resumable, single-flight account synchronization for ledger explorers.
//!
//! Per-chain explorer clients fetch remote ledger data; per-account synchronizers turn it into a
//! locally persisted, deduplicated log of canonical SEND/RECEIVE operations that balance and
//! history queries replay.

pub mod config;
pub mod explorer;
pub mod utils;
pub mod wallet;
