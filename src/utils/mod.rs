//!
//! Utility module for the ledger synchronizer.
//!
//! Re-exports amount formatting helpers used by the binary and the balance history output.
/// Utility functions for formatting and display
pub mod index;

pub use index::{format_signed_amount, format_token_amount};
