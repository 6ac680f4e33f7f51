//! Ledger explorer integration module
//!
//! This module provides the capability interface every supported chain implements to expose its
//! remote ledger data, the shared data types, the completeness guard used when paging by block
//! hash, and an HTTP/WebSocket client for JSON explorers.

/// HTTP and WebSocket client for JSON ledger explorers
mod client;
/// Block-boundary completeness guard for transaction paging
pub mod paging_guard;
/// Type definitions for explorer data structures
mod types;

pub use client::HttpLedgerExplorer;
pub use paging_guard::PagingCompletenessGuard;
pub use types::*;

/// Remote ledger access for one chain.
///
/// All paged methods return items oldest-first. `get_transactions` pages by block hash: it returns
/// transactions touching any of `addresses` in blocks strictly after `from_block_hash` (from genesis
/// when `None`), at most `batch_size` of them, and only cuts a block in the middle when that block
/// alone does not fit in the batch. Account feeds (`get_account_transactions`,
/// `get_operations`) page by an opaque cursor and never split a transaction across pages.
#[async_trait::async_trait]
pub trait LedgerExplorer: Send + Sync {
	/// Fails with `AccountNotFound` when the chain has never seen `address`.
	async fn get_account(&self, address: &str) -> Result<AccountInfo, ExplorerError>;

	async fn get_transactions(
		&self,
		addresses: &[String],
		from_block_hash: Option<&str>,
		batch_size: u32,
	) -> Result<Page<Transaction>, ExplorerError>;

	async fn get_account_transactions(
		&self,
		address: &str,
		cursor: Option<&str>,
	) -> Result<Page<Transaction>, ExplorerError>;

	/// Ledger effects grouped per transaction, for chains whose transactions are not
	/// self-describing enough to derive operations from.
	async fn get_operations(
		&self,
		address: &str,
		cursor: Option<&str>,
	) -> Result<Page<Transaction>, ExplorerError>;

	async fn get_current_block(&self) -> Result<Block, ExplorerError>;

	async fn get_fee_estimate(&self) -> Result<FeeStats, ExplorerError>;

	/// Returns the transaction identifier assigned by the chain.
	async fn broadcast(&self, raw_tx: &[u8]) -> Result<String, ExplorerError>;
}
