use crate::config::SyncConfig;
use crate::explorer::{
	AccountInfo, ExplorerError, LedgerExplorer, Page, PagingCompletenessGuard, Transaction,
};
use crate::wallet::sync::materializer::OperationMaterializer;
use crate::wallet::{Account, Operation};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Independent paged history feeds a chain may expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feed {
	/// Self-describing transactions
	Transactions,
	/// Ledger effects grouped per transaction
	Operations,
}

/// Per-chain access used by the synchronizer.
///
/// The synchronizer drives every feed returned by `feeds` in order, resuming each from its own
/// persisted cursor. Implementations must hand back pages that can be consumed whole: once a page is
/// committed, `next_cursor` of that page must not skip anything that was not in it.
#[async_trait::async_trait]
pub trait ChainAdapter: Send + Sync {
	/// Get the name of this adapter
	fn name(&self) -> &'static str;

	/// Feeds to synchronize, in order
	fn feeds(&self) -> &[Feed];

	async fn get_account(&self, account: &Account) -> Result<AccountInfo, ExplorerError>;

	/// Fetch the page following `cursor` (from genesis when `None`)
	async fn fetch_page(
		&self,
		account: &Account,
		feed: Feed,
		cursor: Option<&str>,
	) -> Result<Page<Transaction>, ExplorerError>;

	/// Cursor to resume from once `page` is committed
	fn next_cursor(&self, feed: Feed, page: &Page<Transaction>) -> Option<String>;

	fn materialize(&self, account: &Account, transaction: &Transaction) -> Vec<Operation> {
		OperationMaterializer::new().materialize(account, transaction)
	}

	/// Whether `AccountNotFound` from `get_account` proves the account has no history.
	///
	/// True for account-based ledgers. Adapters watching several addresses must return false: the
	/// own address may be unused while other watched addresses hold history.
	fn unknown_account_has_no_history(&self) -> bool {
		true
	}
}

/// Adapter for account-based ledgers paging each feed by an opaque token
pub struct PagingTokenAdapter<E: LedgerExplorer + ?Sized> {
	explorer: Arc<E>,
	feeds: Vec<Feed>,
}

impl<E: LedgerExplorer + ?Sized> PagingTokenAdapter<E> {
	pub fn new(explorer: Arc<E>, feeds: Vec<Feed>) -> Self {
		Self { explorer, feeds }
	}

	/// Adapter driving the transactions feed only
	pub fn transactions_only(explorer: Arc<E>) -> Self {
		Self::new(explorer, vec![Feed::Transactions])
	}
}

#[async_trait::async_trait]
impl<E: LedgerExplorer + ?Sized> ChainAdapter for PagingTokenAdapter<E> {
	fn name(&self) -> &'static str {
		"PagingTokenAdapter"
	}

	fn feeds(&self) -> &[Feed] {
		&self.feeds
	}

	async fn get_account(&self, account: &Account) -> Result<AccountInfo, ExplorerError> {
		self.explorer
			.get_account(account.keychain.own_address())
			.await
	}

	async fn fetch_page(
		&self,
		account: &Account,
		feed: Feed,
		cursor: Option<&str>,
	) -> Result<Page<Transaction>, ExplorerError> {
		let address = account.keychain.own_address();
		debug!("Fetching {:?} page of {} after {:?}", feed, address, cursor);
		match feed {
			Feed::Transactions => {
				self.explorer
					.get_account_transactions(address, cursor)
					.await
			}
			Feed::Operations => self.explorer.get_operations(address, cursor).await,
		}
	}

	fn next_cursor(&self, _feed: Feed, page: &Page<Transaction>) -> Option<String> {
		page.next_cursor.clone().or_else(|| {
			page.items
				.last()
				.and_then(|tx| tx.paging_token.clone())
		})
	}
}

/// Adapter for explorers paging an address set by block hash
pub struct BlockHashAdapter<E: LedgerExplorer + ?Sized> {
	explorer: Arc<E>,
	guard: PagingCompletenessGuard,
}

impl<E: LedgerExplorer + ?Sized> BlockHashAdapter<E> {
	pub fn new(explorer: Arc<E>, guard: PagingCompletenessGuard) -> Self {
		Self { explorer, guard }
	}

	pub fn with_config(explorer: Arc<E>, config: &SyncConfig) -> Self {
		Self::new(
			explorer,
			PagingCompletenessGuard::new(
				config.batch_size,
				config.batch_increment,
				config.max_batch_size,
			),
		)
	}
}

#[async_trait::async_trait]
impl<E: LedgerExplorer + ?Sized> ChainAdapter for BlockHashAdapter<E> {
	fn name(&self) -> &'static str {
		"BlockHashAdapter"
	}

	fn feeds(&self) -> &[Feed] {
		&[Feed::Transactions]
	}

	async fn get_account(&self, account: &Account) -> Result<AccountInfo, ExplorerError> {
		self.explorer
			.get_account(account.keychain.own_address())
			.await
	}

	async fn fetch_page(
		&self,
		account: &Account,
		feed: Feed,
		cursor: Option<&str>,
	) -> Result<Page<Transaction>, ExplorerError> {
		match feed {
			Feed::Transactions => {
				self.guard
					.fetch(self.explorer.as_ref(), &account.keychain.addresses(), cursor)
					.await
			}
			Feed::Operations => Ok(Page::empty()),
		}
	}

	fn unknown_account_has_no_history(&self) -> bool {
		false
	}

	/// Hash of the last confirmed block in the page
	fn next_cursor(&self, _feed: Feed, page: &Page<Transaction>) -> Option<String> {
		page.items
			.iter()
			.rev()
			.find_map(|tx| tx.block_hash())
			.map(str::to_string)
	}
}
