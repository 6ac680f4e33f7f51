#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use ledger_sync::config::SyncConfig;
use ledger_sync::explorer::{
	AccountInfo, Block, BlockRef, ExplorerError, FeeStats, LedgerExplorer, Page, SubOperation,
	SubOperationKind, Transaction,
};
use ledger_sync::wallet::sync::repositories::{
	InMemoryOperationStore, InMemoryPreferencesRepository, OperationFilter, OperationStore,
};
use ledger_sync::wallet::sync::state_persistence::{StatePersistenceService, SyncState};
use ledger_sync::wallet::sync::strategies::{
	BlockHashAdapter, ChainAdapter, Feed, PagingTokenAdapter,
};
use ledger_sync::wallet::{
	Account, AccountSynchronizer, Operation, SingleAddressKeychain, StoreError, SynchronizerHandle,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

pub const ACCOUNT: &str = "account-1";
pub const OWN: &str = "GOWN";
pub const PEER: &str = "GPEER";

pub fn at(day: u64) -> DateTime<Utc> {
	Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day as i64)
}

pub fn payment(id: &str, source: Option<&str>, destination: &str, amount: u128) -> SubOperation {
	SubOperation {
		id: id.into(),
		kind: SubOperationKind::Payment,
		source: source.map(str::to_string),
		destination: Some(destination.into()),
		amount,
	}
}

pub fn non_value(id: &str, source: Option<&str>) -> SubOperation {
	SubOperation {
		id: id.into(),
		kind: SubOperationKind::SetOptions,
		source: source.map(str::to_string),
		destination: None,
		amount: 0,
	}
}

/// Transaction `n`, dated day `n`, in its own block at height `n`.
pub fn tx(n: u64, source: &str, fee: u128, sub_operations: Vec<SubOperation>) -> Transaction {
	Transaction {
		hash: format!("tx{}", n),
		paging_token: Some(n.to_string()),
		timestamp: at(n),
		block: Some(BlockRef {
			hash: format!("block{}", n),
			height: n,
		}),
		source: source.into(),
		fee,
		successful: true,
		sub_operations,
	}
}

/// Alternating incoming (1000) and outgoing (100, fee 10) payments, one operation each.
pub fn history(count: u64) -> Vec<Transaction> {
	(1..=count)
		.map(|n| {
			if n % 2 == 1 {
				tx(n, PEER, 1, vec![payment("1", None, OWN, 1000)])
			} else {
				tx(n, OWN, 10, vec![payment("1", None, PEER, 100)])
			}
		})
		.collect()
}

/// Incoming payments grouped in blocks of the given sizes.
pub fn blocks(sizes: &[usize]) -> Vec<Transaction> {
	let mut transactions = Vec::new();
	for (index, size) in sizes.iter().enumerate() {
		let height = index as u64 + 1;
		for position in 0..*size {
			transactions.push(Transaction {
				hash: format!("b{}-tx{}", height, position),
				paging_token: None,
				timestamp: at(height),
				block: Some(BlockRef {
					hash: format!("b{}", height),
					height,
				}),
				source: PEER.into(),
				fee: 1,
				successful: true,
				sub_operations: vec![payment("1", None, OWN, 10)],
			});
		}
	}
	transactions
}

/// In-memory explorer serving a fixed history.
///
/// Account feeds page by `paging_token`; the address feed pages by block hash and returns whole
/// blocks while they fit in the batch. Fetches can be made to fail or to wait on a gate from a
/// given fetch number on.
pub struct ScriptedExplorer {
	account: Option<AccountInfo>,
	transactions: Mutex<Vec<Transaction>>,
	page_size: usize,
	fail_from_fetch: Mutex<Option<usize>>,
	hold_from_fetch: Mutex<Option<usize>>,
	gate: watch::Sender<bool>,
	fetches: AtomicUsize,
	requests: Mutex<Vec<Option<String>>>,
}

impl ScriptedExplorer {
	pub fn new(transactions: Vec<Transaction>) -> Self {
		let (gate, _) = watch::channel(true);
		Self {
			account: Some(AccountInfo {
				address: OWN.into(),
				sequence: 1,
				balance: 0,
				subentry_count: 0,
			}),
			transactions: Mutex::new(transactions),
			page_size: 2,
			fail_from_fetch: Mutex::new(None),
			hold_from_fetch: Mutex::new(None),
			gate,
			fetches: AtomicUsize::new(0),
			requests: Mutex::new(Vec::new()),
		}
	}

	pub fn with_page_size(mut self, page_size: usize) -> Self {
		self.page_size = page_size;
		self
	}

	pub fn unfunded(mut self) -> Self {
		self.account = None;
		self
	}

	/// Fetch number `n` (1-based) and every later one fail with a network error.
	pub fn fail_from_fetch(&self, n: Option<usize>) {
		*self.fail_from_fetch.lock().unwrap() = n;
	}

	/// Fetch number `n` and every later one wait until `open_gate`.
	pub fn hold_from_fetch(&self, n: usize) {
		*self.hold_from_fetch.lock().unwrap() = Some(n);
		self.gate.send_replace(false);
	}

	/// Replace the served history, as a chain reorganization would.
	pub fn reorganize(&self, transactions: Vec<Transaction>) {
		*self.transactions.lock().unwrap() = transactions;
	}

	pub fn open_gate(&self) {
		self.gate.send_replace(true);
	}

	pub fn fetches(&self) -> usize {
		self.fetches.load(Ordering::SeqCst)
	}

	/// Cursor of every fetch, in order.
	pub fn requests(&self) -> Vec<Option<String>> {
		self.requests.lock().unwrap().clone()
	}

	async fn before_fetch(&self, cursor: Option<&str>) -> Result<(), ExplorerError> {
		let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
		self.requests.lock().unwrap().push(cursor.map(str::to_string));

		let hold = self.hold_from_fetch.lock().unwrap().is_some_and(|from| n >= from);
		if hold {
			let mut open = self.gate.subscribe();
			let _ = open.wait_for(|open| *open).await;
		}

		if self.fail_from_fetch.lock().unwrap().is_some_and(|from| n >= from) {
			return Err(ExplorerError::Network("connection reset".into()));
		}
		Ok(())
	}

	fn token_page(&self, cursor: Option<&str>) -> Result<Page<Transaction>, ExplorerError> {
		let transactions = self.transactions.lock().unwrap();
		let start = match cursor {
			None => 0,
			Some(cursor) => {
				transactions
					.iter()
					.position(|tx| tx.paging_token.as_deref() == Some(cursor))
					.ok_or_else(|| ExplorerError::Api {
						status: 400,
						message: format!("invalid cursor {}", cursor),
					})? + 1
			}
		};
		let items: Vec<Transaction> = transactions
			.iter()
			.skip(start)
			.take(self.page_size)
			.cloned()
			.collect();
		Ok(Page {
			has_next: start + items.len() < transactions.len(),
			items,
			next_cursor: None,
		})
	}

	fn block_page(
		&self,
		from_block_hash: Option<&str>,
		batch_size: u32,
	) -> Result<Page<Transaction>, ExplorerError> {
		let transactions = self.transactions.lock().unwrap();
		let start = match from_block_hash {
			None => 0,
			Some(hash) => {
				let last = transactions
					.iter()
					.rposition(|tx| tx.block_hash() == Some(hash))
					.ok_or_else(|| ExplorerError::Api {
						status: 404,
						message: format!("unknown block {}", hash),
					})?;
				last + 1
			}
		};

		let batch = batch_size as usize;
		let mut items: Vec<Transaction> = Vec::new();
		let remaining = &transactions[start..];
		let mut index = 0;
		while index < remaining.len() {
			let block = remaining[index].block_hash();
			let size = remaining[index..]
				.iter()
				.take_while(|tx| tx.block_hash() == block)
				.count();
			if items.len() + size > batch {
				if items.is_empty() {
					items.extend(remaining[index..index + batch].iter().cloned());
				}
				break;
			}
			items.extend(remaining[index..index + size].iter().cloned());
			index += size;
		}

		Ok(Page {
			has_next: start + items.len() < transactions.len(),
			items,
			next_cursor: None,
		})
	}
}

#[async_trait::async_trait]
impl LedgerExplorer for ScriptedExplorer {
	async fn get_account(&self, address: &str) -> Result<AccountInfo, ExplorerError> {
		self.account
			.clone()
			.ok_or_else(|| ExplorerError::AccountNotFound(address.into()))
	}

	async fn get_transactions(
		&self,
		_addresses: &[String],
		from_block_hash: Option<&str>,
		batch_size: u32,
	) -> Result<Page<Transaction>, ExplorerError> {
		self.before_fetch(from_block_hash).await?;
		self.block_page(from_block_hash, batch_size)
	}

	async fn get_account_transactions(
		&self,
		_address: &str,
		cursor: Option<&str>,
	) -> Result<Page<Transaction>, ExplorerError> {
		self.before_fetch(cursor).await?;
		self.token_page(cursor)
	}

	async fn get_operations(
		&self,
		_address: &str,
		cursor: Option<&str>,
	) -> Result<Page<Transaction>, ExplorerError> {
		self.before_fetch(cursor).await?;
		self.token_page(cursor)
	}

	async fn get_current_block(&self) -> Result<Block, ExplorerError> {
		let last = self
			.transactions
			.lock()
			.unwrap()
			.last()
			.and_then(|tx| tx.block.clone())
			.unwrap_or(BlockRef {
				hash: "genesis".into(),
				height: 0,
			});
		Ok(Block {
			hash: last.hash,
			height: last.height,
			time: Utc::now(),
		})
	}

	async fn get_fee_estimate(&self) -> Result<FeeStats, ExplorerError> {
		Ok(FeeStats {
			last_base_fee: 100,
			min_fee: 100,
			mode_fee: 100,
			max_fee: 100,
		})
	}

	async fn broadcast(&self, raw_tx: &[u8]) -> Result<String, ExplorerError> {
		Ok(hex::encode(raw_tx))
	}
}

/// Operation store whose `commit_page` fails from the n-th call on.
pub struct FailingStore {
	inner: InMemoryOperationStore,
	commits: AtomicUsize,
	fail_from_commit: usize,
}

impl FailingStore {
	pub fn new(fail_from_commit: usize) -> Self {
		Self {
			inner: InMemoryOperationStore::new(),
			commits: AtomicUsize::new(0),
			fail_from_commit,
		}
	}
}

#[async_trait::async_trait]
impl OperationStore for FailingStore {
	async fn upsert_if_absent(&self, operation: &Operation) -> Result<bool, StoreError> {
		self.inner.upsert_if_absent(operation).await
	}

	async fn commit_page(
		&self,
		account_uid: &str,
		operations: &[Operation],
	) -> Result<usize, StoreError> {
		let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
		if n >= self.fail_from_commit {
			return Err(StoreError::Backend("disk full".into()));
		}
		self.inner.commit_page(account_uid, operations).await
	}

	async fn delete_since(
		&self,
		account_uid: &str,
		since: DateTime<Utc>,
	) -> Result<usize, StoreError> {
		self.inner.delete_since(account_uid, since).await
	}

	async fn query(
		&self,
		account_uid: &str,
		filter: &OperationFilter,
	) -> Result<Vec<Operation>, StoreError> {
		self.inner.query(account_uid, filter).await
	}
}

/// Shared stores and explorer; every `spawn_*` call models a fresh process over the same data.
pub struct Harness {
	pub explorer: Arc<ScriptedExplorer>,
	pub store: Arc<InMemoryOperationStore>,
	pub preferences: Arc<InMemoryPreferencesRepository>,
	pub config: SyncConfig,
}

impl Harness {
	pub fn new(explorer: ScriptedExplorer) -> Self {
		Self {
			explorer: Arc::new(explorer),
			store: Arc::new(InMemoryOperationStore::new()),
			preferences: Arc::new(InMemoryPreferencesRepository::new()),
			config: SyncConfig::default(),
		}
	}

	pub fn account(&self) -> Account {
		Account::new(ACCOUNT, Arc::new(SingleAddressKeychain::new(OWN)))
	}

	pub fn persistence(&self) -> Arc<StatePersistenceService> {
		Arc::new(StatePersistenceService::new(self.preferences.clone()))
	}

	pub fn spawn_with(
		&self,
		adapter: Arc<dyn ChainAdapter>,
		store: Arc<dyn OperationStore + Send + Sync>,
	) -> SynchronizerHandle {
		AccountSynchronizer::new(
			self.account(),
			adapter,
			store,
			self.persistence(),
			self.config.clone(),
		)
		.spawn()
	}

	/// Paging-token synchronizer over the transactions feed.
	pub fn spawn_paging(&self) -> SynchronizerHandle {
		self.spawn_with(
			Arc::new(PagingTokenAdapter::transactions_only(self.explorer.clone())),
			self.store.clone(),
		)
	}

	pub fn spawn_both_feeds(&self) -> SynchronizerHandle {
		self.spawn_with(
			Arc::new(PagingTokenAdapter::new(
				self.explorer.clone(),
				vec![Feed::Transactions, Feed::Operations],
			)),
			self.store.clone(),
		)
	}

	/// Block-hash synchronizer going through the completeness guard.
	pub fn spawn_block_hash(&self) -> SynchronizerHandle {
		self.spawn_block_hash_for(self.account())
	}

	pub fn spawn_block_hash_for(&self, account: Account) -> SynchronizerHandle {
		AccountSynchronizer::new(
			account,
			Arc::new(BlockHashAdapter::with_config(
				self.explorer.clone(),
				&self.config,
			)),
			self.store.clone(),
			self.persistence(),
			self.config.clone(),
		)
		.spawn()
	}

	pub async fn operations(&self) -> Vec<Operation> {
		self.store
			.query(ACCOUNT, &OperationFilter::all())
			.await
			.unwrap()
	}

	pub async fn state(&self) -> Option<SyncState> {
		self.persistence().load_state(ACCOUNT).await.unwrap()
	}
}

pub fn uids(operations: &[Operation]) -> Vec<String> {
	let mut uids: Vec<String> = operations.iter().map(|op| op.uid.clone()).collect();
	uids.sort();
	uids
}
