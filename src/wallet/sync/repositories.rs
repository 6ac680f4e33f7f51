use crate::wallet::{Operation, OperationType, StoreError, TrustLevel};

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Repository for small opaque blobs (sync cursors, cached account info)
#[async_trait::async_trait]
pub trait PreferencesRepository {
	async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
	/// Returns once the value is durable.
	async fn put_object(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
	async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Filter applied by `OperationStore::query`. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
	pub kind: Option<OperationType>,
	pub trust: Option<TrustLevel>,
	/// Inclusive lower bound on the operation date.
	pub since: Option<DateTime<Utc>>,
	/// Inclusive upper bound on the operation date.
	pub until: Option<DateTime<Utc>>,
}

impl OperationFilter {
	pub fn all() -> Self {
		Self::default()
	}

	pub fn until(mut self, date: DateTime<Utc>) -> Self {
		self.until = Some(date);
		self
	}

	pub fn since(mut self, date: DateTime<Utc>) -> Self {
		self.since = Some(date);
		self
	}

	pub fn of_kind(mut self, kind: OperationType) -> Self {
		self.kind = Some(kind);
		self
	}

	pub fn matches(&self, operation: &Operation) -> bool {
		self.kind.is_none_or(|k| operation.kind == k)
			&& self.trust.is_none_or(|t| operation.trust == t)
			&& self.since.is_none_or(|d| operation.date >= d)
			&& self.until.is_none_or(|d| operation.date <= d)
	}
}

/// Persistent, uid-deduplicated operation log
#[async_trait::async_trait]
pub trait OperationStore {
	/// Insert `operation` unless its uid is already stored. Returns whether it was inserted.
	async fn upsert_if_absent(&self, operation: &Operation) -> Result<bool, StoreError>;

	/// Insert every absent operation of one page as a single atomic unit.
	///
	/// Either all new operations become visible or none do. Returns the number of new rows.
	async fn commit_page(
		&self,
		account_uid: &str,
		operations: &[Operation],
	) -> Result<usize, StoreError>;

	/// Delete operations dated at or after `since`. Returns the number of deleted rows.
	async fn delete_since(
		&self,
		account_uid: &str,
		since: DateTime<Utc>,
	) -> Result<usize, StoreError>;

	/// Matching operations ordered by date, then insertion order.
	async fn query(
		&self,
		account_uid: &str,
		filter: &OperationFilter,
	) -> Result<Vec<Operation>, StoreError>;
}

/// Operations of one account with their uid index.
#[derive(Debug, Clone, Default)]
struct AccountLog {
	operations: Vec<Operation>,
	uids: HashSet<String>,
}

impl AccountLog {
	fn from_operations(operations: Vec<Operation>) -> Self {
		let uids = operations.iter().map(|op| op.uid.clone()).collect();
		Self { operations, uids }
	}

	fn insert(&mut self, operation: &Operation) -> bool {
		if !self.uids.insert(operation.uid.clone()) {
			return false;
		}
		self.operations.push(operation.clone());
		true
	}

	fn insert_all(&mut self, operations: &[Operation]) -> usize {
		operations.iter().filter(|op| self.insert(op)).count()
	}

	fn delete_since(&mut self, since: DateTime<Utc>) -> usize {
		let before = self.operations.len();
		self.operations.retain(|op| op.date < since);
		self.uids = self.operations.iter().map(|op| op.uid.clone()).collect();
		before - self.operations.len()
	}

	fn query(&self, filter: &OperationFilter) -> Vec<Operation> {
		let mut matching: Vec<Operation> = self
			.operations
			.iter()
			.filter(|op| filter.matches(op))
			.cloned()
			.collect();
		matching.sort_by_key(|op| op.date);
		matching
	}
}

/// Write `bytes` next to `path`, flush it to disk and rename it over `path`.
///
/// Readers never observe a torn file, and the new content is durable once this returns.
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
	let tmp = path.with_extension("tmp");
	let mut file = tokio::fs::File::create(&tmp).await?;
	file.write_all(bytes).await?;
	file.sync_all().await?;
	drop(file);

	tokio::fs::rename(&tmp, path).await?;
	sync_parent_dir(path).await
}

/// Persist the directory entry of a freshly renamed or removed file.
#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> Result<(), StoreError> {
	if let Some(parent) = path.parent() {
		tokio::fs::File::open(parent).await?.sync_all().await?;
	}
	Ok(())
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> Result<(), StoreError> {
	Ok(())
}

/// In-memory implementation of PreferencesRepository
#[derive(Default)]
pub struct InMemoryPreferencesRepository {
	entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryPreferencesRepository {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait::async_trait]
impl PreferencesRepository for InMemoryPreferencesRepository {
	async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
		Ok(self.entries.lock().await.get(key).cloned())
	}

	async fn put_object(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
		self.entries
			.lock()
			.await
			.insert(key.to_string(), value.to_vec());
		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<(), StoreError> {
		self.entries.lock().await.remove(key);
		Ok(())
	}
}

/// File-based implementation of PreferencesRepository, one file per key
pub struct FilePreferencesRepository {
	data_dir: PathBuf,
}

impl FilePreferencesRepository {
	pub async fn new(data_dir: PathBuf) -> Result<Self, StoreError> {
		tokio::fs::create_dir_all(&data_dir).await?;
		Ok(Self { data_dir })
	}

	fn get_filename(&self, key: &str) -> PathBuf {
		self.data_dir
			.join(format!("pref_{}.bin", hex::encode(key.as_bytes())))
	}
}

#[async_trait::async_trait]
impl PreferencesRepository for FilePreferencesRepository {
	async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
		match tokio::fs::read(self.get_filename(key)).await {
			Ok(bytes) => Ok(Some(bytes)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	async fn put_object(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
		let filename = self.get_filename(key);
		write_atomically(&filename, value).await?;
		debug!("Stored preference {} in {:?}", key, filename);
		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<(), StoreError> {
		let filename = self.get_filename(key);
		match tokio::fs::remove_file(&filename).await {
			Ok(()) => sync_parent_dir(&filename).await,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}
}

/// In-memory implementation of OperationStore
#[derive(Default)]
pub struct InMemoryOperationStore {
	accounts: Mutex<HashMap<String, AccountLog>>,
}

impl InMemoryOperationStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait::async_trait]
impl OperationStore for InMemoryOperationStore {
	async fn upsert_if_absent(&self, operation: &Operation) -> Result<bool, StoreError> {
		let mut accounts = self.accounts.lock().await;
		Ok(accounts
			.entry(operation.account_uid.clone())
			.or_default()
			.insert(operation))
	}

	async fn commit_page(
		&self,
		account_uid: &str,
		operations: &[Operation],
	) -> Result<usize, StoreError> {
		let mut accounts = self.accounts.lock().await;
		Ok(accounts
			.entry(account_uid.to_string())
			.or_default()
			.insert_all(operations))
	}

	async fn delete_since(
		&self,
		account_uid: &str,
		since: DateTime<Utc>,
	) -> Result<usize, StoreError> {
		let mut accounts = self.accounts.lock().await;
		Ok(accounts
			.get_mut(account_uid)
			.map(|log| log.delete_since(since))
			.unwrap_or(0))
	}

	async fn query(
		&self,
		account_uid: &str,
		filter: &OperationFilter,
	) -> Result<Vec<Operation>, StoreError> {
		let accounts = self.accounts.lock().await;
		Ok(accounts
			.get(account_uid)
			.map(|log| log.query(filter))
			.unwrap_or_default())
	}
}

/// File-based implementation of OperationStore.
///
/// Each account's log is one JSON file. A commit builds the new log off to the side, writes it
/// with an atomic rename and only then swaps it into the cache, so a failed write leaves both the
/// file and the cache at the previous page.
pub struct FileOperationStore {
	data_dir: PathBuf,
	cache: Mutex<HashMap<String, AccountLog>>,
}

impl FileOperationStore {
	pub async fn new(data_dir: PathBuf) -> Result<Self, StoreError> {
		tokio::fs::create_dir_all(&data_dir).await?;
		Ok(Self {
			data_dir,
			cache: Mutex::new(HashMap::new()),
		})
	}

	fn get_filename(&self, account_uid: &str) -> PathBuf {
		self.data_dir
			.join(format!("operations_{}.json", hex::encode(account_uid.as_bytes())))
	}

	async fn load(&self, account_uid: &str) -> Result<AccountLog, StoreError> {
		let filename = self.get_filename(account_uid);
		match tokio::fs::read(&filename).await {
			Ok(bytes) => {
				let operations: Vec<Operation> = serde_json::from_slice(&bytes)?;
				info!(
					"Loaded {} operations of account {} from {:?}",
					operations.len(),
					account_uid,
					filename
				);
				Ok(AccountLog::from_operations(operations))
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AccountLog::default()),
			Err(e) => Err(e.into()),
		}
	}

	async fn persist(&self, account_uid: &str, log: &AccountLog) -> Result<(), StoreError> {
		let content = serde_json::to_vec(&log.operations)?;
		write_atomically(&self.get_filename(account_uid), &content).await
	}

	/// Apply `change` to a copy of the account log and persist it before publishing it.
	async fn update<F>(&self, account_uid: &str, change: F) -> Result<usize, StoreError>
	where
		F: FnOnce(&mut AccountLog) -> usize + Send,
	{
		let mut cache = self.cache.lock().await;
		let mut log = match cache.get(account_uid) {
			Some(log) => log.clone(),
			None => self.load(account_uid).await?,
		};

		let changed = change(&mut log);
		if changed > 0 {
			self.persist(account_uid, &log).await?;
		}
		cache.insert(account_uid.to_string(), log);
		Ok(changed)
	}
}

#[async_trait::async_trait]
impl OperationStore for FileOperationStore {
	async fn upsert_if_absent(&self, operation: &Operation) -> Result<bool, StoreError> {
		let inserted = self
			.update(&operation.account_uid, |log| usize::from(log.insert(operation)))
			.await?;
		Ok(inserted == 1)
	}

	async fn commit_page(
		&self,
		account_uid: &str,
		operations: &[Operation],
	) -> Result<usize, StoreError> {
		self.update(account_uid, |log| log.insert_all(operations))
			.await
	}

	async fn delete_since(
		&self,
		account_uid: &str,
		since: DateTime<Utc>,
	) -> Result<usize, StoreError> {
		let deleted = self
			.update(account_uid, |log| log.delete_since(since))
			.await?;
		info!(
			"Deleted {} operations of account {} since {}",
			deleted, account_uid, since
		);
		Ok(deleted)
	}

	async fn query(
		&self,
		account_uid: &str,
		filter: &OperationFilter,
	) -> Result<Vec<Operation>, StoreError> {
		let mut cache = self.cache.lock().await;
		if !cache.contains_key(account_uid) {
			let log = self.load(account_uid).await?;
			cache.insert(account_uid.to_string(), log);
		}
		Ok(cache
			.get(account_uid)
			.map(|log| log.query(filter))
			.unwrap_or_default())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::{Duration, TimeZone};

	fn operation(uid: &str, days: i64) -> Operation {
		Operation {
			account_uid: "acc".into(),
			uid: uid.into(),
			transaction_hash: format!("tx-{}", uid),
			kind: OperationType::Receive,
			amount: 10,
			fee: None,
			senders: vec!["GX".into()],
			recipients: vec!["GW".into()],
			date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(days),
			block: None,
			trust: TrustLevel::Pending,
		}
	}

	#[tokio::test]
	async fn commit_page_skips_known_uids() {
		let store = InMemoryOperationStore::new();
		let page = vec![operation("a", 0), operation("b", 1)];

		assert_eq!(store.commit_page("acc", &page).await.unwrap(), 2);
		assert_eq!(store.commit_page("acc", &page).await.unwrap(), 0);
		assert!(!store.upsert_if_absent(&operation("a", 0)).await.unwrap());
		assert!(store.upsert_if_absent(&operation("c", 2)).await.unwrap());

		let all = store.query("acc", &OperationFilter::all()).await.unwrap();
		assert_eq!(all.len(), 3);
		assert!(store.query("other", &OperationFilter::all()).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn query_orders_by_date_and_applies_filter() {
		let store = InMemoryOperationStore::new();
		store
			.commit_page("acc", &[operation("late", 5), operation("early", 1), operation("mid", 3)])
			.await
			.unwrap();

		let all = store.query("acc", &OperationFilter::all()).await.unwrap();
		let uids: Vec<_> = all.iter().map(|op| op.uid.as_str()).collect();
		assert_eq!(uids, vec!["early", "mid", "late"]);

		let cutoff = operation("x", 3).date;
		let filtered = store
			.query("acc", &OperationFilter::all().until(cutoff))
			.await
			.unwrap();
		assert_eq!(filtered.len(), 2);
		assert!(store
			.query("acc", &OperationFilter::all().of_kind(OperationType::Send))
			.await
			.unwrap()
			.is_empty());
	}

	#[tokio::test]
	async fn delete_since_allows_reinsertion() {
		let store = InMemoryOperationStore::new();
		store
			.commit_page("acc", &[operation("a", 0), operation("b", 4)])
			.await
			.unwrap();

		let deleted = store.delete_since("acc", operation("x", 2).date).await.unwrap();
		assert_eq!(deleted, 1);
		assert!(store.upsert_if_absent(&operation("b", 4)).await.unwrap());
	}

	#[tokio::test]
	async fn file_store_survives_reopen() {
		let dir = tempfile::tempdir().unwrap();
		{
			let store = FileOperationStore::new(dir.path().to_path_buf()).await.unwrap();
			store
				.commit_page("acc", &[operation("a", 0), operation("b", 1)])
				.await
				.unwrap();
			store.delete_since("acc", operation("x", 1).date).await.unwrap();
		}

		let reopened = FileOperationStore::new(dir.path().to_path_buf()).await.unwrap();
		let all = reopened.query("acc", &OperationFilter::all()).await.unwrap();
		assert_eq!(all, vec![operation("a", 0)]);
		assert_eq!(reopened.commit_page("acc", &[operation("a", 0)]).await.unwrap(), 0);
	}

	#[tokio::test]
	async fn file_preferences_round_trip_and_remove() {
		let dir = tempfile::tempdir().unwrap();
		let prefs = FilePreferencesRepository::new(dir.path().join("prefs"))
			.await
			.unwrap();

		assert_eq!(prefs.get_object("acc/sync_state").await.unwrap(), None);
		prefs.put_object("acc/sync_state", b"v1").await.unwrap();
		prefs.put_object("acc/sync_state", b"v2").await.unwrap();
		assert_eq!(
			prefs.get_object("acc/sync_state").await.unwrap(),
			Some(b"v2".to_vec())
		);

		prefs.remove("acc/sync_state").await.unwrap();
		prefs.remove("acc/sync_state").await.unwrap();
		assert_eq!(prefs.get_object("acc/sync_state").await.unwrap(), None);
	}

	#[tokio::test]
	async fn atomic_write_replaces_content_without_leftovers() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("state.bin");

		write_atomically(&path, b"first version").await.unwrap();
		write_atomically(&path, b"v2").await.unwrap();

		assert_eq!(std::fs::read(&path).unwrap(), b"v2");
		let names: Vec<String> = std::fs::read_dir(dir.path())
			.unwrap()
			.map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
			.collect();
		assert_eq!(names, vec!["state.bin".to_string()]);
	}
}
