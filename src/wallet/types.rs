use crate::explorer::{BlockRef, ErrorKind, ExplorerError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Direction of a canonical operation relative to the local account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
	Send,
	Receive,
}

impl OperationType {
	pub fn as_str(&self) -> &'static str {
		match self {
			OperationType::Send => "SEND",
			OperationType::Receive => "RECEIVE",
		}
	}
}

impl fmt::Display for OperationType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrustLevel {
	/// Included in a block.
	Trusted,
	/// Seen by the explorer, not yet in a block.
	Pending,
}

/// A canonical local ledger entry derived from a chain transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
	pub account_uid: String,
	/// Deterministic identifier; re-materializing the same transaction yields the same uid.
	pub uid: String,
	pub transaction_hash: String,
	#[serde(rename = "type")]
	pub kind: OperationType,
	pub amount: u128,
	pub fee: Option<u128>,
	pub senders: Vec<String>,
	pub recipients: Vec<String>,
	pub date: DateTime<Utc>,
	pub block: Option<BlockRef>,
	pub trust: TrustLevel,
}

impl Operation {
	/// Signed effect of this operation on the account balance.
	pub fn balance_delta(&self) -> i128 {
		match self.kind {
			OperationType::Receive => signed(self.amount),
			OperationType::Send => -signed(self.amount.saturating_add(self.fee.unwrap_or(0))),
		}
	}
}

/// Amounts are range-checked when fetched; out-of-range values saturate instead of wrapping.
fn signed(amount: u128) -> i128 {
	i128::try_from(amount).unwrap_or(i128::MAX)
}

/// Membership predicate over the addresses belonging to one account.
pub trait Keychain: Send + Sync {
	fn contains(&self, address: &str) -> bool;

	/// The account's own, fee paying, address.
	fn own_address(&self) -> &str;

	/// Every address the explorer should be queried for.
	fn addresses(&self) -> Vec<String>;
}

/// Keychain of single-address chains.
#[derive(Debug, Clone)]
pub struct SingleAddressKeychain {
	address: String,
}

impl SingleAddressKeychain {
	pub fn new(address: impl Into<String>) -> Self {
		Self {
			address: address.into(),
		}
	}
}

impl Keychain for SingleAddressKeychain {
	fn contains(&self, address: &str) -> bool {
		self.address == address
	}

	fn own_address(&self) -> &str {
		&self.address
	}

	fn addresses(&self) -> Vec<String> {
		vec![self.address.clone()]
	}
}

/// Keychain watching a fixed set of derived addresses.
#[derive(Debug, Clone)]
pub struct AddressSetKeychain {
	own: String,
	ordered: Vec<String>,
	members: HashSet<String>,
}

impl AddressSetKeychain {
	/// `own` is always part of the watched set.
	pub fn new(own: impl Into<String>, others: impl IntoIterator<Item = String>) -> Self {
		let own = own.into();
		let mut ordered = vec![own.clone()];
		let mut members = HashSet::from([own.clone()]);
		for address in others {
			if members.insert(address.clone()) {
				ordered.push(address);
			}
		}
		Self {
			own,
			ordered,
			members,
		}
	}
}

impl Keychain for AddressSetKeychain {
	fn contains(&self, address: &str) -> bool {
		self.members.contains(address)
	}

	fn own_address(&self) -> &str {
		&self.own
	}

	fn addresses(&self) -> Vec<String> {
		self.ordered.clone()
	}
}

/// A local account: its identifier and the addresses it watches.
#[derive(Clone)]
pub struct Account {
	pub uid: String,
	pub keychain: Arc<dyn Keychain>,
}

impl Account {
	pub fn new(uid: impl Into<String>, keychain: Arc<dyn Keychain>) -> Self {
		Self {
			uid: uid.into(),
			keychain,
		}
	}
}

impl fmt::Debug for Account {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Account")
			.field("uid", &self.uid)
			.field("own_address", &self.keychain.own_address())
			.finish()
	}
}

/// Errors raised by operation and preference stores
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Serialization error: {0}")]
	Serialization(String),

	#[error("Store backend error: {0}")]
	Backend(String),
}

impl From<serde_json::Error> for StoreError {
	fn from(e: serde_json::Error) -> Self {
		StoreError::Serialization(e.to_string())
	}
}

impl From<bincode::Error> for StoreError {
	fn from(e: bincode::Error) -> Self {
		StoreError::Serialization(e.to_string())
	}
}

/// Error types for account synchronization
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("Explorer error: {0}")]
	Explorer(#[from] ExplorerError),

	#[error("Store error: {0}")]
	Store(#[from] StoreError),

	#[error("Synchronization cancelled")]
	Cancelled,

	#[error("A synchronization is already running for account {0}")]
	SyncInProgress(String),

	#[error("Synchronizer for account {0} has stopped")]
	Stopped(String),

	#[error("Synchronization pass aborted: {0}")]
	Aborted(String),
}

impl SyncError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			SyncError::Explorer(e) => e.kind(),
			SyncError::Store(_) => ErrorKind::StoreError,
			SyncError::Cancelled => ErrorKind::Cancelled,
			SyncError::SyncInProgress(_) => ErrorKind::SyncInProgress,
			SyncError::Stopped(_) => ErrorKind::Stopped,
			SyncError::Aborted(_) => ErrorKind::Aborted,
		}
	}
}

/// Cloneable failure of a synchronization pass, observed by every holder of its handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct SyncFailure {
	pub kind: ErrorKind,
	pub message: String,
}

impl From<&SyncError> for SyncFailure {
	fn from(e: &SyncError) -> Self {
		Self {
			kind: e.kind(),
			message: e.to_string(),
		}
	}
}

/// Statistics of a successful pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
	pub account_uid: String,
	pub new_operations: usize,
	pub last_block_height: u64,
	pub duration_ms: u64,
}

pub type SyncOutcome = Result<SyncReport, SyncFailure>;
