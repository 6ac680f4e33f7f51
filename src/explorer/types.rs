//! Types shared by every ledger explorer implementation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to the block containing a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    /// The block hash.
    pub hash: String,
    /// The block height.
    pub height: u64,
}

/// A block as reported by the explorer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub hash: String,
    pub height: u64,
    pub time: DateTime<Utc>,
}

impl Block {
    pub fn to_ref(&self) -> BlockRef {
        BlockRef {
            hash: self.hash.clone(),
            height: self.height,
        }
    }
}

/// Account state as known by the chain.
///
/// Only the fields the synchronizer persists ahead of transaction paging are modelled here
/// (sequence and balance are what downstream reserve/sequence checks read).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub address: String,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub balance: u128,
    #[serde(default, rename = "subentryCount")]
    pub subentry_count: u32,
}

/// Fee statistics used for transaction building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeStats {
    #[serde(rename = "lastBaseFee")]
    pub last_base_fee: u128,
    #[serde(rename = "minFee")]
    pub min_fee: u128,
    #[serde(rename = "modeFee")]
    pub mode_fee: u128,
    #[serde(rename = "maxFee")]
    pub max_fee: u128,
}

/// Kind of a sub-operation inside a chain transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubOperationKind {
    CreateAccount,
    Payment,
    PathPaymentStrictReceive,
    PathPaymentStrictSend,
    AccountMerge,
    ChangeTrust,
    AllowTrust,
    SetOptions,
    ManageSellOffer,
    ManageBuyOffer,
    ManageData,
    BumpSequence,
    #[serde(other)]
    Other,
}

impl SubOperationKind {
    /// Whether this kind transfers native value between two addresses.
    pub fn is_value_moving(&self) -> bool {
        matches!(
            self,
            SubOperationKind::CreateAccount
                | SubOperationKind::Payment
                | SubOperationKind::PathPaymentStrictReceive
                | SubOperationKind::PathPaymentStrictSend
                | SubOperationKind::AccountMerge
        )
    }
}

/// One effect of a chain transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubOperation {
    /// Identifier of the sub-operation, unique within its transaction.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SubOperationKind,
    /// Overrides the transaction source when present.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub amount: u128,
}

/// A raw chain transaction as returned by an explorer.
///
/// Sub-operations are kept in chain order; fee synthesis depends on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    #[serde(default, rename = "pagingToken")]
    pub paging_token: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub block: Option<BlockRef>,
    /// Top-level source account, the fee payer.
    pub source: String,
    #[serde(default)]
    pub fee: u128,
    #[serde(default = "default_successful")]
    pub successful: bool,
    #[serde(default, rename = "operations")]
    pub sub_operations: Vec<SubOperation>,
}

fn default_successful() -> bool {
    true
}

/// Largest amount or fee accepted from an explorer. Any amount plus any fee fits in an `i128`.
pub const MAX_AMOUNT: u128 = i128::MAX as u128 / 2;

impl Transaction {
    pub fn block_hash(&self) -> Option<&str> {
        self.block.as_ref().map(|b| b.hash.as_str())
    }

    /// Reject fees and amounts a signed balance cannot represent.
    pub fn check_amounts(&self) -> Result<(), ExplorerError> {
        let out_of_range = self.fee > MAX_AMOUNT
            || self
                .sub_operations
                .iter()
                .any(|sub| sub.amount > MAX_AMOUNT);
        if out_of_range {
            return Err(ExplorerError::Parse(format!(
                "amount out of range in transaction {}",
                self.hash
            )));
        }
        Ok(())
    }
}

/// One page of explorer results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default, rename = "hasNext")]
    pub has_next: bool,
    #[serde(default, rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_next: false,
            next_cursor: None,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Stable error classification, shared by every layer and reported in failure events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NetworkError,
    ApiError,
    ParseError,
    AccountNotFound,
    BlockNotFound,
    BatchLimitExceeded,
    StoreError,
    Cancelled,
    SyncInProgress,
    Stopped,
    Aborted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::ApiError => "API_ERROR",
            ErrorKind::ParseError => "PARSE_ERROR",
            ErrorKind::AccountNotFound => "ACCOUNT_NOT_FOUND",
            ErrorKind::BlockNotFound => "BLOCK_NOT_FOUND",
            ErrorKind::BatchLimitExceeded => "BATCH_LIMIT_EXCEEDED",
            ErrorKind::StoreError => "STORE_ERROR",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::SyncInProgress => "SYNC_IN_PROGRESS",
            ErrorKind::Stopped => "STOPPED",
            ErrorKind::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types for explorer operations
#[derive(Debug, thiserror::Error)]
pub enum ExplorerError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Account {0} not found")]
    AccountNotFound(String),

    #[error("Unable to find block with hash {0}")]
    BlockNotFound(String),

    #[error("Page still ambiguous at maximum batch size {batch_size}")]
    BatchLimitExceeded { batch_size: u32 },

    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

impl ExplorerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExplorerError::Network(_) | ExplorerError::WebSocket(_) => ErrorKind::NetworkError,
            ExplorerError::Api { .. } => ErrorKind::ApiError,
            ExplorerError::Parse(_) => ErrorKind::ParseError,
            ExplorerError::AccountNotFound(_) => ErrorKind::AccountNotFound,
            ExplorerError::BlockNotFound(_) => ErrorKind::BlockNotFound,
            ExplorerError::BatchLimitExceeded { .. } => ErrorKind::BatchLimitExceeded,
        }
    }

    /// Transient failures a caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExplorerError::Network(_) | ExplorerError::WebSocket(_))
    }
}

impl From<reqwest::Error> for ExplorerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ExplorerError::Parse(e.to_string())
        } else if let Some(status) = e.status() {
            ExplorerError::Api {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            ExplorerError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ExplorerError {
    fn from(e: serde_json::Error) -> Self {
        ExplorerError::Parse(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ExplorerError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ExplorerError::WebSocket(e.to_string())
    }
}
