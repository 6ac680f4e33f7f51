//! Configuration for the explorer client, the synchronizer and the demo binary.

use crate::explorer::paging_guard::DEFAULT_BATCH_SIZE;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Invalid configuration: {0}")]
	Invalid(String),

	#[error("JSON parse error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Explorer endpoints and network policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
	pub base_url: String,
	pub ws_url: Option<String>,
	pub request_timeout_secs: u64,
	/// Maximum time spent retrying one transient network failure.
	pub max_retry_elapsed_secs: u64,
}

impl Default for ExplorerConfig {
	fn default() -> Self {
		Self {
			base_url: "http://localhost:8000".to_string(),
			ws_url: None,
			request_timeout_secs: 30,
			max_retry_elapsed_secs: 30,
		}
	}
}

/// Synchronizer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
	/// Initial number of transactions requested per block-hash page.
	pub batch_size: u32,
	/// Growth applied when a page cannot be proven complete.
	pub batch_increment: u32,
	pub max_batch_size: u32,
	/// Restart a feed from genesis when its resume block disappeared.
	pub restart_on_block_not_found: bool,
	/// Log progress every N committed pages.
	pub progress_log_interval: usize,
	/// Stop observing blocks after this long without a notification.
	pub observer_idle_timeout_secs: u64,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			batch_size: DEFAULT_BATCH_SIZE,
			batch_increment: DEFAULT_BATCH_SIZE,
			max_batch_size: DEFAULT_BATCH_SIZE * 10,
			restart_on_block_not_found: true,
			progress_log_interval: 10,
			observer_idle_timeout_secs: 30,
		}
	}
}

/// Configuration of the `ledger-sync` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
	pub explorer: ExplorerConfig,
	pub sync: SyncConfig,
	pub data_dir: PathBuf,
	pub account_uid: String,
	/// First address is the account's own (fee paying) address.
	pub addresses: Vec<String>,
	/// Page by block hash over the address set instead of by account paging token.
	pub block_hash_paging: bool,
	pub decimals: u32,
	/// Keep synchronizing on every new block after the first pass.
	pub observe: bool,
}

impl Default for AppConfig {
	fn default() -> Self {
		Self {
			explorer: ExplorerConfig::default(),
			sync: SyncConfig::default(),
			data_dir: PathBuf::from("./data"),
			account_uid: "account-0".to_string(),
			addresses: Vec::new(),
			block_hash_paging: false,
			decimals: 7,
			observe: false,
		}
	}
}

impl AppConfig {
	pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path)?;
		let config: AppConfig = serde_json::from_str(&content)?;
		config.validate()?;
		Ok(config)
	}

	/// Build from `LEDGER_SYNC_*` environment variables on top of the defaults.
	pub fn from_env() -> Result<Self, ConfigError> {
		let mut config = AppConfig::default();

		if let Ok(url) = std::env::var("LEDGER_SYNC_EXPLORER_URL") {
			config.explorer.base_url = url;
		}
		if let Ok(url) = std::env::var("LEDGER_SYNC_EXPLORER_WS_URL") {
			config.explorer.ws_url = Some(url);
		}
		if let Ok(dir) = std::env::var("LEDGER_SYNC_DATA_DIR") {
			config.data_dir = PathBuf::from(dir);
		}
		if let Ok(uid) = std::env::var("LEDGER_SYNC_ACCOUNT_UID") {
			config.account_uid = uid;
		}
		if let Ok(addresses) = std::env::var("LEDGER_SYNC_ADDRESSES") {
			config.addresses = addresses
				.split(',')
				.map(str::trim)
				.filter(|a| !a.is_empty())
				.map(str::to_string)
				.collect();
		}
		if let Ok(value) = std::env::var("LEDGER_SYNC_BATCH_SIZE") {
			config.sync.batch_size = value
				.parse()
				.map_err(|_| ConfigError::Invalid(format!("batch size '{}'", value)))?;
		}
		if let Ok(value) = std::env::var("LEDGER_SYNC_BLOCK_HASH_PAGING") {
			config.block_hash_paging = value == "1" || value.eq_ignore_ascii_case("true");
		}
		if let Ok(value) = std::env::var("LEDGER_SYNC_OBSERVE") {
			config.observe = value == "1" || value.eq_ignore_ascii_case("true");
		}

		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.addresses.is_empty() {
			return Err(ConfigError::Invalid(
				"at least one account address is required".to_string(),
			));
		}
		if self.sync.max_batch_size < self.sync.batch_size {
			return Err(ConfigError::Invalid(format!(
				"max_batch_size {} is below batch_size {}",
				self.sync.max_batch_size, self.sync.batch_size
			)));
		}
		Ok(())
	}
}
