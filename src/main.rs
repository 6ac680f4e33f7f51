use ledger_sync::config::AppConfig;
use ledger_sync::explorer::{HttpLedgerExplorer, LedgerExplorer};
use ledger_sync::utils::{format_signed_amount, format_token_amount};
use ledger_sync::wallet::sync::events::{EventDispatcher, LoggingEventHandler};
use ledger_sync::wallet::sync::observer::BlockObserver;
use ledger_sync::wallet::sync::repositories::{
	FileOperationStore, FilePreferencesRepository, OperationFilter, OperationStore,
};
use ledger_sync::wallet::sync::state_persistence::StatePersistenceService;
use ledger_sync::wallet::sync::strategies::{BlockHashAdapter, ChainAdapter, PagingTokenAdapter};
use ledger_sync::wallet::{
	Account, AccountSynchronizer, AddressSetKeychain, BalanceProjector, Keychain,
	SingleAddressKeychain, TimePeriod,
};

use chrono::{Duration, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// `RUST_LOG` directives when set and valid, INFO otherwise.
fn log_filter(directives: Option<&str>) -> EnvFilter {
	directives
		.and_then(|d| EnvFilter::try_new(d).ok())
		.unwrap_or_else(|| EnvFilter::new("info"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting ledger sync service");

	if let Err(e) = run().await {
		error!("Ledger sync failed: {}", e);
		std::process::exit(1);
	}
}

async fn run() -> Result<(), BoxError> {
	let config = match std::env::args().nth(1) {
		Some(path) => AppConfig::from_file(Path::new(&path))?,
		None => AppConfig::from_env()?,
	};
	info!(
		"Loaded configuration for account {} ({} addresses)",
		config.account_uid,
		config.addresses.len()
	);

	let explorer = Arc::new(HttpLedgerExplorer::new(&config.explorer)?);
	info!("Created explorer client for {}", config.explorer.base_url);

	match explorer.get_current_block().await {
		Ok(block) => info!("Explorer at block {} (height {})", block.hash, block.height),
		Err(e) => warn!("Could not fetch current block: {}", e),
	}
	match explorer.get_fee_estimate().await {
		Ok(fees) => info!(
			"Fee estimate: last base fee {}, mode fee {}",
			format_token_amount(fees.last_base_fee, config.decimals),
			format_token_amount(fees.mode_fee, config.decimals)
		),
		Err(e) => warn!("Could not fetch fee estimate: {}", e),
	}

	let preferences = Arc::new(FilePreferencesRepository::new(config.data_dir.join("preferences")).await?);
	let store = Arc::new(FileOperationStore::new(config.data_dir.join("operations")).await?);
	let persistence = Arc::new(StatePersistenceService::new(preferences));

	let (own, others) = config
		.addresses
		.split_first()
		.ok_or("at least one account address is required")?;
	let keychain: Arc<dyn Keychain> = if others.is_empty() {
		Arc::new(SingleAddressKeychain::new(own.clone()))
	} else {
		Arc::new(AddressSetKeychain::new(own.clone(), others.to_vec()))
	};
	let account = Account::new(config.account_uid.clone(), keychain);

	let adapter: Arc<dyn ChainAdapter> = if config.block_hash_paging {
		Arc::new(BlockHashAdapter::with_config(explorer.clone(), &config.sync))
	} else {
		Arc::new(PagingTokenAdapter::transactions_only(explorer.clone()))
	};
	info!("Using {}", adapter.name());

	let synchronizer = AccountSynchronizer::new(
		account,
		adapter,
		store.clone(),
		persistence.clone(),
		config.sync.clone(),
	)
	.spawn();

	let mut dispatcher = EventDispatcher::new();
	dispatcher.register_handler(Box::new(LoggingEventHandler));
	let _event_logger = dispatcher.spawn(synchronizer.subscribe());

	let report = synchronizer.synchronize().await?.wait().await?;
	info!(
		"Synchronized {}: {} new operations up to block {} in {}ms",
		report.account_uid, report.new_operations, report.last_block_height, report.duration_ms
	);

	let operations = store
		.query(&config.account_uid, &OperationFilter::all())
		.await?;
	info!(
		"Replayed balance over {} operations: {}",
		operations.len(),
		format_signed_amount(BalanceProjector::balance(&operations), config.decimals)
	);
	if let Some(account_info) = persistence.load_account_info(&config.account_uid).await? {
		info!(
			"Chain reported balance: {}",
			format_token_amount(account_info.balance, config.decimals)
		);
	}

	let end = Utc::now();
	let history = BalanceProjector::new(TimePeriod::Week)
		.balance_history(store.as_ref(), &config.account_uid, end - Duration::days(90), end)
		.await?;
	for bucket in &history {
		info!(
			"  {}  {}",
			bucket.date.format("%Y-%m-%d"),
			format_signed_amount(bucket.balance, config.decimals)
		);
	}

	if config.observe {
		let mut observer = BlockObserver::new(std::time::Duration::from_secs(
			config.sync.observer_idle_timeout_secs,
		));
		observer.register(synchronizer.clone());
		let stats = observer.watch(&explorer).await?;
		info!(
			"Observed {} blocks, triggered {} passes",
			stats.blocks_seen, stats.passes_triggered
		);

		// let the last triggered pass settle before exiting
		if synchronizer.is_synchronizing().await {
			let outcome = synchronizer.synchronize().await?.wait().await;
			info!("Last pass ended: {:?}", outcome.map(|r| r.new_operations));
		}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use tracing::level_filters::LevelFilter;

	#[test]
	fn rust_log_overrides_default_level() {
		assert_eq!(log_filter(None).max_level_hint(), Some(LevelFilter::INFO));
		assert_eq!(log_filter(Some("debug")).max_level_hint(), Some(LevelFilter::DEBUG));
		assert_eq!(log_filter(Some("warn")).max_level_hint(), Some(LevelFilter::WARN));
		assert_eq!(log_filter(Some("ledger_sync=loud")).max_level_hint(), Some(LevelFilter::INFO));
	}
}
