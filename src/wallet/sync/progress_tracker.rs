//! Progress tracking for account synchronization.
//!
//! This module provides the `SyncProgressTracker`, which records what one pass has committed so
//! far: pages per feed, transactions seen, operations inserted and the highest block reached. It
//! logs progress at a configurable page interval and produces the statistics summary logged when
//! the pass ends.

use crate::wallet::sync::strategies::Feed;

use std::time::{Duration, Instant};
use tracing::info;

/// Service for tracking synchronization progress of one pass
#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
    account_uid: String,
    started_at: Instant,
    /// Block height the pass resumed from
    start_height: u64,
    /// The highest block height seen in a committed page
    highest_block_height: u64,
    transaction_pages: usize,
    operation_pages: usize,
    transactions_processed: usize,
    operations_inserted: usize,
    /// Log every N committed pages; 0 disables periodic logging
    log_interval: usize,
    pages_since_last_log: usize,
}

impl SyncProgressTracker {
    pub fn new(account_uid: impl Into<String>, start_height: u64, log_interval: usize) -> Self {
        Self {
            account_uid: account_uid.into(),
            started_at: Instant::now(),
            start_height,
            highest_block_height: start_height,
            transaction_pages: 0,
            operation_pages: 0,
            transactions_processed: 0,
            operations_inserted: 0,
            log_interval,
            pages_since_last_log: 0,
        }
    }

    /// Record one committed page
    pub fn record_page(
        &mut self,
        feed: Feed,
        transactions: usize,
        operations_inserted: usize,
        highest_block: Option<u64>,
    ) {
        match feed {
            Feed::Transactions => self.transaction_pages += 1,
            Feed::Operations => self.operation_pages += 1,
        }
        self.transactions_processed += transactions;
        self.operations_inserted += operations_inserted;
        if let Some(height) = highest_block {
            self.highest_block_height = self.highest_block_height.max(height);
        }
        self.pages_since_last_log += 1;
    }

    pub fn highest_block_height(&self) -> u64 {
        self.highest_block_height
    }

    pub fn operations_inserted(&self) -> usize {
        self.operations_inserted
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Log progress every `log_interval` pages, or when forced
    pub fn log_progress(&mut self, force: bool) {
        let interval_reached = self.log_interval > 0 && self.pages_since_last_log >= self.log_interval;
        if (force || interval_reached) && self.pages_since_last_log > 0 {
            info!(
                "[{}] Sync progress: {} pages, {} transactions, {} operations inserted, block height {}",
                self.account_uid,
                self.transaction_pages + self.operation_pages,
                self.transactions_processed,
                self.operations_inserted,
                self.highest_block_height
            );
            self.pages_since_last_log = 0;
        }
    }

    /// Get sync statistics as a SyncStats struct
    pub fn get_stats(&self) -> SyncStats {
        SyncStats {
            start_height: self.start_height,
            highest_block_height: self.highest_block_height,
            transaction_pages: self.transaction_pages,
            operation_pages: self.operation_pages,
            transactions_processed: self.transactions_processed,
            operations_inserted: self.operations_inserted,
            elapsed: self.elapsed(),
        }
    }
}

/// Statistics about one synchronization pass
#[derive(Debug, Clone)]
pub struct SyncStats {
    pub start_height: u64,
    pub highest_block_height: u64,
    pub transaction_pages: usize,
    pub operation_pages: usize,
    pub transactions_processed: usize,
    pub operations_inserted: usize,
    pub elapsed: Duration,
}

impl SyncStats {
    /// Get a human-readable summary of the sync statistics
    pub fn summary(&self) -> String {
        format!(
            "Sync from block {} to {}: {} transaction pages, {} operation pages, {} transactions, {} new operations in {:.2?}",
            self.start_height,
            self.highest_block_height,
            self.transaction_pages,
            self.operation_pages,
            self.transactions_processed,
            self.operations_inserted,
            self.elapsed
        )
    }
}
