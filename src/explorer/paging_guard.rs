//! Completeness guard for block-hash transaction paging.
//!
//! An explorer paging "transactions touching these addresses after block B" may hand back a page
//! that stops in the middle of a block. When the page is exactly full and its first and last
//! transactions sit in the same block, there is no way to tell whether that block has more
//! transactions past the page boundary. The guard re-issues the same request with a larger batch
//! until the page is provably complete, so the caller can advance its cursor to the last block of
//! the page without skipping anything.

use crate::explorer::{ExplorerError, LedgerExplorer, Page, Transaction};

use tracing::{debug, warn};

/// Default number of transactions requested per page.
pub const DEFAULT_BATCH_SIZE: u32 = 1000;

/// Retry signal of a single guarded fetch.
enum RetrySignal {
    /// Page may be truncated inside its only block.
    IncompleteBatch,
    Failed(ExplorerError),
}

/// Wraps `LedgerExplorer::get_transactions` with automatic batch growth.
#[derive(Debug, Clone)]
pub struct PagingCompletenessGuard {
    batch_size: u32,
    batch_increment: u32,
    max_batch_size: u32,
}

impl Default for PagingCompletenessGuard {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_increment: DEFAULT_BATCH_SIZE,
            max_batch_size: DEFAULT_BATCH_SIZE * 10,
        }
    }
}

impl PagingCompletenessGuard {
    pub fn new(batch_size: u32, batch_increment: u32, max_batch_size: u32) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            batch_increment: batch_increment.max(1),
            max_batch_size: max_batch_size.max(batch_size),
        }
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Fetch one page that ends on a block boundary (or is empty).
    ///
    /// A generic API failure while resuming from `from_block_hash` is reported as
    /// `BlockNotFound`; network and parse errors pass through unchanged.
    pub async fn fetch<E: LedgerExplorer + ?Sized>(
        &self,
        explorer: &E,
        addresses: &[String],
        from_block_hash: Option<&str>,
    ) -> Result<Page<Transaction>, ExplorerError> {
        let mut batch_size = self.batch_size;

        loop {
            match self
                .try_fetch(explorer, addresses, from_block_hash, batch_size)
                .await
            {
                Ok(page) => return Ok(page),
                Err(RetrySignal::Failed(e)) => return Err(e),
                Err(RetrySignal::IncompleteBatch) => {
                    let next = batch_size.saturating_add(self.batch_increment);
                    if next > self.max_batch_size {
                        warn!(
                            "Page from block {:?} still ambiguous at batch size {}",
                            from_block_hash, batch_size
                        );
                        return Err(ExplorerError::BatchLimitExceeded { batch_size });
                    }
                    debug!(
                        "Ambiguous page boundary from block {:?}, growing batch {} -> {}",
                        from_block_hash, batch_size, next
                    );
                    batch_size = next;
                }
            }
        }
    }

    async fn try_fetch<E: LedgerExplorer + ?Sized>(
        &self,
        explorer: &E,
        addresses: &[String],
        from_block_hash: Option<&str>,
        batch_size: u32,
    ) -> Result<Page<Transaction>, RetrySignal> {
        let page = explorer
            .get_transactions(addresses, from_block_hash, batch_size)
            .await
            .map_err(|e| match (e, from_block_hash) {
                (ExplorerError::Api { .. }, Some(hash)) => {
                    RetrySignal::Failed(ExplorerError::BlockNotFound(hash.to_string()))
                }
                (e, _) => RetrySignal::Failed(e),
            })?;

        if is_ambiguous(&page, batch_size) {
            return Err(RetrySignal::IncompleteBatch);
        }
        Ok(page)
    }
}

/// Full page whose first and last transactions share one block.
fn is_ambiguous(page: &Page<Transaction>, batch_size: u32) -> bool {
    match (page.items.first(), page.items.last()) {
        (Some(first), Some(last)) => {
            page.len() == batch_size as usize
                && first.block_hash().is_some()
                && first.block_hash() == last.block_hash()
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explorer::{AccountInfo, Block, BlockRef, FeeStats};
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    /// Explorer holding transactions grouped by block, returning whole blocks while they fit and
    /// truncating only a block that alone exceeds the batch.
    struct BlockExplorer {
        blocks: Vec<(String, usize)>,
        requests: Mutex<Vec<(Option<String>, u32)>>,
        fail_with_api_error: bool,
    }

    impl BlockExplorer {
        fn new(blocks: &[(&str, usize)]) -> Self {
            Self {
                blocks: blocks.iter().map(|(h, n)| (h.to_string(), *n)).collect(),
                requests: Mutex::new(Vec::new()),
                fail_with_api_error: false,
            }
        }

        fn tx(block: &str, height: usize, index: usize) -> Transaction {
            Transaction {
                hash: format!("{}-{}", block, index),
                paging_token: None,
                timestamp: Utc.timestamp_opt(1_600_000_000 + height as i64, 0).unwrap(),
                block: Some(BlockRef {
                    hash: block.to_string(),
                    height: height as u64,
                }),
                source: "GA".into(),
                fee: 1,
                successful: true,
                sub_operations: vec![],
            }
        }
    }

    #[async_trait::async_trait]
    impl LedgerExplorer for BlockExplorer {
        async fn get_account(&self, address: &str) -> Result<AccountInfo, ExplorerError> {
            Err(ExplorerError::AccountNotFound(address.into()))
        }

        async fn get_transactions(
            &self,
            _addresses: &[String],
            from_block_hash: Option<&str>,
            batch_size: u32,
        ) -> Result<Page<Transaction>, ExplorerError> {
            self.requests
                .lock()
                .unwrap()
                .push((from_block_hash.map(str::to_string), batch_size));
            if self.fail_with_api_error {
                return Err(ExplorerError::Api {
                    status: 404,
                    message: "unknown block".into(),
                });
            }
            let start = match from_block_hash {
                None => 0,
                Some(hash) => self.blocks.iter().position(|(h, _)| h == hash).unwrap() + 1,
            };
            let mut items = Vec::new();
            for (height, (hash, count)) in self.blocks.iter().enumerate().skip(start) {
                if items.len() + count > batch_size as usize {
                    if items.is_empty() {
                        for i in 0..batch_size as usize {
                            items.push(Self::tx(hash, height, i));
                        }
                    }
                    break;
                }
                for i in 0..*count {
                    items.push(Self::tx(hash, height, i));
                }
            }
            Ok(Page {
                items,
                has_next: false,
                next_cursor: None,
            })
        }

        async fn get_account_transactions(
            &self,
            _address: &str,
            _cursor: Option<&str>,
        ) -> Result<Page<Transaction>, ExplorerError> {
            Ok(Page::empty())
        }

        async fn get_operations(
            &self,
            _address: &str,
            _cursor: Option<&str>,
        ) -> Result<Page<Transaction>, ExplorerError> {
            Ok(Page::empty())
        }

        async fn get_current_block(&self) -> Result<Block, ExplorerError> {
            Err(ExplorerError::Network("offline".into()))
        }

        async fn get_fee_estimate(&self) -> Result<FeeStats, ExplorerError> {
            Err(ExplorerError::Network("offline".into()))
        }

        async fn broadcast(&self, _raw_tx: &[u8]) -> Result<String, ExplorerError> {
            Err(ExplorerError::Network("offline".into()))
        }
    }

    #[tokio::test]
    async fn grows_batch_until_single_block_fits() {
        let explorer = BlockExplorer::new(&[("b0", 5), ("b1", 2)]);
        let guard = PagingCompletenessGuard::new(3, 3, 30);

        let page = guard.fetch(&explorer, &["GA".into()], None).await.unwrap();

        // first attempt cuts b0 after 3 of its 5 transactions, second returns b0 whole
        assert_eq!(page.len(), 5);
        assert!(page.items.iter().all(|tx| tx.block_hash() == Some("b0")));
        let requests = explorer.requests.lock().unwrap();
        assert_eq!(requests.iter().map(|r| r.1).collect::<Vec<_>>(), vec![3, 6]);
    }

    #[tokio::test]
    async fn page_ending_on_block_boundary_is_returned_as_is() {
        let explorer = BlockExplorer::new(&[("b0", 2), ("b1", 2), ("b2", 2)]);
        let guard = PagingCompletenessGuard::new(4, 4, 40);

        let page = guard.fetch(&explorer, &["GA".into()], None).await.unwrap();
        assert_eq!(page.len(), 4);
        assert_eq!(page.items.last().unwrap().block_hash(), Some("b1"));
        assert_eq!(explorer.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn never_leaves_transactions_of_a_consumed_block_behind() {
        let blocks = [("b0", 1), ("b1", 7), ("b2", 3), ("b3", 12), ("b4", 2)];
        let explorer = BlockExplorer::new(&blocks);
        let guard = PagingCompletenessGuard::new(4, 4, 64);

        let mut cursor: Option<String> = None;
        let mut seen = 0usize;
        loop {
            let page = guard
                .fetch(&explorer, &["GA".into()], cursor.as_deref())
                .await
                .unwrap();
            if page.is_empty() {
                break;
            }
            let last = page.items.last().unwrap().block_hash().unwrap().to_string();
            let (_, total) = blocks.iter().find(|(h, _)| *h == last).unwrap();
            let in_page = page
                .items
                .iter()
                .filter(|tx| tx.block_hash() == Some(last.as_str()))
                .count();
            assert_eq!(in_page, *total, "block {} was cut", last);
            seen += page.len();
            cursor = Some(last);
        }
        assert_eq!(seen, blocks.iter().map(|(_, n)| n).sum::<usize>());
    }

    #[tokio::test]
    async fn stops_at_max_batch_size() {
        let explorer = BlockExplorer::new(&[("b0", 50)]);
        let guard = PagingCompletenessGuard::new(10, 10, 30);

        let err = guard.fetch(&explorer, &["GA".into()], None).await.unwrap_err();
        assert!(matches!(err, ExplorerError::BatchLimitExceeded { batch_size: 30 }));
    }

    #[tokio::test]
    async fn api_failure_with_cursor_maps_to_block_not_found() {
        let mut explorer = BlockExplorer::new(&[("b0", 1)]);
        explorer.fail_with_api_error = true;
        let guard = PagingCompletenessGuard::default();

        let err = guard
            .fetch(&explorer, &["GA".into()], Some("gone"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExplorerError::BlockNotFound(ref h) if h == "gone"));

        let err = guard.fetch(&explorer, &["GA".into()], None).await.unwrap_err();
        assert!(matches!(err, ExplorerError::Api { status: 404, .. }));
    }
}
