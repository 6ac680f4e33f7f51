//! New-block observation.
//!
//! The `BlockObserver` listens to a stream of new blocks and triggers a synchronization of every
//! registered account each time the chain height advances. Triggering goes through
//! `SynchronizerHandle::synchronize`, so an account whose pass is still running simply has its
//! running pass joined. Observation stops when the stream ends or stays idle too long.

use crate::explorer::{Block, ExplorerError, HttpLedgerExplorer};
use crate::wallet::sync::orchestrator::SynchronizerHandle;

use futures_util::{Stream, StreamExt};
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Statistics of one observation run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObserverStats {
    pub blocks_seen: usize,
    pub passes_triggered: usize,
    pub last_height: Option<u64>,
}

/// Triggers account synchronization on new blocks.
pub struct BlockObserver {
    handles: Vec<SynchronizerHandle>,
    idle_timeout: Duration,
    last_height: Option<u64>,
}

impl BlockObserver {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            handles: Vec::new(),
            idle_timeout,
            last_height: None,
        }
    }

    pub fn register(&mut self, handle: SynchronizerHandle) {
        self.handles.push(handle);
    }

    /// Subscribe to the explorer's block feed and observe it.
    pub async fn watch(
        &mut self,
        explorer: &HttpLedgerExplorer,
    ) -> Result<ObserverStats, ExplorerError> {
        let blocks = explorer.subscribe_blocks().await?;
        Ok(self.observe(blocks).await)
    }

    /// Observe `blocks` until the stream ends or no block arrives within the idle timeout.
    pub async fn observe<S>(&mut self, mut blocks: S) -> ObserverStats
    where
        S: Stream<Item = Result<Block, ExplorerError>> + Unpin,
    {
        let mut stats = ObserverStats {
            last_height: self.last_height,
            ..ObserverStats::default()
        };
        let mut last_event_time = Instant::now();

        loop {
            let timeout = tokio::time::sleep_until(last_event_time + self.idle_timeout);
            tokio::pin!(timeout);

            tokio::select! {
                next = blocks.next() => {
                    last_event_time = Instant::now();

                    match next {
                        Some(Ok(block)) => {
                            stats.blocks_seen += 1;
                            if self.last_height.is_some_and(|h| block.height <= h) {
                                debug!("Ignoring block {} at height {}", block.hash, block.height);
                                continue;
                            }
                            self.last_height = Some(block.height);
                            stats.last_height = Some(block.height);
                            info!("New block {} at height {}", block.hash, block.height);
                            stats.passes_triggered += self.trigger_all().await;
                        }
                        Some(Err(e)) => {
                            error!("Error in blocks subscription: {}", e);
                        }
                        None => {
                            info!("Block stream ended, stopping observation");
                            break;
                        }
                    }
                }
                _ = &mut timeout => {
                    info!("No new blocks for {} seconds, stopping observation", self.idle_timeout.as_secs());
                    break;
                }
            }
        }

        stats
    }

    async fn trigger_all(&self) -> usize {
        let mut triggered = 0;
        for handle in &self.handles {
            match handle.synchronize().await {
                Ok(sync) => {
                    debug!(
                        "Triggered pass {} of account {}",
                        sync.pass_id(),
                        handle.account_uid()
                    );
                    triggered += 1;
                }
                Err(e) => warn!(
                    "Could not synchronize account {}: {}",
                    handle.account_uid(),
                    e
                ),
            }
        }
        triggered
    }
}
