//! Account synchronizer and integration point for all sync services.
//!
//! This module defines the `AccountSynchronizer`, which drives one account's synchronization
//! passes. It runs as a dedicated actor task owning the account's `SyncSession`; callers talk to it
//! through a cloneable `SynchronizerHandle` over a command channel, so "is a pass running" and the
//! single-flight check are plain queries against the actor.
//!
//! A pass:
//! - posts a sticky `SYNCHRONIZATION_STARTED` event
//! - fetches and persists the account info (an account unknown to the chain has no history)
//! - for each feed of the chain adapter, pages from the persisted cursor, materializes each page,
//!   commits it atomically to the operation store and only then persists the advanced cursor
//! - clears the session, posts a sticky terminal event and resolves the shared completion handle
//!
//! A failed pass leaves the cursor at the last committed page, so the next pass resumes there. When
//! the resume block of a feed has vanished, the operations of the possibly orphaned blocks are
//! erased before the feed restarts from genesis.

use crate::config::SyncConfig;
use crate::explorer::{ErrorKind, ExplorerError};
use crate::wallet::sync::{
    events::{EventBus, EventSubscription, SyncEvent},
    progress_tracker::SyncProgressTracker,
    repositories::{OperationFilter, OperationStore},
    state_persistence::{StatePersistenceService, SyncState},
    strategies::{ChainAdapter, Feed},
};
use crate::wallet::{Account, Operation, SyncError, SyncFailure, SyncOutcome, SyncReport};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Completion handle of one pass, shared by every caller of `synchronize` during that pass.
#[derive(Clone)]
pub struct SyncHandle {
    pass_id: u64,
    account_uid: String,
    bus: EventBus,
    completion: Shared<BoxFuture<'static, SyncOutcome>>,
}

impl SyncHandle {
    pub fn pass_id(&self) -> u64 {
        self.pass_id
    }

    pub fn account_uid(&self) -> &str {
        &self.account_uid
    }

    /// Wait for the pass to end.
    pub async fn wait(&self) -> SyncOutcome {
        self.completion.clone().await
    }

    /// Outcome of the pass if it already ended.
    pub fn outcome(&self) -> Option<SyncOutcome> {
        self.completion.peek().cloned()
    }

    /// Subscribe to the account's events, starting with the latest sticky one.
    pub fn subscribe(&self) -> EventSubscription {
        self.bus.subscribe()
    }
}

impl PartialEq for SyncHandle {
    fn eq(&self, other: &Self) -> bool {
        self.account_uid == other.account_uid && self.pass_id == other.pass_id
    }
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandle")
            .field("account_uid", &self.account_uid)
            .field("pass_id", &self.pass_id)
            .finish()
    }
}

enum Command {
    Synchronize(oneshot::Sender<SyncHandle>),
    IsSynchronizing(oneshot::Sender<bool>),
    Reset {
        since: DateTime<Utc>,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    EraseSince {
        since: DateTime<Utc>,
        reply: oneshot::Sender<Result<usize, SyncError>>,
    },
    Cancel(oneshot::Sender<bool>),
}

/// In-memory marker of the running pass.
struct SyncSession {
    pass_id: u64,
    handle: SyncHandle,
    cancelled: Arc<AtomicBool>,
    resolve: oneshot::Sender<SyncOutcome>,
}

/// Cloneable client of an account's synchronizer actor.
#[derive(Clone)]
pub struct SynchronizerHandle {
    account_uid: String,
    commands: mpsc::Sender<Command>,
    bus: EventBus,
}

impl SynchronizerHandle {
    pub fn account_uid(&self) -> &str {
        &self.account_uid
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.bus.subscribe()
    }

    fn stopped(&self) -> SyncError {
        SyncError::Stopped(self.account_uid.clone())
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SyncError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| self.stopped())?;
        response.await.map_err(|_| self.stopped())
    }

    /// Start a pass, or join the one already running.
    pub async fn synchronize(&self) -> Result<SyncHandle, SyncError> {
        self.request(Command::Synchronize).await
    }

    pub async fn is_synchronizing(&self) -> bool {
        self.request(Command::IsSynchronizing)
            .await
            .unwrap_or(false)
    }

    /// Invalidate the persisted cursors so the next pass restarts from genesis.
    ///
    /// Operations dated at or after `since` are expected to have been deleted by the caller; see
    /// `erase_data_since`. Fails with `SyncInProgress` while a pass is running.
    pub async fn reset(&self, since: DateTime<Utc>) -> Result<(), SyncError> {
        self.request(|reply| Command::Reset { since, reply })
            .await?
    }

    /// Delete stored operations dated at or after `since`, then `reset`.
    ///
    /// Returns the number of deleted operations.
    pub async fn erase_data_since(&self, since: DateTime<Utc>) -> Result<usize, SyncError> {
        self.request(|reply| Command::EraseSince { since, reply })
            .await?
    }

    /// Ask the running pass to stop before its next page. Returns whether a pass was running.
    pub async fn cancel(&self) -> bool {
        self.request(Command::Cancel).await.unwrap_or(false)
    }
}

/// Drives synchronization passes of one account.
pub struct AccountSynchronizer {
    account: Account,
    adapter: Arc<dyn ChainAdapter>,
    store: Arc<dyn OperationStore + Send + Sync>,
    persistence: Arc<StatePersistenceService>,
    config: SyncConfig,
    bus: EventBus,
}

impl AccountSynchronizer {
    pub fn new(
        account: Account,
        adapter: Arc<dyn ChainAdapter>,
        store: Arc<dyn OperationStore + Send + Sync>,
        persistence: Arc<StatePersistenceService>,
        config: SyncConfig,
    ) -> Self {
        Self {
            account,
            adapter,
            store,
            persistence,
            config,
            bus: EventBus::new(),
        }
    }

    /// Start the actor task and return its handle.
    ///
    /// The actor stops once every handle is dropped and no pass is running.
    pub fn spawn(self) -> SynchronizerHandle {
        let (commands, receiver) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = SynchronizerHandle {
            account_uid: self.account.uid.clone(),
            commands,
            bus: self.bus.clone(),
        };

        let actor = SynchronizerActor::new(Arc::new(self), receiver);
        tokio::spawn(actor.run());
        handle
    }

    fn uid(&self) -> &str {
        &self.account.uid
    }

    /// One full pass over every feed of the adapter.
    async fn run_pass(&self, pass_id: u64, cancelled: &AtomicBool) -> Result<SyncReport, SyncError> {
        let started = std::time::Instant::now();
        info!(
            "[{}] Starting synchronization pass {} with {}",
            self.uid(),
            pass_id,
            self.adapter.name()
        );

        match self.adapter.get_account(&self.account).await {
            Ok(info) => {
                self.persistence.save_account_info(self.uid(), &info).await?;
            }
            Err(ExplorerError::AccountNotFound(address))
                if !self.adapter.unknown_account_has_no_history() =>
            {
                info!(
                    "[{}] Own address {} is unknown to the chain, paging the other watched addresses",
                    self.uid(),
                    address
                );
            }
            Err(ExplorerError::AccountNotFound(address)) => {
                info!(
                    "[{}] Address {} is unknown to the chain, nothing to synchronize",
                    self.uid(),
                    address
                );
                return Ok(SyncReport {
                    account_uid: self.uid().to_string(),
                    new_operations: 0,
                    last_block_height: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            }
            Err(e) => return Err(e.into()),
        }

        let mut state = match self.persistence.load_state(self.uid()).await? {
            Some(state) => {
                info!(
                    "[{}] Resuming from transactions cursor {:?}, operations cursor {:?}",
                    self.uid(),
                    state.transaction_paging_token,
                    state.operation_paging_token
                );
                state
            }
            None => {
                info!("[{}] No sync state, starting from genesis", self.uid());
                SyncState::default()
            }
        };

        let mut tracker = SyncProgressTracker::new(
            self.uid(),
            state.last_block_height,
            self.config.progress_log_interval,
        );

        for &feed in self.adapter.feeds() {
            self.sync_feed(feed, pass_id, cancelled, &mut state, &mut tracker)
                .await?;
        }

        tracker.log_progress(true);
        info!("[{}] {}", self.uid(), tracker.get_stats().summary());

        Ok(SyncReport {
            account_uid: self.uid().to_string(),
            new_operations: tracker.operations_inserted(),
            last_block_height: state.last_block_height,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Page through one feed until it is exhausted.
    async fn sync_feed(
        &self,
        feed: Feed,
        pass_id: u64,
        cancelled: &AtomicBool,
        state: &mut SyncState,
        tracker: &mut SyncProgressTracker,
    ) -> Result<(), SyncError> {
        let mut restarted = false;

        loop {
            if cancelled.load(Ordering::SeqCst) {
                info!("[{}] Pass {} cancelled", self.uid(), pass_id);
                return Err(SyncError::Cancelled);
            }

            let cursor = state.cursor(feed).map(str::to_string);
            let page = match self
                .adapter
                .fetch_page(&self.account, feed, cursor.as_deref())
                .await
            {
                Ok(page) => page,
                Err(ExplorerError::BlockNotFound(hash))
                    if self.config.restart_on_block_not_found && !restarted =>
                {
                    warn!(
                        "[{}] Resume block {} of the {:?} feed no longer exists, restarting it from genesis",
                        self.uid(),
                        hash,
                        feed
                    );
                    restarted = true;
                    let orphaned = self.erase_from_height(state.last_block_height).await?;
                    info!(
                        "[{}] Erased {} operations at or above block {} before restarting",
                        self.uid(),
                        orphaned,
                        state.last_block_height
                    );
                    state.set_cursor(feed, None);
                    state.last_block_height = 0;
                    self.persistence.save_state(self.uid(), state).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if page.is_empty() {
                debug!("[{}] {:?} feed exhausted at {:?}", self.uid(), feed, cursor);
                return Ok(());
            }
            for tx in &page.items {
                tx.check_amounts()?;
            }

            let operations: Vec<Operation> = page
                .items
                .iter()
                .flat_map(|tx| self.adapter.materialize(&self.account, tx))
                .collect();
            let inserted = self.store.commit_page(self.uid(), &operations).await?;

            let highest_block = page
                .items
                .iter()
                .filter_map(|tx| tx.block.as_ref().map(|b| b.height))
                .max();
            let next = self.adapter.next_cursor(feed, &page);
            let advanced = next.is_some() && next != cursor;

            state.inserted_operations += inserted as u64;
            if let Some(height) = highest_block {
                state.last_block_height = state.last_block_height.max(height);
            }
            if advanced {
                state.set_cursor(feed, next.clone());
            }
            self.persistence.save_state(self.uid(), state).await?;

            debug!(
                "[{}] Committed {:?} page: {} transactions, {} new operations, cursor {:?}",
                self.uid(),
                feed,
                page.len(),
                inserted,
                next
            );
            tracker.record_page(feed, page.len(), inserted, highest_block);
            tracker.log_progress(false);
            self.bus.post(SyncEvent::PageCommitted {
                account_uid: self.uid().to_string(),
                pass_id,
                feed,
                operations: inserted,
                cursor: next,
            });

            if !advanced {
                debug!("[{}] {:?} cursor did not advance, feed done", self.uid(), feed);
                return Ok(());
            }
        }
    }

    /// Delete every stored operation dated at or after the earliest operation that sits in a block
    /// at or above `height`, or in no block at all. Those are the operations a reorganization of
    /// the chain above `height` may have orphaned.
    async fn erase_from_height(&self, height: u64) -> Result<usize, SyncError> {
        let operations = self.store.query(self.uid(), &OperationFilter::all()).await?;
        let since = operations
            .iter()
            .filter(|op| op.block.as_ref().is_none_or(|b| b.height >= height))
            .map(|op| op.date)
            .min();

        match since {
            Some(since) => Ok(self.store.delete_since(self.uid(), since).await?),
            None => Ok(0),
        }
    }

    async fn reset(&self, since: DateTime<Utc>) -> Result<(), SyncError> {
        info!("[{}] Resetting sync state (data since {})", self.uid(), since);
        self.persistence.clear_state(self.uid()).await?;
        Ok(())
    }

    async fn erase_data_since(&self, since: DateTime<Utc>) -> Result<usize, SyncError> {
        let deleted = self.store.delete_since(self.uid(), since).await?;
        self.reset(since).await?;
        Ok(deleted)
    }
}

/// Actor owning the account's session.
struct SynchronizerActor {
    synchronizer: Arc<AccountSynchronizer>,
    commands: mpsc::Receiver<Command>,
    finished_tx: mpsc::UnboundedSender<(u64, SyncOutcome)>,
    finished_rx: mpsc::UnboundedReceiver<(u64, SyncOutcome)>,
    session: Option<SyncSession>,
    next_pass_id: u64,
}

impl SynchronizerActor {
    fn new(synchronizer: Arc<AccountSynchronizer>, commands: mpsc::Receiver<Command>) -> Self {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        Self {
            synchronizer,
            commands,
            finished_tx,
            finished_rx,
            session: None,
            next_pass_id: 1,
        }
    }

    async fn run(mut self) {
        let mut accepting = true;

        loop {
            tokio::select! {
                command = self.commands.recv(), if accepting => match command {
                    Some(command) => self.handle_command(command).await,
                    None => accepting = false,
                },
                Some((pass_id, outcome)) = self.finished_rx.recv() => {
                    self.finish(pass_id, outcome);
                }
            }

            if !accepting && self.session.is_none() {
                debug!(
                    "[{}] All handles dropped, synchronizer stopping",
                    self.synchronizer.uid()
                );
                return;
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Synchronize(reply) => {
                let handle = match &self.session {
                    Some(session) => {
                        debug!(
                            "[{}] Pass {} already running, joining it",
                            self.synchronizer.uid(),
                            session.pass_id
                        );
                        session.handle.clone()
                    }
                    None => self.start_pass(),
                };
                let _ = reply.send(handle);
            }
            Command::IsSynchronizing(reply) => {
                let _ = reply.send(self.session.is_some());
            }
            Command::Reset { since, reply } => {
                let result = match self.busy() {
                    Some(e) => Err(e),
                    None => self.synchronizer.reset(since).await,
                };
                let _ = reply.send(result);
            }
            Command::EraseSince { since, reply } => {
                let result = match self.busy() {
                    Some(e) => Err(e),
                    None => self.synchronizer.erase_data_since(since).await,
                };
                let _ = reply.send(result);
            }
            Command::Cancel(reply) => {
                let running = match &self.session {
                    Some(session) => {
                        info!(
                            "[{}] Cancelling pass {}",
                            self.synchronizer.uid(),
                            session.pass_id
                        );
                        session.cancelled.store(true, Ordering::SeqCst);
                        true
                    }
                    None => false,
                };
                let _ = reply.send(running);
            }
        }
    }

    fn busy(&self) -> Option<SyncError> {
        self.session
            .as_ref()
            .map(|_| SyncError::SyncInProgress(self.synchronizer.uid().to_string()))
    }

    fn start_pass(&mut self) -> SyncHandle {
        let pass_id = self.next_pass_id;
        self.next_pass_id += 1;

        let uid = self.synchronizer.uid().to_string();
        let (resolve, resolved) = oneshot::channel::<SyncOutcome>();
        let stopped_uid = uid.clone();
        let completion = resolved
            .map(move |outcome| {
                outcome.unwrap_or_else(|_| {
                    Err(SyncFailure::from(&SyncError::Stopped(stopped_uid)))
                })
            })
            .boxed()
            .shared();

        let handle = SyncHandle {
            pass_id,
            account_uid: uid.clone(),
            bus: self.synchronizer.bus.clone(),
            completion,
        };
        let cancelled = Arc::new(AtomicBool::new(false));

        self.session = Some(SyncSession {
            pass_id,
            handle: handle.clone(),
            cancelled: cancelled.clone(),
            resolve,
        });
        self.synchronizer.bus.post_sticky(SyncEvent::Started {
            account_uid: uid,
            pass_id,
        });

        let synchronizer = self.synchronizer.clone();
        let pass = tokio::spawn(async move {
            synchronizer
                .run_pass(pass_id, &cancelled)
                .await
                .map_err(|e| SyncFailure::from(&e))
        });

        // a panicking pass still has to end its session
        let finished = self.finished_tx.clone();
        tokio::spawn(async move {
            let outcome = pass.await.unwrap_or_else(|e| {
                Err(SyncFailure::from(&SyncError::Aborted(e.to_string())))
            });
            let _ = finished.send((pass_id, outcome));
        });

        handle
    }

    fn finish(&mut self, pass_id: u64, outcome: SyncOutcome) {
        let session = match self.session.take() {
            Some(session) if session.pass_id == pass_id => session,
            other => {
                error!(
                    "[{}] Pass {} finished without a matching session",
                    self.synchronizer.uid(),
                    pass_id
                );
                self.session = other;
                return;
            }
        };

        let uid = self.synchronizer.uid().to_string();
        let event = match &outcome {
            Ok(report) => {
                info!(
                    "[{}] Pass {} succeeded in {}ms with {} new operations",
                    uid, pass_id, report.duration_ms, report.new_operations
                );
                SyncEvent::Succeeded {
                    account_uid: uid,
                    pass_id,
                    duration_ms: report.duration_ms,
                    new_operations: report.new_operations,
                    last_block_height: report.last_block_height,
                }
            }
            Err(failure) => {
                if failure.kind == ErrorKind::Cancelled {
                    info!("[{}] Pass {} ended: {}", uid, pass_id, failure);
                } else {
                    error!("[{}] Pass {} failed: {}", uid, pass_id, failure);
                }
                SyncEvent::Failed {
                    account_uid: uid,
                    pass_id,
                    error_kind: failure.kind,
                    error_message: failure.message.clone(),
                }
            }
        };

        self.synchronizer.bus.post_sticky(event);
        let _ = session.resolve.send(outcome);
    }
}
