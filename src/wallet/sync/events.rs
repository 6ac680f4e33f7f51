//! Event system for account synchronization.
//!
//! This module defines the lifecycle and progress events of a synchronization pass, the per-account
//! `EventBus` they are posted on, and the handler/dispatcher pair used to react to them. Lifecycle
//! events (`SYNCHRONIZATION_STARTED`, `SYNCHRONIZATION_SUCCEED`, `SYNCHRONIZATION_FAILED`) are
//! sticky: a subscriber that arrives after the fact still observes the latest one. Page progress
//! events are live only.

use crate::explorer::ErrorKind;
use crate::wallet::SyncError;
use crate::wallet::sync::strategies::Feed;

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the live event channel; slow subscribers skip what they missed.
const LIVE_CHANNEL_CAPACITY: usize = 256;

/// Events that occur during account synchronization
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SyncEvent {
    /// A pass started
    Started { account_uid: String, pass_id: u64 },
    /// A pass completed successfully
    Succeeded {
        account_uid: String,
        pass_id: u64,
        duration_ms: u64,
        new_operations: usize,
        last_block_height: u64,
    },
    /// A pass ended with an error
    Failed {
        account_uid: String,
        pass_id: u64,
        error_kind: ErrorKind,
        error_message: String,
    },
    /// One page was committed and its cursor persisted
    PageCommitted {
        account_uid: String,
        pass_id: u64,
        feed: Feed,
        operations: usize,
        cursor: Option<String>,
    },
}

impl SyncEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::Started { .. } => "SYNCHRONIZATION_STARTED",
            SyncEvent::Succeeded { .. } => "SYNCHRONIZATION_SUCCEED",
            SyncEvent::Failed { .. } => "SYNCHRONIZATION_FAILED",
            SyncEvent::PageCommitted { .. } => "PAGE_COMMITTED",
        }
    }

    pub fn pass_id(&self) -> u64 {
        match self {
            SyncEvent::Started { pass_id, .. }
            | SyncEvent::Succeeded { pass_id, .. }
            | SyncEvent::Failed { pass_id, .. }
            | SyncEvent::PageCommitted { pass_id, .. } => *pass_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncEvent::Succeeded { .. } | SyncEvent::Failed { .. })
    }
}

/// Per-account event channel with sticky lifecycle events.
#[derive(Clone)]
pub struct EventBus {
    sticky: Arc<watch::Sender<Option<SyncEvent>>>,
    live: broadcast::Sender<SyncEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sticky, _) = watch::channel(None);
        let (live, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        Self {
            sticky: Arc::new(sticky),
            live,
        }
    }

    /// Post a live-only event.
    pub fn post(&self, event: SyncEvent) {
        debug!("Posting {}", event.name());
        // no subscribers is not an error
        let _ = self.live.send(event);
    }

    /// Post an event that late subscribers still observe.
    pub fn post_sticky(&self, event: SyncEvent) {
        debug!("Posting sticky {}", event.name());
        self.sticky.send_replace(Some(event.clone()));
        let _ = self.live.send(event);
    }

    /// Latest sticky event, if any was posted.
    pub fn latest(&self) -> Option<SyncEvent> {
        self.sticky.borrow().clone()
    }

    /// Subscribe to events. The latest sticky event is replayed first.
    pub fn subscribe(&self) -> EventSubscription {
        let receiver = self.live.subscribe();
        EventSubscription {
            replay: self.latest(),
            replayed: None,
            receiver,
        }
    }
}

/// Receiving end of an `EventBus`.
pub struct EventSubscription {
    replay: Option<SyncEvent>,
    replayed: Option<SyncEvent>,
    receiver: broadcast::Receiver<SyncEvent>,
}

impl EventSubscription {
    /// Next event, or `None` once every bus handle is dropped.
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        if let Some(event) = self.replay.take() {
            self.replayed = Some(event.clone());
            return Some(event);
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    // sticky event posted between subscribing and the snapshot
                    if self.replayed.take().as_ref() == Some(&event) {
                        continue;
                    }
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event subscriber lagged, skipped {} events", skipped);
                    self.replayed = None;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Trait for handling sync events.
///
/// Implementors receive all sync events and can perform side effects or state updates.
#[async_trait::async_trait]
pub trait SyncEventHandler: Send + Sync {
    /// Handle a sync event.
    async fn handle(&mut self, event: &SyncEvent) -> Result<(), SyncError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Event dispatcher that manages multiple event handlers.
///
/// Handlers are called in registration order for each event.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Box<dyn SyncEventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn register_handler(&mut self, handler: Box<dyn SyncEventHandler>) {
        self.handlers.push(handler);
    }

    /// Dispatch an event to all registered handlers.
    ///
    /// Errors from handlers are logged, but do not stop other handlers from running.
    pub async fn dispatch(&mut self, event: &SyncEvent) {
        for handler in &mut self.handlers {
            if let Err(e) = handler.handle(event).await {
                error!("Handler {} failed to process event: {}", handler.name(), e);
            }
        }
    }

    /// Dispatch every event of `subscription` on a background task until the bus closes.
    pub fn spawn(mut self, mut subscription: EventSubscription) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                self.dispatch(&event).await;
            }
        })
    }
}

/// Logs every event.
pub struct LoggingEventHandler;

#[async_trait::async_trait]
impl SyncEventHandler for LoggingEventHandler {
    async fn handle(&mut self, event: &SyncEvent) -> Result<(), SyncError> {
        match event {
            SyncEvent::Started {
                account_uid,
                pass_id,
            } => info!("[{}] pass {} started", account_uid, pass_id),
            SyncEvent::Succeeded {
                account_uid,
                pass_id,
                duration_ms,
                new_operations,
                last_block_height,
            } => info!(
                "[{}] pass {} succeeded in {}ms: {} new operations, block height {}",
                account_uid, pass_id, duration_ms, new_operations, last_block_height
            ),
            SyncEvent::Failed {
                account_uid,
                pass_id,
                error_kind,
                error_message,
            } => warn!(
                "[{}] pass {} failed ({}): {}",
                account_uid, pass_id, error_kind, error_message
            ),
            SyncEvent::PageCommitted {
                account_uid,
                feed,
                operations,
                cursor,
                ..
            } => debug!(
                "[{}] committed {:?} page with {} operations, cursor {:?}",
                account_uid, feed, operations, cursor
            ),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LoggingEventHandler"
    }
}
