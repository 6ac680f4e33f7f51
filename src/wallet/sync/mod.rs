//! Account Synchronization Module
//!
//! This module provides all the core logic and services for synchronizing a local account with a
//! remote ledger. It is composed of several submodules, each responsible for a specific aspect of
//! the sync process:
//!
//! - `orchestrator`: The per-account synchronizer actor, its handles and the pass state machine.
//! - `events`: Lifecycle and progress events, the sticky per-account event bus and event handlers.
//! - `materializer`: Converts raw chain transactions into canonical SEND/RECEIVE operations.
//! - `observer`: Triggers synchronization of registered accounts when new blocks arrive.
//! - `progress_tracker`: Tracks pages, transactions and operations committed during a pass.
//! - `repositories`: Preferences (cursor blobs) and operation store abstractions with in-memory and
//!   file-backed implementations.
//! - `state_persistence`: Versioned persistence of per-account sync cursors and account info.
//! - `strategies`: The `ChainAdapter` abstraction and its paging-token and block-hash adapters.
//!
//! The orchestrator drives a chain adapter feed by feed, materializes every page, commits it
//! atomically to the operation store and only then advances the persisted cursor, which makes
//! every pass resumable after a crash.

/// Event system for lifecycle and progress notifications
pub mod events;
/// Raw transaction to canonical operation conversion
pub mod materializer;
/// New-block driven synchronization
pub mod observer;
/// Per-account synchronizer actor
pub mod orchestrator;
/// Tracks synchronization progress and statistics
pub mod progress_tracker;
/// Preferences and operation storage
pub mod repositories;
/// Sync cursor persistence
pub mod state_persistence;
/// Per-chain adapters
pub mod strategies;

pub use orchestrator::*;
