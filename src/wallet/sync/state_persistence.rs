//! State persistence service for account synchronization.
//!
//! This module provides the `StatePersistenceService`, which saves and restores the per-account
//! `SyncState` cursor record and the last fetched `AccountInfo`. It sits on top of a
//! `PreferencesRepository`, so the same service works with in-memory and file-backed stores.
//!
//! Cursor state is an opaque versioned blob: anything that fails to decode, or that was written by
//! a different synchronization algorithm version, is reported as "no state" and the next pass
//! starts from genesis.

use crate::explorer::AccountInfo;
use crate::wallet::StoreError;
use crate::wallet::sync::repositories::PreferencesRepository;
use crate::wallet::sync::strategies::Feed;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bump whenever cursor semantics change; older states are then discarded on load.
pub const SYNCHRONIZATION_ALGORITHM_VERSION: u32 = 1;

/// Persisted cursor record of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub algorithm_version: u32,
    /// Resume point of the transactions feed (paging token or block hash).
    pub transaction_paging_token: Option<String>,
    /// Resume point of the operations feed.
    pub operation_paging_token: Option<String>,
    /// Operations inserted over the lifetime of this state.
    pub inserted_operations: u64,
    /// Highest block height seen in a committed page.
    pub last_block_height: u64,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            algorithm_version: SYNCHRONIZATION_ALGORITHM_VERSION,
            transaction_paging_token: None,
            operation_paging_token: None,
            inserted_operations: 0,
            last_block_height: 0,
        }
    }
}

impl SyncState {
    pub fn cursor(&self, feed: Feed) -> Option<&str> {
        match feed {
            Feed::Transactions => self.transaction_paging_token.as_deref(),
            Feed::Operations => self.operation_paging_token.as_deref(),
        }
    }

    pub fn set_cursor(&mut self, feed: Feed, cursor: Option<String>) {
        match feed {
            Feed::Transactions => self.transaction_paging_token = cursor,
            Feed::Operations => self.operation_paging_token = cursor,
        }
    }
}

/// Service for managing cursor and account info persistence.
pub struct StatePersistenceService {
    preferences: Arc<dyn PreferencesRepository + Send + Sync>,
}

impl StatePersistenceService {
    pub fn new(preferences: Arc<dyn PreferencesRepository + Send + Sync>) -> Self {
        Self { preferences }
    }

    fn state_key(account_uid: &str) -> String {
        format!("{}/sync_state", account_uid)
    }

    fn account_key(account_uid: &str) -> String {
        format!("{}/account_info", account_uid)
    }

    /// Load the account's cursor state, or `None` when there is no valid state.
    pub async fn load_state(&self, account_uid: &str) -> Result<Option<SyncState>, StoreError> {
        let Some(bytes) = self
            .preferences
            .get_object(&Self::state_key(account_uid))
            .await?
        else {
            return Ok(None);
        };

        match bincode::deserialize::<SyncState>(&bytes) {
            Ok(state) if state.algorithm_version == SYNCHRONIZATION_ALGORITHM_VERSION => {
                debug!("Loaded sync state of {}: {:?}", account_uid, state);
                Ok(Some(state))
            }
            Ok(state) => {
                warn!(
                    "Discarding sync state of {} written by algorithm version {} (current {})",
                    account_uid, state.algorithm_version, SYNCHRONIZATION_ALGORITHM_VERSION
                );
                Ok(None)
            }
            Err(e) => {
                warn!("Discarding undecodable sync state of {}: {}", account_uid, e);
                Ok(None)
            }
        }
    }

    /// Durably store the account's cursor state.
    pub async fn save_state(&self, account_uid: &str, state: &SyncState) -> Result<(), StoreError> {
        let bytes = bincode::serialize(state)?;
        self.preferences
            .put_object(&Self::state_key(account_uid), &bytes)
            .await
    }

    /// Forget the account's cursors; the next pass starts from genesis.
    pub async fn clear_state(&self, account_uid: &str) -> Result<(), StoreError> {
        self.preferences
            .remove(&Self::state_key(account_uid))
            .await?;
        info!("Cleared sync state of {}", account_uid);
        Ok(())
    }

    pub async fn save_account_info(
        &self,
        account_uid: &str,
        info: &AccountInfo,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(info)?;
        self.preferences
            .put_object(&Self::account_key(account_uid), &bytes)
            .await
    }

    pub async fn load_account_info(
        &self,
        account_uid: &str,
    ) -> Result<Option<AccountInfo>, StoreError> {
        match self
            .preferences
            .get_object(&Self::account_key(account_uid))
            .await?
        {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::sync::repositories::InMemoryPreferencesRepository;

    fn service() -> (Arc<InMemoryPreferencesRepository>, StatePersistenceService) {
        let prefs = Arc::new(InMemoryPreferencesRepository::new());
        (prefs.clone(), StatePersistenceService::new(prefs))
    }

    #[tokio::test]
    async fn saved_state_is_loaded_back() {
        let (_, service) = service();
        assert_eq!(service.load_state("acc").await.unwrap(), None);

        let state = SyncState {
            transaction_paging_token: Some("123".into()),
            inserted_operations: 4,
            last_block_height: 77,
            ..SyncState::default()
        };
        service.save_state("acc", &state).await.unwrap();
        assert_eq!(service.load_state("acc").await.unwrap(), Some(state));
        assert_eq!(service.load_state("other").await.unwrap(), None);

        service.clear_state("acc").await.unwrap();
        assert_eq!(service.load_state("acc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn version_mismatch_is_treated_as_no_state() {
        let (_, service) = service();
        let stale = SyncState {
            algorithm_version: SYNCHRONIZATION_ALGORITHM_VERSION + 1,
            transaction_paging_token: Some("999".into()),
            ..SyncState::default()
        };
        service.save_state("acc", &stale).await.unwrap();

        assert_eq!(service.load_state("acc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn garbage_blob_is_treated_as_no_state() {
        let (prefs, service) = service();
        prefs.put_object("acc/sync_state", &[1, 2]).await.unwrap();

        assert_eq!(service.load_state("acc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn account_info_is_persisted() {
        let (_, service) = service();
        let info = AccountInfo {
            address: "GW".into(),
            sequence: 42,
            balance: 1_000_000,
            subentry_count: 1,
        };
        service.save_account_info("acc", &info).await.unwrap();

        assert_eq!(service.load_account_info("acc").await.unwrap(), Some(info));
    }
}
