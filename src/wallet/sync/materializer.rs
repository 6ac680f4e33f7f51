//! Operation materialization.
//!
//! Turns one raw chain transaction into the canonical SEND/RECEIVE operations of a local account.
//! Materialization is pure: the same transaction and account always produce the same operations
//! with the same uids, which is what lets the store treat re-synchronized pages as no-ops.

use crate::explorer::{SubOperation, Transaction};
use crate::wallet::{Account, Operation, OperationType, TrustLevel};

use sha2::{Digest, Sha256};

/// Deterministic operation identifier.
///
/// Derived from the account, the transaction, the sub-operation and the emitted type, never from
/// a position in a page.
pub fn operation_uid(
    account_uid: &str,
    transaction_hash: &str,
    sub_operation_id: &str,
    kind: OperationType,
) -> String {
    let digest = Sha256::digest(format!(
        "uid:{}+{}+{}+{}",
        account_uid, transaction_hash, sub_operation_id, kind
    ));
    hex::encode(digest)
}

/// Converts raw transactions into canonical operations for one account.
#[derive(Debug, Clone, Default)]
pub struct OperationMaterializer;

impl OperationMaterializer {
    pub fn new() -> Self {
        Self
    }

    /// Materialize every operation `tx` produces for `account`, in sub-operation order.
    ///
    /// A sub-operation emits a SEND when its source is watched and a RECEIVE when its destination
    /// is watched (both for a transfer between two watched addresses). The fee goes on the first
    /// SEND when the transaction's fee payer is watched. When no operation was emitted and the last
    /// sub-operation originates from the account's own address, a zero-amount SEND carrying the
    /// fee is emitted instead, so the fee is recorded exactly once.
    pub fn materialize(&self, account: &Account, tx: &Transaction) -> Vec<Operation> {
        let keychain = &account.keychain;
        let payer_is_watched = keychain.contains(&tx.source);
        let last_index = tx.sub_operations.len().saturating_sub(1);

        let mut operations = Vec::new();
        let mut created = 0usize;
        let mut fee_recorded = false;

        for (index, sub) in tx.sub_operations.iter().enumerate() {
            let source = sub.source.as_deref().unwrap_or(&tx.source);
            let destination = sub.destination.as_deref();
            let moves_value = tx.successful && sub.kind.is_value_moving();

            if moves_value && keychain.contains(source) {
                let fee = if !fee_recorded && payer_is_watched {
                    fee_recorded = true;
                    Some(tx.fee)
                } else {
                    None
                };
                operations.push(self.build(account, tx, sub, OperationType::Send, sub.amount, fee));
                created += 1;
            }

            if moves_value && destination.is_some_and(|d| keychain.contains(d)) {
                operations.push(self.build(
                    account,
                    tx,
                    sub,
                    OperationType::Receive,
                    sub.amount,
                    None,
                ));
                created += 1;
            }

            if index == last_index && created == 0 && source == keychain.own_address() {
                operations.push(self.build(account, tx, sub, OperationType::Send, 0, Some(tx.fee)));
            }
        }

        operations
    }

    /// Materialize a whole page, preserving transaction order.
    pub fn materialize_all<'a>(
        &self,
        account: &Account,
        transactions: impl IntoIterator<Item = &'a Transaction>,
    ) -> Vec<Operation> {
        transactions
            .into_iter()
            .flat_map(|tx| self.materialize(account, tx))
            .collect()
    }

    fn build(
        &self,
        account: &Account,
        tx: &Transaction,
        sub: &SubOperation,
        kind: OperationType,
        amount: u128,
        fee: Option<u128>,
    ) -> Operation {
        let source = sub.source.clone().unwrap_or_else(|| tx.source.clone());
        Operation {
            account_uid: account.uid.clone(),
            uid: operation_uid(&account.uid, &tx.hash, &sub.id, kind),
            transaction_hash: tx.hash.clone(),
            kind,
            amount,
            fee,
            senders: vec![source],
            recipients: sub.destination.iter().cloned().collect(),
            date: tx.timestamp,
            block: tx.block.clone(),
            trust: if tx.block.is_some() {
                TrustLevel::Trusted
            } else {
                TrustLevel::Pending
            },
        }
    }
}
