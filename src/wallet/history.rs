//! Balance history projection.
//!
//! Replays an account's operation log into a bucketed balance history. Balances are computed purely
//! from committed operations (`+amount` for RECEIVE, `-(amount + fee)` for SEND), never from a live
//! balance query, so the history always agrees with what the synchronizer stored.

use crate::wallet::sync::repositories::{OperationFilter, OperationStore};
use crate::wallet::{Operation, StoreError};

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

/// Width of one balance history bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimePeriod {
	Day,
	Week,
	Month,
	Year,
}

impl TimePeriod {
	/// `start` moved forward by `n` periods. Calendar periods are clamped to the month's last day.
	pub fn offset(&self, start: DateTime<Utc>, n: u32) -> Option<DateTime<Utc>> {
		match self {
			TimePeriod::Day => start.checked_add_signed(Duration::days(n as i64)),
			TimePeriod::Week => start.checked_add_signed(Duration::weeks(n as i64)),
			TimePeriod::Month => start.checked_add_months(Months::new(n)),
			TimePeriod::Year => start.checked_add_months(Months::new(n.checked_mul(12)?)),
		}
	}

	/// Bucket boundaries covering `[start, end]`: every period step strictly before `end`, then
	/// `end` itself.
	pub fn boundaries(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
		if start > end {
			return Vec::new();
		}

		let mut boundaries = Vec::new();
		let mut n = 0u32;
		while let Some(boundary) = self.offset(start, n) {
			if boundary >= end {
				break;
			}
			boundaries.push(boundary);
			n += 1;
		}
		boundaries.push(end);
		boundaries
	}
}

/// Balance at the end of one bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceBucket {
	pub date: DateTime<Utc>,
	pub balance: i128,
}

/// Replays operations into a bucketed balance history
#[derive(Debug, Clone)]
pub struct BalanceProjector {
	period: TimePeriod,
}

impl BalanceProjector {
	pub fn new(period: TimePeriod) -> Self {
		Self { period }
	}

	/// Final balance of the whole log.
	pub fn balance(operations: &[Operation]) -> i128 {
		operations.iter().map(Operation::balance_delta).sum()
	}

	/// One bucket per boundary in `[start, end]`, each holding the balance over every operation
	/// dated at or before that boundary. Buckets without activity carry the previous balance.
	pub fn project(
		&self,
		operations: &[Operation],
		start: DateTime<Utc>,
		end: DateTime<Utc>,
	) -> Vec<BalanceBucket> {
		let mut ordered: Vec<&Operation> = operations.iter().collect();
		ordered.sort_by_key(|op| op.date);

		let mut pending = ordered.into_iter().peekable();
		let mut running = 0i128;

		self.period
			.boundaries(start, end)
			.into_iter()
			.map(|boundary| {
				while let Some(op) = pending.next_if(|op| op.date <= boundary) {
					running += op.balance_delta();
				}
				BalanceBucket {
					date: boundary,
					balance: running,
				}
			})
			.collect()
	}

	/// Project the history of `account_uid` straight from the operation store.
	pub async fn balance_history(
		&self,
		store: &(dyn OperationStore + Send + Sync),
		account_uid: &str,
		start: DateTime<Utc>,
		end: DateTime<Utc>,
	) -> Result<Vec<BalanceBucket>, StoreError> {
		let operations = store
			.query(account_uid, &OperationFilter::all().until(end))
			.await?;
		Ok(self.project(&operations, start, end))
	}
}
