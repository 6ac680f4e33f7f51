pub mod history;
pub mod sync;
pub mod types;

pub use history::{BalanceBucket, BalanceProjector, TimePeriod};
pub use sync::{AccountSynchronizer, SyncHandle, SynchronizerHandle};
pub use types::*;
