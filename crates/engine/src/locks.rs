//! Per-account mutual exclusion for syncs.
//!
//! Two interleaved syncs of the same account would race on the cursor, so
//! every run holds the account's lock until it has recorded its outcome.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
pub(crate) struct AccountLocks {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl AccountLocks {
    /// Waits until no other sync holds `account_id`.
    pub(crate) async fn acquire(&self, account_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Drop entries nobody is holding or waiting on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(account_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Returns `true` if a sync currently holds `account_id`.
    pub(crate) fn is_locked(&self, account_id: Uuid) -> bool {
        let locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .get(&account_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }
}
