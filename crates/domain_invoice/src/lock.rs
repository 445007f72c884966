//! Per-account serialization
//!
//! At most one pass runs per account at a time. Passes for different
//! accounts never contend.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use core_kernel::AccountId;

use crate::error::InvoiceError;

/// Held for the duration of one pass
pub type AccountGuard = OwnedMutexGuard<()>;

/// Registry of per-account locks
#[derive(Debug, Default)]
pub struct AccountLocks {
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
    wait: Duration,
}

impl AccountLocks {
    pub fn new(wait: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            wait,
        }
    }

    /// Acquires the account's lock
    ///
    /// With a zero wait the lock is tried once; otherwise the call waits up
    /// to the configured duration.
    ///
    /// # Errors
    ///
    /// Returns `Concurrency` if another pass still holds the account.
    pub async fn acquire(&self, account_id: AccountId) -> Result<AccountGuard, InvoiceError> {
        // clone the Arc out so the shard lock is released before awaiting
        let mutex = self
            .locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = if self.wait.is_zero() {
            mutex.try_lock_owned().ok()
        } else {
            tokio::time::timeout(self.wait, mutex.lock_owned()).await.ok()
        };

        match guard {
            Some(guard) => Ok(guard),
            None => {
                debug!(account_id = %account_id, "Account is locked by another pass");
                Err(InvoiceError::Concurrency { account_id })
            }
        }
    }
}
