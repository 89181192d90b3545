use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::types::UserId;

/// per-payer serialization point for balance check plus payment insert
///
/// Holding a payer's guard across "read balance, create pending payment"
/// means a second concurrent settlement for the same payer observes the
/// first one's reservation.
#[derive(Debug, Default)]
pub struct PayerLocks {
    locks: Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>,
}

/// released on drop
#[derive(Debug)]
pub struct PayerGuard {
    payer_id: UserId,
    _guard: OwnedMutexGuard<()>,
}

impl PayerGuard {
    pub fn payer_id(&self) -> UserId {
        self.payer_id
    }
}

impl PayerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, payer_id: UserId) -> PayerGuard {
        let lock = {
            let mut locks = self.locks.lock();
            // entries only referenced by the map are idle
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(payer_id).or_default().clone()
        };
        PayerGuard {
            payer_id,
            _guard: lock.lock_owned().await,
        }
    }

    /// payers with a lock entry still alive
    pub fn tracked(&self) -> usize {
        self.locks.lock().len()
    }
}
