//! Per-controller mutual exclusion.
//!
//! One async mutex per controller id, created on first use. The map only
//! holds weak references, so a lock disappears once nobody holds or waits
//! for it; dead entries are pruned when the map grows.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::model::ObjectId;
use crate::{Error, Result};

/// Held for the duration of one setup / recompute / unsubscribe.
pub type ControllerGuard = OwnedMutexGuard<()>;

const PRUNE_THRESHOLD: usize = 128;

pub struct ControllerLocks {
    locks: Mutex<HashMap<ObjectId, Weak<AsyncMutex<()>>>>,
    timeout: Option<Duration>,
}

impl ControllerLocks {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { locks: Mutex::new(HashMap::new()), timeout }
    }

    fn handle(&self, id: &ObjectId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        if locks.len() > PRUNE_THRESHOLD {
            locks.retain(|_, weak| weak.strong_count() > 0);
        }
        if let Some(existing) = locks.get(id).and_then(Weak::upgrade) {
            return existing;
        }
        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(id.clone(), Arc::downgrade(&lock));
        lock
    }

    /// Wait for the lock of `id`. Fails with `Error::Lock` if a timeout is
    /// configured and expires first.
    pub async fn acquire(&self, id: &ObjectId) -> Result<ControllerGuard> {
        let lock = self.handle(id);
        match self.timeout {
            None => Ok(lock.lock_owned().await),
            Some(limit) => tokio::time::timeout(limit, lock.lock_owned())
                .await
                .map_err(|_| Error::Lock(format!("controller {id}: not acquired within {limit:?}"))),
        }
    }

    /// Number of locks currently held or awaited.
    pub fn live(&self) -> usize {
        self.locks.lock().values().filter(|w| w.strong_count() > 0).count()
    }
}
