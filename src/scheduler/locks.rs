use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Lazily-created per-group async locks.
///
/// The map only holds weak references: a group's lock lives as long as some
/// task holds or waits on it, and dead entries are pruned on the next lookup.
#[derive(Default)]
pub struct GroupLocks {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl GroupLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, group_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(existing) = locks.get(group_id).and_then(Weak::upgrade) {
            return existing;
        }

        locks.retain(|_, weak| weak.strong_count() > 0);
        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(group_id.to_string(), Arc::downgrade(&lock));
        lock
    }

    /// Wait for exclusive access to a group
    pub async fn lock(&self, group_id: &str) -> OwnedMutexGuard<()> {
        self.handle(group_id).lock_owned().await
    }

    /// Exclusive access if nobody else holds the group right now
    pub fn try_lock(&self, group_id: &str) -> Option<OwnedMutexGuard<()>> {
        self.handle(group_id).try_lock_owned().ok()
    }

    /// Groups whose lock is currently referenced
    pub fn active(&self) -> usize {
        let locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.values().filter(|weak| weak.strong_count() > 0).count()
    }
}
