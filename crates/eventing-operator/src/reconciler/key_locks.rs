use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::client::ObjectKey;

type Locks = BTreeMap<ObjectKey, Arc<AsyncMutex<()>>>;

/// Serializes work on the same key across tasks.
///
/// The controller and the deletion watch both reconcile `KnativeEventing` keys, holding the
/// lock of a key for the whole reconcile keeps them from interleaving. Locks of different keys
/// are independent. Entries are dropped once nobody holds or waits for them.
#[derive(Clone, Debug, Default)]
pub struct KeyLocks {
    locks: Arc<Mutex<Locks>>,
}

impl KeyLocks {
    /// Waits until `key` is free and holds it until the guard is dropped.
    pub async fn lock(&self, key: &ObjectKey) -> KeyGuard {
        let lock = Arc::clone(self.entries().entry(key.clone()).or_default());
        let guard = lock.lock_owned().await;

        KeyGuard {
            locks: self.clone(),
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Number of keys that are currently held or waited for.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, Locks> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds the lock of one key, see [`KeyLocks::lock`].
#[derive(Debug)]
pub struct KeyGuard {
    locks: KeyLocks,
    key: ObjectKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();

        let mut entries = self.locks.entries();
        // Only the map itself still refers to an unused lock.
        if entries
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            entries.remove(&self.key);
        }
    }
}
