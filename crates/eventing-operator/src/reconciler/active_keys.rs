use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::client::ObjectKey;

/// The keys of all `KnativeEventing` resources that currently exist.
///
/// Clones share the same set. The manifest is shared by all of these resources, so it may only
/// be torn down once the last of them is gone.
#[derive(Clone, Debug, Default)]
pub struct ActiveKeySet {
    keys: Arc<Mutex<BTreeSet<ObjectKey>>>,
}

impl ActiveKeySet {
    /// Returns `true` if the key was not present before.
    pub fn insert(&self, key: ObjectKey) -> bool {
        self.lock().insert(key)
    }

    /// Removes `key` and returns whether this emptied the set.
    ///
    /// Removing a key that is not present never reports the set as emptied, so repeated
    /// deletion events of the same resource trigger at most one teardown.
    pub fn remove(&self, key: &ObjectKey) -> bool {
        let mut keys = self.lock();
        keys.remove(key) && keys.is_empty()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// The current keys, sorted.
    pub fn snapshot(&self) -> Vec<ObjectKey> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<ObjectKey>> {
        // The set stays consistent even if a holder panicked, every operation is a single call.
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
