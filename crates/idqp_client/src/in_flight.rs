use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

/// Registry of operations currently awaiting the backend, keyed by what they act on.
///
/// Entries are released when the returned guard drops, so an entry never outlives the call
/// it tracks whichever way that call resolves.
#[derive(Debug)]
pub struct InFlight<K: Eq + Hash + Clone> {
    active: Mutex<HashMap<K, usize>>,
}

impl<K: Eq + Hash + Clone> Default for InFlight<K> {
    fn default() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
        }
    }
}

#[must_use = "the entry is released as soon as the guard is dropped"]
pub struct InFlightGuard<'a, K: Eq + Hash + Clone> {
    owner: &'a InFlight<K>,
    key: K,
}

impl<K: Eq + Hash + Clone> InFlight<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` exclusively; `None` when an operation on it is already running.
    pub fn try_begin(&self, key: K) -> Option<InFlightGuard<'_, K>> {
        let mut active = self.active.lock();
        if active.contains_key(&key) {
            return None;
        }
        active.insert(key.clone(), 1);
        Some(InFlightGuard { owner: self, key })
    }

    /// Register another operation on `key`; any number may overlap.
    pub fn begin(&self, key: K) -> InFlightGuard<'_, K> {
        *self.active.lock().entry(key.clone()).or_insert(0) += 1;
        InFlightGuard { owner: self, key }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.active.lock().contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.active.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.active.lock().keys().cloned().collect()
    }

    fn release(&self, key: &K) {
        let mut active = self.active.lock();
        if let Some(count) = active.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                active.remove(key);
            }
        }
    }
}

impl<K: Eq + Hash + Clone> Drop for InFlightGuard<'_, K> {
    fn drop(&mut self) {
        self.owner.release(&self.key);
    }
}
