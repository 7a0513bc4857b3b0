use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::models::{CoreError, CoreResult};

/// Fixed-capacity map that evicts the oldest-inserted key once full.
///
/// Eviction follows first insertion only: overwriting a key with `put` or
/// `set` does not move it to the back of the line.
pub struct BoundedResultStore<K, V> {
    capacity: usize,
    state: Mutex<StoreState<K, V>>,
}

struct StoreState<K, V> {
    entries: HashMap<K, V>,
    insertion_order: VecDeque<K>,
}

impl<K, V> BoundedResultStore<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn new(capacity: usize) -> CoreResult<Self> {
        if capacity == 0 {
            return Err(CoreError::invalid_configuration(
                "result store capacity must be greater than zero",
            ));
        }

        Ok(Self {
            capacity,
            state: Mutex::new(StoreState {
                entries: HashMap::with_capacity(capacity),
                insertion_order: VecDeque::with_capacity(capacity),
            }),
        })
    }

    /// Inserts or overwrites `key`, returning the key evicted to make room.
    pub fn put(&self, key: K, value: V) -> Option<K> {
        let mut state = self.lock_state();

        if let Some(slot) = state.entries.get_mut(&key) {
            *slot = value;
            return None;
        }

        let evicted = if state.entries.len() >= self.capacity {
            let oldest = state.insertion_order.pop_front();
            if let Some(oldest) = &oldest {
                state.entries.remove(oldest);
            }
            oldest
        } else {
            None
        };

        state.insertion_order.push_back(key.clone());
        state.entries.insert(key, value);
        evicted
    }

    pub fn try_get(&self, key: &K) -> Option<V> {
        self.lock_state().entries.get(key).cloned()
    }

    /// Replaces the value of an existing key; unknown keys are left absent.
    pub fn set(&self, key: &K, value: V) -> bool {
        match self.lock_state().entries.get_mut(key) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Runs `f` against the stored value while holding the store lock.
    pub fn update<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.lock_state().entries.get_mut(key).map(f)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.lock_state().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys from oldest to newest insertion.
    pub fn keys(&self) -> Vec<K> {
        self.lock_state().insertion_order.iter().cloned().collect()
    }

    // Every mutation leaves `entries` and `insertion_order` consistent before it
    // can panic, so a poisoned guard is still safe to reuse.
    fn lock_state(&self) -> MutexGuard<'_, StoreState<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
