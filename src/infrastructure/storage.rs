//! Concurrent keyed storage shared by all components.
//!
//! Every per-resource, per-operation, per-rule and per-fingerprint map in the
//! kernel is a `ShardedStorage`. Updates to a single entry are serialized by
//! the shard lock that owns it; there is no lock spanning entries.

use dashmap::DashMap;
use std::fmt;
use std::hash::Hash;

/// Thread-safe sharded map backed by DashMap.
///
/// DashMap provides lock-free reads and fine-grained locking for writes.
/// Closures passed to the `with_*` methods run while the entry's shard is
/// locked, so they must not call back into the same storage.
pub struct ShardedStorage<K, V>
where
    K: Eq + Hash,
{
    map: DashMap<K, V>,
}

impl<K, V> ShardedStorage<K, V>
where
    K: Eq + Hash,
{
    /// Create a new sharded storage instance.
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// Access an entry mutably, creating it with `factory` if absent.
    pub fn with_entry_mut<R>(
        &self,
        key: K,
        factory: impl FnOnce() -> V,
        accessor: impl FnOnce(&mut V) -> R,
    ) -> R {
        let mut value_ref = self.map.entry(key).or_insert_with(factory);
        accessor(&mut value_ref)
    }

    /// Access an existing entry mutably. Returns `None` if the key is absent.
    pub fn with_existing_mut<Q, R>(&self, key: &Q, accessor: impl FnOnce(&mut V) -> R) -> Option<R>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get_mut(key).map(|mut value_ref| accessor(&mut value_ref))
    }

    /// Read an existing entry. Returns `None` if the key is absent.
    pub fn with_existing<Q, R>(&self, key: &Q, accessor: impl FnOnce(&V) -> R) -> Option<R>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get(key).map(|value_ref| accessor(&value_ref))
    }

    /// Insert or replace a value, returning the previous one.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.map.insert(key, value)
    }

    /// Remove a key and return its value.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.remove(key).map(|(_, v)| v)
    }

    /// Get the number of entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if the storage is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Collect a projection of every entry.
    ///
    /// Entries are visited in shard order; callers that need a stable order
    /// sort the result.
    pub fn collect<T>(&self, mut f: impl FnMut(&K, &V) -> T) -> Vec<T> {
        self.map
            .iter()
            .map(|entry| f(entry.key(), entry.value()))
            .collect()
    }
}

impl<K, V> Default for ShardedStorage<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for ShardedStorage<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedStorage")
            .field("len", &self.map.len())
            .finish()
    }
}
