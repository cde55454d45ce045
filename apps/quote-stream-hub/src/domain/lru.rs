//! Bounded Least-Recently-Used Map
//!
//! A fixed-capacity map that evicts the least-recently-used entry when a new
//! key would exceed capacity. Recency is a monotonically increasing stamp
//! per access; the stamp index gives O(log n) eviction.
//!
//! The map is not synchronized. Owners wrap it in a lock.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    stamp: u64,
}

/// Fixed-capacity map with least-recently-used eviction.
#[derive(Debug, Clone)]
pub struct LruMap<K, V> {
    capacity: usize,
    clock: u64,
    entries: HashMap<K, Slot<V>>,
    recency: BTreeMap<u64, K>,
}

impl<K, V> LruMap<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create a map holding at most `capacity` entries (minimum one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            clock: 0,
            entries: HashMap::with_capacity(capacity.min(1024)),
            recency: BTreeMap::new(),
        }
    }

    /// Maximum number of entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` is present. Does not touch recency.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Look up `key` and mark it most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_mut(key).map(|value| &*value)
    }

    /// Mutable lookup; marks the entry most recently used.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let stamp = self.tick();
        let slot = self.entries.get_mut(key)?;
        if let Some(owned) = self.recency.remove(&slot.stamp) {
            self.recency.insert(stamp, owned);
        }
        slot.stamp = stamp;
        Some(&mut slot.value)
    }

    /// Look up `key` without touching recency.
    #[must_use]
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|slot| &slot.value)
    }

    /// Insert or replace `key`, marking it most recently used.
    ///
    /// Returns the entry evicted to make room, if any. Replacing an existing
    /// key never evicts.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        let stamp = self.tick();

        if let Some(slot) = self.entries.get_mut(&key) {
            self.recency.remove(&slot.stamp);
            self.recency.insert(stamp, key);
            slot.stamp = stamp;
            slot.value = value;
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.pop_least_recent()
        } else {
            None
        };

        self.recency.insert(stamp, key.clone());
        self.entries.insert(key, Slot { value, stamp });
        evicted
    }

    /// Remove `key`, returning its value.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.stamp);
        Some(slot.value)
    }

    /// Remove every entry for which `keep` returns false.
    ///
    /// Returns the number of removed entries.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) -> usize {
        let before = self.entries.len();
        let recency = &mut self.recency;
        self.entries.retain(|key, slot| {
            let kept = keep(key, &slot.value);
            if !kept {
                recency.remove(&slot.stamp);
            }
            kept
        });
        before - self.entries.len()
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.recency.values()
    }

    fn pop_least_recent(&mut self) -> Option<(K, V)> {
        let (_, key) = self.recency.pop_first()?;
        let slot = self.entries.remove(&key)?;
        Some((key, slot.value))
    }

    const fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}
