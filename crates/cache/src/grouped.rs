//! Access-ordered multimap used by the reuse pools.
//!
//! `GroupedLruMap` groups values under equal keys and keeps the groups in
//! access order, so the pools can answer "give me a value for exactly this
//! key" and "evict the globally coldest value" in constant time. All byte
//! accounting lives in the owning pool; this structure only tracks
//! membership and recency.

use std::collections::VecDeque;
use std::hash::Hash;

use lru::LruCache;

/// Map from key to a queue of values sharing that key, with LRU ordering
/// across keys.
///
/// Both `put` and `get` mark the touched key as most recently used.
/// Within a group, values form a queue: `get` returns the most recently
/// stored value, while `remove_last` evicts the oldest value of the
/// coldest group.
pub struct GroupedLruMap<K: Eq + Hash + Copy, V> {
    groups: LruCache<K, VecDeque<V>>,
    len: usize,
}

impl<K: Eq + Hash + Copy, V> GroupedLruMap<K, V> {
    pub fn new() -> Self {
        Self {
            groups: LruCache::unbounded(),
            len: 0,
        }
    }

    /// Stores `value` under `key` and marks the group as most recently
    /// used.
    pub fn put(&mut self, key: K, value: V) {
        if let Some(group) = self.groups.get_mut(&key) {
            group.push_back(value);
        } else {
            let mut group = VecDeque::with_capacity(1);
            group.push_back(value);
            self.groups.put(key, group);
        }
        self.len += 1;
    }

    /// Removes and returns the most recently stored value for `key`,
    /// marking the group as most recently used. Empty groups are dropped.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let group = self.groups.get_mut(key)?;
        let value = group.pop_back();
        if group.is_empty() {
            self.groups.pop(key);
        }
        if value.is_some() {
            self.len -= 1;
        }
        value
    }

    /// Removes and returns the oldest value belonging to the least
    /// recently used key, or `None` if the map is empty.
    ///
    /// The group keeps its position in the recency order, so repeated
    /// calls drain one cold group before moving to the next.
    pub fn remove_last(&mut self) -> Option<V> {
        let key = *self.groups.peek_lru().map(|(key, _)| key)?;
        let group = self.groups.peek_mut(&key)?;
        let value = group.pop_front();
        if group.is_empty() {
            self.groups.pop(&key);
        }
        if value.is_some() {
            self.len -= 1;
        }
        value
    }

    /// Total number of stored values across all groups.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<K: Eq + Hash + Copy, V> Default for GroupedLruMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_returns_most_recently_put() {
        let mut map = GroupedLruMap::new();
        map.put(1u32, "a");
        map.put(1u32, "b");

        assert_eq!(map.get(&1), Some("b"));
        assert_eq!(map.get(&1), Some("a"));
        assert_eq!(map.get(&1), None);
        assert!(map.is_empty());
    }

    #[test]
    fn test_remove_last_evicts_coldest_group() {
        let mut map = GroupedLruMap::new();
        map.put(1u32, "one");
        map.put(2u32, "two");
        map.put(3u32, "three");

        // Touch group 1 so group 2 becomes the coldest.
        map.put(1u32, "one again");

        assert_eq!(map.remove_last(), Some("two"));
        assert_eq!(map.remove_last(), Some("three"));
    }

    #[test]
    fn test_get_promotes_group() {
        let mut map = GroupedLruMap::new();
        map.put(1u32, "one");
        map.put(1u32, "bonus");
        map.put(2u32, "two");

        // Reading group 1 makes group 2 the eviction candidate.
        assert_eq!(map.get(&1), Some("bonus"));
        assert_eq!(map.remove_last(), Some("two"));
    }

    #[test]
    fn test_remove_last_drains_group_fifo() {
        let mut map = GroupedLruMap::new();
        map.put(7u32, "first");
        map.put(7u32, "second");

        assert_eq!(map.remove_last(), Some("first"));
        assert_eq!(map.remove_last(), Some("second"));
        assert_eq!(map.remove_last(), None);
    }

    #[test]
    fn test_len_counts_values_not_groups() {
        let mut map = GroupedLruMap::new();
        map.put(1u32, "a");
        map.put(1u32, "b");
        map.put(2u32, "c");
        assert_eq!(map.len(), 3);

        map.get(&1);
        assert_eq!(map.len(), 2);
        map.remove_last();
        map.remove_last();
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn test_get_missing_key() {
        let mut map: GroupedLruMap<u32, &str> = GroupedLruMap::new();
        assert_eq!(map.get(&42), None);
        assert_eq!(map.remove_last(), None);
    }
}
