//! Generic byte-budgeted LRU cache for whole decoded resources.
//!
//! Unlike the reuse pools, this cache keeps resources alive for repeat
//! lookups by key; it does not recycle allocations. Size accounting is
//! pluggable so the same cache works for pixel buffers, decoded frames,
//! or anything else with a meaningful byte size.

use std::hash::Hash;
use std::sync::Mutex;

use log::trace;
use lru::LruCache;

use crate::pressure::{PressureLevel, TrimAction};

/// Reports the byte size of a cached resource.
///
/// The size is captured once at `put` time and retained until the entry
/// leaves the cache, so accounting stays consistent even if the reported
/// size would change over the resource's lifetime.
pub trait ResourceSizer<R>: Send {
    fn size_of(&self, resource: &R) -> usize;
}

impl<R, F> ResourceSizer<R> for F
where
    F: Fn(&R) -> usize + Send,
{
    fn size_of(&self, resource: &R) -> usize {
        self(resource)
    }
}

/// Observer for resources forced out of the cache.
///
/// Invoked once per resource evicted to satisfy the byte budget (including
/// a `put` whose item is too large to ever fit). It is *not* invoked for
/// an application-initiated [`remove`](LruResourceCache::remove), and not
/// for a value displaced by `put` (the displaced value is returned to the
/// `put` caller instead). Callers relying on the eviction/removal
/// distinction get it from this calling convention.
///
/// The listener runs while the cache's internal lock is held, so it must
/// not call back into the cache.
pub trait EvictionListener<K, R>: Send {
    fn on_resource_evicted(&self, key: &K, resource: R);
}

impl<K, R, F> EvictionListener<K, R> for F
where
    F: Fn(&K, R) + Send,
{
    fn on_resource_evicted(&self, key: &K, resource: R) {
        self(key, resource)
    }
}

struct SizedEntry<R> {
    resource: R,
    size: usize,
}

struct CacheState<K: Eq + Hash, R> {
    entries: LruCache<K, SizedEntry<R>>,
    listener: Option<Box<dyn EvictionListener<K, R>>>,
    sizer: Box<dyn ResourceSizer<R>>,
    initial_max_size: usize,
    max_size: usize,
    current_size: usize,
}

impl<K: Eq + Hash, R> CacheState<K, R> {
    /// Evicts oldest-first until the cache holds at most `target` bytes,
    /// notifying the listener for each victim.
    fn trim_to_size(&mut self, target: usize) {
        while self.current_size > target {
            let Some((key, entry)) = self.entries.pop_lru() else {
                break;
            };
            self.current_size -= entry.size;
            trace!("evicting resource of {} bytes", entry.size);
            if let Some(listener) = &self.listener {
                listener.on_resource_evicted(&key, entry.resource);
            }
        }
    }
}

/// Access-ordered LRU cache from key to sized resource.
///
/// Every mutating call evicts oldest entries until the cache fits its
/// byte budget again. Reads promote recency.
///
/// # Example
///
/// ```
/// use imgpipe_cache::LruResourceCache;
///
/// let cache: LruResourceCache<u64, Vec<u8>> =
///     LruResourceCache::new(1024, |resource: &Vec<u8>| resource.len());
/// cache.put(1, vec![0u8; 512]);
///
/// assert_eq!(cache.get(&1).map(|r| r.len()), Some(512));
/// ```
pub struct LruResourceCache<K: Eq + Hash, R> {
    state: Mutex<CacheState<K, R>>,
}

impl<K: Eq + Hash, R> LruResourceCache<K, R> {
    /// Creates a cache with the given byte budget and size function.
    pub fn new(max_size: usize, sizer: impl ResourceSizer<R> + 'static) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                listener: None,
                sizer: Box::new(sizer),
                initial_max_size: max_size,
                max_size,
                current_size: 0,
            }),
        }
    }

    /// Installs the eviction observer. See [`EvictionListener`] for when
    /// it is and is not invoked.
    pub fn set_eviction_listener(&self, listener: impl EvictionListener<K, R> + 'static) {
        let mut state = self.state.lock().unwrap();
        state.listener = Some(Box::new(listener));
    }

    /// Stores a resource, returning the previously cached resource for
    /// this key if one was displaced.
    ///
    /// A resource at least as large as the whole budget can never be
    /// cached; it is handed straight to the eviction listener and `None`
    /// is returned.
    pub fn put(&self, key: K, resource: R) -> Option<R> {
        let mut state = self.state.lock().unwrap();

        let size = state.sizer.size_of(&resource);
        if size >= state.max_size {
            trace!("resource of {size} bytes can never fit, not caching");
            if let Some(listener) = &state.listener {
                listener.on_resource_evicted(&key, resource);
            }
            return None;
        }

        state.current_size += size;
        let old = state.entries.put(key, SizedEntry { resource, size });
        if let Some(old) = &old {
            state.current_size -= old.size;
        }

        let target = state.max_size;
        state.trim_to_size(target);
        old.map(|entry| entry.resource)
    }

    /// Removes and returns the resource for `key`, if cached.
    ///
    /// The eviction listener is not invoked; the caller takes ownership.
    pub fn remove(&self, key: &K) -> Option<R> {
        let mut state = self.state.lock().unwrap();
        let entry = state.entries.pop(key)?;
        state.current_size -= entry.size;
        Some(entry.resource)
    }

    /// Whether a resource is cached under `key`. Does not promote.
    pub fn contains(&self, key: &K) -> bool {
        let state = self.state.lock().unwrap();
        state.entries.contains(key)
    }

    /// Number of cached resources.
    pub fn count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.entries.len()
    }

    /// Bytes currently cached.
    pub fn current_size(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.current_size
    }

    /// The current byte budget.
    pub fn max_size(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.max_size
    }

    /// Rescales the byte budget to `initial_max_size * multiplier` and
    /// evicts down to it.
    pub fn set_size_multiplier(&self, multiplier: f32) {
        let mut state = self.state.lock().unwrap();
        state.max_size = (state.initial_max_size as f32 * multiplier).round() as usize;
        let target = state.max_size;
        state.trim_to_size(target);
    }

    /// Evicts everything, notifying the listener per resource.
    pub fn clear_memory(&self) {
        let mut state = self.state.lock().unwrap();
        state.trim_to_size(0);
    }

    /// Shrinks the cache in response to memory pressure.
    pub fn trim(&self, level: PressureLevel) {
        let mut state = self.state.lock().unwrap();
        match level.trim_action() {
            TrimAction::Clear => state.trim_to_size(0),
            TrimAction::ShrinkToHalf => {
                let target = state.max_size / 2;
                state.trim_to_size(target);
            }
            TrimAction::Keep => {}
        }
    }
}

impl<K: Eq + Hash, R: Clone> LruResourceCache<K, R> {
    /// Returns a clone of the resource for `key`, promoting its recency.
    ///
    /// Callers needing cheap clones store `Arc`-wrapped resources.
    pub fn get(&self, key: &K) -> Option<R> {
        let mut state = self.state.lock().unwrap();
        state
            .entries
            .get(key)
            .map(|entry| entry.resource.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn sized_cache(max_size: usize) -> LruResourceCache<u64, Vec<u8>> {
        LruResourceCache::new(max_size, |resource: &Vec<u8>| resource.len())
    }

    #[test]
    fn test_put_get() {
        let cache = sized_cache(1024);
        cache.put(1, vec![1, 2, 3]);

        assert_eq!(cache.get(&1), Some(vec![1, 2, 3]));
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.current_size(), 3);
    }

    #[test]
    fn test_put_returns_displaced_value() {
        let cache = sized_cache(1024);
        assert_eq!(cache.put(1, vec![1]), None);
        assert_eq!(cache.put(1, vec![2, 2]), Some(vec![1]));
        assert_eq!(cache.current_size(), 2);
    }

    #[test]
    fn test_eviction_is_oldest_first() {
        let cache = sized_cache(100);
        cache.put(1, vec![0; 40]);
        cache.put(2, vec![0; 40]);
        cache.put(3, vec![0; 40]); // evicts key 1

        assert!(!cache.contains(&1));
        assert!(cache.contains(&2));
        assert!(cache.contains(&3));
        assert_eq!(cache.current_size(), 80);
    }

    #[test]
    fn test_get_promotes_recency() {
        let cache = sized_cache(100);
        cache.put(1, vec![0; 40]);
        cache.put(2, vec![0; 40]);

        // Touch key 1 so key 2 becomes the eviction candidate.
        assert!(cache.get(&1).is_some());
        cache.put(3, vec![0; 40]);

        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
        assert!(cache.contains(&3));
    }

    #[test]
    fn test_listener_fires_on_eviction_only() {
        let evicted = Arc::new(AtomicUsize::new(0));
        let cache = sized_cache(100);
        let evicted_clone = Arc::clone(&evicted);
        cache.set_eviction_listener(move |_key: &u64, _resource: Vec<u8>| {
            evicted_clone.fetch_add(1, Ordering::SeqCst);
        });

        cache.put(1, vec![0; 40]);
        cache.put(2, vec![0; 40]);

        // Explicit removal must not notify.
        cache.remove(&1);
        assert_eq!(evicted.load(Ordering::SeqCst), 0);

        // Forced eviction must notify: key 2 is pushed out.
        cache.put(3, vec![0; 50]);
        cache.put(4, vec![0; 50]);
        assert!(!cache.contains(&2));
        assert_eq!(evicted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_too_big_item_goes_to_listener() {
        let evicted = Arc::new(AtomicUsize::new(0));
        let cache = sized_cache(100);
        let evicted_clone = Arc::clone(&evicted);
        cache.set_eviction_listener(move |_key: &u64, _resource: Vec<u8>| {
            evicted_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(cache.put(1, vec![0; 100]), None);
        assert!(!cache.contains(&1));
        assert_eq!(cache.current_size(), 0);
        assert_eq!(evicted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_returns_resource() {
        let cache = sized_cache(1024);
        cache.put(1, vec![9; 10]);

        assert_eq!(cache.remove(&1), Some(vec![9; 10]));
        assert_eq!(cache.remove(&1), None);
        assert_eq!(cache.current_size(), 0);
    }

    #[test]
    fn test_clear_memory_notifies_listener() {
        let evicted = Arc::new(AtomicUsize::new(0));
        let cache = sized_cache(1024);
        let evicted_clone = Arc::clone(&evicted);
        cache.set_eviction_listener(move |_key: &u64, _resource: Vec<u8>| {
            evicted_clone.fetch_add(1, Ordering::SeqCst);
        });

        cache.put(1, vec![0; 10]);
        cache.put(2, vec![0; 10]);
        cache.clear_memory();

        assert_eq!(cache.count(), 0);
        assert_eq!(cache.current_size(), 0);
        assert_eq!(evicted.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_set_size_multiplier() {
        let cache = sized_cache(100);
        cache.put(1, vec![0; 40]);
        cache.put(2, vec![0; 40]);

        cache.set_size_multiplier(0.5);
        assert_eq!(cache.max_size(), 50);
        assert_eq!(cache.count(), 1);
        assert!(cache.current_size() <= 50);
    }

    #[test]
    fn test_trim_levels() {
        let cache = sized_cache(100);
        cache.put(1, vec![0; 40]);
        cache.put(2, vec![0; 40]);

        cache.trim(PressureLevel::Low);
        assert_eq!(cache.count(), 2);

        cache.trim(PressureLevel::High);
        assert_eq!(cache.count(), 1);

        cache.trim(PressureLevel::Critical);
        assert_eq!(cache.count(), 0);
    }

    #[test]
    fn test_size_invariant_over_mixed_operations() {
        let cache = sized_cache(500);
        for i in 0..50u64 {
            cache.put(i, vec![0; (i as usize % 7) * 10]);
        }
        for i in 0..25u64 {
            cache.get(&i);
        }
        for i in 0..10u64 {
            cache.remove(&i);
        }

        // current_size must equal the true sum of resident sizes.
        let mut expected = 0;
        for i in 0..50u64 {
            if cache.contains(&i) {
                expected += cache.get(&i).unwrap().len();
            }
        }
        assert_eq!(cache.current_size(), expected);
        assert!(cache.current_size() <= cache.max_size());
    }
}
