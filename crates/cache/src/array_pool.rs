//! Byte-budgeted reuse pool for primitive scratch arrays.
//!
//! Decoders churn through short-lived byte and int arrays; this pool hands
//! previously allocated arrays back out instead of letting every request
//! hit the allocator. Arrays are keyed by (length, element kind) and
//! evicted least-recently-used when the pool exceeds its byte budget.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use log::{debug, trace, warn};

use crate::grouped::GroupedLruMap;
use crate::pressure::{PressureLevel, TrimAction};

/// Recommended length for general-purpose scratch buffers (64 KiB).
pub const STANDARD_BUFFER_SIZE: usize = 64 * 1024;

/// A single pooled array may use at most `max_size / 2` bytes.
const SINGLE_ARRAY_MAX_SIZE_DIVISOR: usize = 2;

/// Approximate-fit is refused above this utilization (pool more than half
/// full) unless the candidate is close enough to the requested size.
const HALF_FULL_DIVISOR: usize = 2;

/// A candidate bucket may be at most this many times the requested length.
const MAX_OVERSIZE_MULTIPLE: usize = 8;

/// Element type of a pooled array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    Bytes,
    Ints,
}

impl ArrayKind {
    fn element_bytes(self) -> usize {
        match self {
            ArrayKind::Bytes => 1,
            ArrayKind::Ints => std::mem::size_of::<i32>(),
        }
    }
}

/// An array held by (or returned from) the pool.
#[derive(Debug, PartialEq, Eq)]
pub enum PooledArray {
    Bytes(Vec<u8>),
    Ints(Vec<i32>),
}

impl PooledArray {
    pub fn kind(&self) -> ArrayKind {
        match self {
            PooledArray::Bytes(_) => ArrayKind::Bytes,
            PooledArray::Ints(_) => ArrayKind::Ints,
        }
    }

    /// Element count of the underlying array.
    pub fn len(&self) -> usize {
        match self {
            PooledArray::Bytes(array) => array.len(),
            PooledArray::Ints(array) => array.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_size(&self) -> usize {
        self.len() * self.kind().element_bytes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ArrayKey {
    len: usize,
    kind: ArrayKind,
}

/// Internal pool state, all guarded by one mutex.
struct PoolState {
    grouped: GroupedLruMap<ArrayKey, PooledArray>,
    /// Per-kind index from array length to outstanding count, sorted so
    /// "smallest length >= n" is a range query.
    byte_sizes: BTreeMap<usize, usize>,
    int_sizes: BTreeMap<usize, usize>,
    current_size: usize,
    max_size: usize,
}

impl PoolState {
    fn sizes_mut(&mut self, kind: ArrayKind) -> &mut BTreeMap<usize, usize> {
        match kind {
            ArrayKind::Bytes => &mut self.byte_sizes,
            ArrayKind::Ints => &mut self.int_sizes,
        }
    }

    fn sizes(&self, kind: ArrayKind) -> &BTreeMap<usize, usize> {
        match kind {
            ArrayKind::Bytes => &self.byte_sizes,
            ArrayKind::Ints => &self.int_sizes,
        }
    }

    fn is_no_more_than_half_full(&self) -> bool {
        self.current_size == 0 || self.max_size / self.current_size >= HALF_FULL_DIVISOR
    }

    /// Whether an existing bucket of `actual` elements may serve a request
    /// for `requested` elements. Oversized reuse is refused when the pool
    /// is under pressure, bounding internal fragmentation.
    fn may_fill_request(&self, requested: usize, actual: usize) -> bool {
        self.is_no_more_than_half_full() || actual <= MAX_OVERSIZE_MULTIPLE * requested
    }

    fn take(&mut self, key: ArrayKey) -> Option<PooledArray> {
        let array = self.grouped.get(&key)?;
        self.current_size -= array.byte_size();
        decrement_size(self.sizes_mut(key.kind), key.len);
        Some(array)
    }

    fn evict_to_size(&mut self, target: usize) {
        while self.current_size > target {
            let Some(evicted) = self.grouped.remove_last() else {
                warn!("array pool size mismatch, resetting");
                self.current_size = 0;
                return;
            };
            self.current_size -= evicted.byte_size();
            decrement_size(self.sizes_mut(evicted.kind()), evicted.len());
            trace!("evicted array of {} elements", evicted.len());
        }
    }
}

fn decrement_size(sizes: &mut BTreeMap<usize, usize>, len: usize) {
    match sizes.get_mut(&len) {
        Some(count) if *count == 1 => {
            sizes.remove(&len);
        }
        Some(count) => *count -= 1,
        None => debug_assert!(false, "decremented missing size bucket {len}"),
    }
}

/// Fixed-budget LRU pool of primitive arrays.
///
/// `get` may return an array larger than requested; callers that need an
/// exact length use [`get_exact`](Self::get_exact). A `get` miss returns
/// `None` and the caller allocates a fresh array itself.
///
/// # Example
///
/// ```
/// use imgpipe_cache::{ArrayKind, LruArrayPool, PooledArray};
///
/// let pool = LruArrayPool::new(4 * 1024 * 1024);
/// pool.put(PooledArray::Bytes(vec![0u8; 16 * 1024]));
///
/// // A smaller request reuses the pooled array.
/// let scratch = pool.get(8 * 1024, ArrayKind::Bytes);
/// assert!(scratch.is_some());
/// ```
pub struct LruArrayPool {
    state: Arc<Mutex<PoolState>>,
}

impl LruArrayPool {
    /// Creates a pool with the given byte budget.
    pub fn new(max_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                grouped: GroupedLruMap::new(),
                byte_sizes: BTreeMap::new(),
                int_sizes: BTreeMap::new(),
                current_size: 0,
                max_size,
            })),
        }
    }

    /// Offers an array to the pool.
    ///
    /// Arrays whose byte size exceeds half of the pool budget are dropped
    /// so no single array can dominate the pool. Offering always transfers
    /// ownership; a rejected array is simply released.
    pub fn put(&self, array: PooledArray) {
        let mut state = self.state.lock().unwrap();

        let bytes = array.byte_size();
        if bytes > state.max_size / SINGLE_ARRAY_MAX_SIZE_DIVISOR {
            debug!("rejecting array of {bytes} bytes, too large for pool");
            return;
        }

        let key = ArrayKey {
            len: array.len(),
            kind: array.kind(),
        };
        *state.sizes_mut(key.kind).entry(key.len).or_insert(0) += 1;
        state.grouped.put(key, array);
        state.current_size += bytes;

        let target = state.max_size;
        state.evict_to_size(target);
    }

    /// Returns a pooled array of at least `len` elements, or `None` if no
    /// acceptable array is pooled.
    ///
    /// The smallest bucket of length >= `len` is used if the pool is no
    /// more than half full, or if that bucket is at most 8x the requested
    /// length. Otherwise only an exact-length array is returned.
    pub fn get(&self, len: usize, kind: ArrayKind) -> Option<PooledArray> {
        let mut state = self.state.lock().unwrap();

        let candidate = state
            .sizes(kind)
            .range(len..)
            .next()
            .map(|(&bucket_len, _)| bucket_len);

        let key = match candidate {
            Some(actual) if state.may_fill_request(len, actual) => ArrayKey { len: actual, kind },
            _ => ArrayKey { len, kind },
        };

        let result = state.take(key);
        if result.is_none() {
            trace!("array pool miss for {len} elements");
        }
        result
    }

    /// Returns a pooled array of exactly `len` elements, or `None`.
    ///
    /// Used when the caller's semantics depend on the array length and an
    /// oversized array would be incorrect.
    pub fn get_exact(&self, len: usize, kind: ArrayKind) -> Option<PooledArray> {
        let mut state = self.state.lock().unwrap();
        state.take(ArrayKey { len, kind })
    }

    /// Releases every pooled array.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.evict_to_size(0);
    }

    /// Shrinks the pool in response to memory pressure.
    pub fn trim(&self, level: PressureLevel) {
        let mut state = self.state.lock().unwrap();
        match level.trim_action() {
            TrimAction::Clear => state.evict_to_size(0),
            TrimAction::ShrinkToHalf => {
                let target = state.max_size / 2;
                state.evict_to_size(target);
            }
            TrimAction::Keep => {}
        }
    }

    /// Bytes currently held by the pool.
    pub fn current_size(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.current_size
    }

    /// The pool's byte budget.
    pub fn max_size(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.max_size
    }
}

impl Default for LruArrayPool {
    /// Creates a pool with a default 4 MiB budget.
    fn default() -> Self {
        Self::new(4 * 1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(len: usize) -> PooledArray {
        PooledArray::Bytes(vec![0u8; len])
    }

    fn ints(len: usize) -> PooledArray {
        PooledArray::Ints(vec![0i32; len])
    }

    #[test]
    fn test_put_get_exact() {
        let pool = LruArrayPool::new(1024);
        pool.put(bytes(100));

        let array = pool.get_exact(100, ArrayKind::Bytes).unwrap();
        assert_eq!(array.len(), 100);
        assert_eq!(pool.current_size(), 0);

        assert!(pool.get_exact(100, ArrayKind::Bytes).is_none());
    }

    #[test]
    fn test_size_accounting_counts_element_bytes() {
        let pool = LruArrayPool::new(4 * 1024);
        pool.put(ints(100)); // 400 bytes
        assert_eq!(pool.current_size(), 400);

        pool.put(bytes(100)); // 100 bytes
        assert_eq!(pool.current_size(), 500);

        pool.get_exact(100, ArrayKind::Ints).unwrap();
        assert_eq!(pool.current_size(), 100);
    }

    #[test]
    fn test_get_prefers_smallest_bucket_at_least_requested() {
        let pool = LruArrayPool::new(4 * 1024);
        pool.put(bytes(120));
        pool.put(bytes(500));

        let array = pool.get(100, ArrayKind::Bytes).unwrap();
        assert_eq!(array.len(), 120);
    }

    #[test]
    fn test_approximate_fit_allowed_when_half_empty() {
        // Pool is far under 50% utilization, so even a much larger array
        // may fill the request.
        let pool = LruArrayPool::new(1024 * 1024);
        pool.put(bytes(120));

        let array = pool.get(100, ArrayKind::Bytes).unwrap();
        assert_eq!(array.len(), 120);
    }

    #[test]
    fn test_approximate_fit_refused_under_pressure() {
        // Fill past 50% so the oversize rule kicks in, then request an
        // array the only bucket exceeds by more than 8x.
        let pool = LruArrayPool::new(1500);
        pool.put(bytes(900));
        assert_eq!(pool.current_size(), 900);

        assert!(pool.get(100, ArrayKind::Bytes).is_none());
        // The refused array is still pooled.
        assert_eq!(pool.current_size(), 900);

        // Within 8x it is handed out even under pressure.
        assert!(pool.get(200, ArrayKind::Bytes).is_some());
    }

    #[test]
    fn test_single_item_cap() {
        let pool = LruArrayPool::new(1000);
        pool.put(bytes(501)); // over max_size / 2
        assert_eq!(pool.current_size(), 0);

        pool.put(bytes(500)); // exactly max_size / 2 is accepted
        assert_eq!(pool.current_size(), 500);
    }

    #[test]
    fn test_eviction_keeps_pool_within_budget() {
        let pool = LruArrayPool::new(1000);
        pool.put(bytes(400));
        pool.put(bytes(400));
        pool.put(bytes(400));

        assert!(pool.current_size() <= 1000);
        assert_eq!(pool.current_size(), 800);
    }

    #[test]
    fn test_eviction_is_lru() {
        let pool = LruArrayPool::new(1000);
        pool.put(bytes(300));
        pool.put(ints(100)); // 400 bytes

        // Touch the byte bucket so the int bucket is the coldest.
        pool.put(bytes(300));

        pool.put(bytes(299));
        // 300 + 400 + 300 + 299 = 1299 > 1000: the int array goes first.
        assert!(pool.get_exact(100, ArrayKind::Ints).is_none());
        assert_eq!(pool.current_size(), 899);
    }

    #[test]
    fn test_kinds_are_separate_buckets() {
        let pool = LruArrayPool::new(4 * 1024);
        pool.put(ints(100));

        assert!(pool.get_exact(100, ArrayKind::Bytes).is_none());
        assert!(pool.get_exact(100, ArrayKind::Ints).is_some());
    }

    #[test]
    fn test_clear() {
        let pool = LruArrayPool::new(4 * 1024);
        pool.put(bytes(100));
        pool.put(ints(100));

        pool.clear();
        assert_eq!(pool.current_size(), 0);
        assert!(pool.get_exact(100, ArrayKind::Bytes).is_none());
    }

    #[test]
    fn test_trim_high_halves_pool() {
        let pool = LruArrayPool::new(1000);
        pool.put(bytes(400));
        pool.put(bytes(400));

        pool.trim(PressureLevel::High);
        assert!(pool.current_size() <= 500);
        assert_eq!(pool.current_size(), 400);
    }

    #[test]
    fn test_trim_critical_clears_pool() {
        let pool = LruArrayPool::new(1000);
        pool.put(bytes(400));

        pool.trim(PressureLevel::Critical);
        assert_eq!(pool.current_size(), 0);
    }

    #[test]
    fn test_trim_low_is_noop() {
        let pool = LruArrayPool::new(1000);
        pool.put(bytes(400));

        pool.trim(PressureLevel::Low);
        assert_eq!(pool.current_size(), 400);
    }
}
