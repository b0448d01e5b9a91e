//! Byte-budgeted reuse pool for decoded pixel buffers.
//!
//! Decoding produces large, short-lived pixel buffers; pooling them avoids
//! repeated multi-megabyte allocations. Matching is delegated to a
//! pluggable [`PoolStrategy`], while this module owns the byte budget,
//! eviction, and eligibility rules.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use log::{debug, trace, warn};

use crate::buffer::{PixelBuffer, PixelFormat};
use crate::pressure::{PressureLevel, TrimAction};
use crate::strategy::{PoolStrategy, SizeFormatStrategy};

/// Counters describing pool activity. Observability only; nothing reads
/// these to make decisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferPoolStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub evictions: u64,
    /// Bytes currently pooled.
    pub current_size: usize,
    /// Current byte budget.
    pub max_size: usize,
}

struct PoolState {
    strategy: Box<dyn PoolStrategy>,
    allowed_formats: HashSet<PixelFormat>,
    initial_max_size: usize,
    max_size: usize,
    current_size: usize,
    hits: u64,
    misses: u64,
    puts: u64,
    evictions: u64,
}

impl PoolState {
    fn trim_to_size(&mut self, target: usize) {
        while self.current_size > target {
            let Some(removed) = self.strategy.remove_last() else {
                warn!("buffer pool size mismatch, resetting");
                self.current_size = 0;
                return;
            };
            self.current_size -= self.strategy.size_of(&removed);
            self.evictions += 1;
            trace!(
                "evicting buffer {}x{} {}",
                removed.width(),
                removed.height(),
                removed.format()
            );
        }
    }
}

/// Fixed-budget LRU pool of [`PixelBuffer`]s.
///
/// Buffers handed to [`put`](Self::put) are owned by the pool from that
/// point on; rejected buffers are dropped. A [`get`](Self::get) miss
/// returns `None` and the caller allocates fresh.
///
/// # Example
///
/// ```
/// use imgpipe_cache::{LruBufferPool, PixelBuffer, PixelFormat};
///
/// let pool = LruBufferPool::new(64 * 1024 * 1024);
/// pool.put(PixelBuffer::new(256, 256, PixelFormat::Rgba8888));
///
/// let reused = pool
///     .get(256, 256, PixelFormat::Rgba8888)
///     .unwrap_or_else(|| PixelBuffer::new(256, 256, PixelFormat::Rgba8888));
/// assert!(reused.data().iter().all(|&b| b == 0));
/// ```
pub struct LruBufferPool {
    state: Arc<Mutex<PoolState>>,
}

impl LruBufferPool {
    /// Creates a pool with the default size/format matching strategy and
    /// the default allowed formats (everything except
    /// [`PixelFormat::Hardware`]).
    pub fn new(max_size: usize) -> Self {
        Self::with_strategy(max_size, Box::new(SizeFormatStrategy::new()))
    }

    /// Creates a pool with a caller-supplied matching strategy.
    pub fn with_strategy(max_size: usize, strategy: Box<dyn PoolStrategy>) -> Self {
        Self::with_allowed_formats(max_size, strategy, default_allowed_formats())
    }

    /// Creates a pool that only accepts the given formats. Formats outside
    /// the set are rejected on `put` regardless of strategy.
    pub fn with_allowed_formats(
        max_size: usize,
        strategy: Box<dyn PoolStrategy>,
        allowed_formats: HashSet<PixelFormat>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                strategy,
                allowed_formats,
                initial_max_size: max_size,
                max_size,
                current_size: 0,
                hits: 0,
                misses: 0,
                puts: 0,
                evictions: 0,
            })),
        }
    }

    /// Offers a buffer to the pool, taking ownership.
    ///
    /// Buffers that are immutable, larger than the whole budget, or of a
    /// format outside the allowed set are dropped instead of pooled.
    pub fn put(&self, buffer: PixelBuffer) {
        let mut state = self.state.lock().unwrap();

        let size = state.strategy.size_of(&buffer);
        if !buffer.is_mutable() || size > state.max_size {
            debug!(
                "rejecting buffer {}x{} {} (mutable={}, {size} bytes)",
                buffer.width(),
                buffer.height(),
                buffer.format(),
                buffer.is_mutable()
            );
            return;
        }
        if !state.allowed_formats.contains(&buffer.format()) {
            debug!("rejecting buffer with disallowed format {}", buffer.format());
            return;
        }

        state.strategy.put(buffer);
        state.puts += 1;
        state.current_size += size;

        let target = state.max_size;
        state.trim_to_size(target);
    }

    /// Returns a pooled buffer relabeled to the requested shape, zeroed,
    /// or `None` if nothing fits.
    ///
    /// # Panics
    ///
    /// Panics if `format` is [`PixelFormat::Hardware`]; hardware buffers
    /// cannot be rewritten in place and are never pooled.
    pub fn get(&self, width: u32, height: u32, format: PixelFormat) -> Option<PixelBuffer> {
        let mut buffer = self.get_dirty(width, height, format)?;
        buffer.erase();
        Some(buffer)
    }

    /// Like [`get`](Self::get), but the returned buffer keeps whatever
    /// pixel data it previously held. Callers that overwrite every pixel
    /// skip the cost of zeroing.
    pub fn get_dirty(&self, width: u32, height: u32, format: PixelFormat) -> Option<PixelBuffer> {
        assert!(
            format != PixelFormat::Hardware,
            "cannot request a mutable buffer with format HARDWARE"
        );
        let mut state = self.state.lock().unwrap();

        let result = state.strategy.get(width, height, format);
        match &result {
            Some(buffer) => {
                state.hits += 1;
                let size = state.strategy.size_of(buffer);
                state.current_size -= size;
            }
            None => {
                debug!("missing buffer {width}x{height} {format}");
                state.misses += 1;
            }
        }
        result
    }

    /// Rescales the byte budget to `initial_max_size * multiplier` and
    /// immediately evicts down to the new budget. Used to shrink the pool
    /// under application memory policy without recreating it.
    pub fn set_size_multiplier(&self, multiplier: f32) {
        let mut state = self.state.lock().unwrap();
        state.max_size = (state.initial_max_size as f32 * multiplier).round() as usize;
        let target = state.max_size;
        state.trim_to_size(target);
    }

    /// Releases every pooled buffer.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.trim_to_size(0);
    }

    /// Shrinks the pool in response to memory pressure.
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

    /// Bytes currently pooled.
    pub fn current_size(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.current_size
    }

    /// The current byte budget.
    pub fn max_size(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.max_size
    }

    /// Snapshot of the activity counters.
    pub fn stats(&self) -> BufferPoolStats {
        let state = self.state.lock().unwrap();
        BufferPoolStats {
            hits: state.hits,
            misses: state.misses,
            puts: state.puts,
            evictions: state.evictions,
            current_size: state.current_size,
            max_size: state.max_size,
        }
    }
}

fn default_allowed_formats() -> HashSet<PixelFormat> {
    let mut formats = HashSet::new();
    formats.insert(PixelFormat::Rgba8888);
    formats.insert(PixelFormat::Rgb565);
    formats.insert(PixelFormat::Alpha8);
    formats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba(width: u32, height: u32) -> PixelBuffer {
        PixelBuffer::new(width, height, PixelFormat::Rgba8888)
    }

    #[test]
    fn test_put_get_round_trip() {
        let pool = LruBufferPool::new(1024 * 1024);
        pool.put(rgba(16, 16));

        let buffer = pool.get(16, 16, PixelFormat::Rgba8888).unwrap();
        assert_eq!(buffer.width(), 16);
        assert_eq!(buffer.height(), 16);
        assert_eq!(pool.current_size(), 0);
    }

    #[test]
    fn test_get_zeroes_buffer() {
        let pool = LruBufferPool::new(1024 * 1024);
        let mut buffer = rgba(4, 4);
        buffer.data_mut().fill(0xAB);
        pool.put(buffer);

        let reused = pool.get(4, 4, PixelFormat::Rgba8888).unwrap();
        assert!(reused.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_get_dirty_keeps_contents() {
        let pool = LruBufferPool::new(1024 * 1024);
        let mut buffer = rgba(4, 4);
        buffer.data_mut().fill(0xAB);
        pool.put(buffer);

        let reused = pool.get_dirty(4, 4, PixelFormat::Rgba8888).unwrap();
        assert!(reused.data().iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_rejects_immutable_buffer() {
        let pool = LruBufferPool::new(1024 * 1024);
        let mut buffer = rgba(4, 4);
        buffer.freeze();
        pool.put(buffer);

        assert_eq!(pool.current_size(), 0);
        assert_eq!(pool.stats().puts, 0);
    }

    #[test]
    fn test_rejects_buffer_larger_than_budget() {
        let pool = LruBufferPool::new(100);
        pool.put(rgba(16, 16)); // 1024 bytes

        assert_eq!(pool.current_size(), 0);
    }

    #[test]
    fn test_rejects_disallowed_format() {
        let mut allowed = HashSet::new();
        allowed.insert(PixelFormat::Rgba8888);
        let pool = LruBufferPool::with_allowed_formats(
            1024 * 1024,
            Box::new(SizeFormatStrategy::new()),
            allowed,
        );

        pool.put(PixelBuffer::new(4, 4, PixelFormat::Rgb565));
        assert_eq!(pool.current_size(), 0);

        pool.put(rgba(4, 4));
        assert_eq!(pool.current_size(), 64);
    }

    #[test]
    #[should_panic(expected = "HARDWARE")]
    fn test_hardware_request_panics() {
        let pool = LruBufferPool::new(1024);
        let _ = pool.get(4, 4, PixelFormat::Hardware);
    }

    #[test]
    fn test_eviction_keeps_pool_within_budget() {
        // Budget fits two 16x16 RGBA buffers (1024 bytes each).
        let pool = LruBufferPool::new(2048);
        pool.put(rgba(16, 16));
        pool.put(rgba(16, 16));
        pool.put(rgba(16, 16));

        assert_eq!(pool.current_size(), 2048);
        assert_eq!(pool.stats().evictions, 1);
    }

    #[test]
    fn test_set_size_multiplier_shrinks_and_evicts() {
        let pool = LruBufferPool::new(2048);
        pool.put(rgba(16, 16));
        pool.put(rgba(16, 16));

        pool.set_size_multiplier(0.5);
        assert_eq!(pool.max_size(), 1024);
        assert_eq!(pool.current_size(), 1024);

        // Rescaling is relative to the initial budget, not the shrunk one.
        pool.set_size_multiplier(1.0);
        assert_eq!(pool.max_size(), 2048);
    }

    #[test]
    fn test_trim_critical_clears() {
        let pool = LruBufferPool::new(4096);
        pool.put(rgba(16, 16));
        pool.trim(PressureLevel::Critical);
        assert_eq!(pool.current_size(), 0);
    }

    #[test]
    fn test_trim_high_halves() {
        let pool = LruBufferPool::new(2048);
        pool.put(rgba(16, 16));
        pool.put(rgba(16, 16));
        pool.trim(PressureLevel::High);
        assert!(pool.current_size() <= 1024);
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let pool = LruBufferPool::new(1024 * 1024);
        pool.put(rgba(8, 8));

        assert!(pool.get(8, 8, PixelFormat::Rgba8888).is_some());
        assert!(pool.get(64, 64, PixelFormat::Rgba8888).is_none());

        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.puts, 1);
    }

    #[test]
    fn test_accounting_survives_relabeled_reuse() {
        let pool = LruBufferPool::new(1024 * 1024);
        pool.put(rgba(12, 10)); // 480-byte allocation
        assert_eq!(pool.current_size(), 480);

        // Served for a smaller request, the buffer keeps its allocation
        // and the pool's accounting subtracts what was added.
        let buffer = pool.get(10, 10, PixelFormat::Rgba8888).unwrap();
        assert_eq!(buffer.byte_size(), 400);
        assert_eq!(buffer.allocation_size(), 480);
        assert_eq!(pool.current_size(), 0);

        pool.put(buffer);
        assert_eq!(pool.current_size(), 480);
    }

    #[test]
    fn test_dimension_strategy_pool() {
        use crate::strategy::DimensionStrategy;

        let pool =
            LruBufferPool::with_strategy(1024 * 1024, Box::new(DimensionStrategy::new()));
        pool.put(rgba(16, 8));

        // Same byte size, different dimensions: no reuse under this
        // strategy.
        assert!(pool.get(8, 16, PixelFormat::Rgba8888).is_none());
        assert!(pool.get(16, 8, PixelFormat::Rgba8888).is_some());
    }
}
