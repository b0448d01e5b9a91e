//! Fit strategies for the pixel buffer pool.
//!
//! A strategy decides which pooled buffer can serve a request, separating
//! the matching policy from the pool's budget and eviction mechanics. The
//! default [`SizeFormatStrategy`] matches by total byte size and
//! reinterprets the buffer to the requested dimensions; the stricter
//! [`DimensionStrategy`] only reuses buffers with identical dimensions.

use std::collections::BTreeMap;
use std::collections::HashMap;

use log::trace;

use crate::buffer::{byte_size_of, PixelBuffer, PixelFormat};
use crate::grouped::GroupedLruMap;

/// A candidate buffer may be at most this many times the requested byte
/// size; larger buffers are left pooled rather than wasted on a small
/// request.
const MAX_OVERSIZE_MULTIPLE: usize = 8;

/// Matching policy for pooled pixel buffers.
///
/// Strategies store buffers, answer requests with the best pooled match
/// (or `None`), and surface a least-recently-used victim for eviction.
/// Byte accounting stays in the pool; `size_of`/`size_for` only report
/// sizes.
pub trait PoolStrategy: Send {
    /// Stores a buffer for later reuse.
    fn put(&mut self, buffer: PixelBuffer);

    /// Removes and returns the best pooled match for the request, already
    /// reconfigured to the requested dimensions and format.
    fn get(&mut self, width: u32, height: u32, format: PixelFormat) -> Option<PixelBuffer>;

    /// Removes and returns the least recently used buffer.
    fn remove_last(&mut self) -> Option<PixelBuffer>;

    /// Bytes this strategy accounts for the given buffer. Allocation
    /// bytes, not logical bytes, so accounting survives relabeling.
    fn size_of(&self, buffer: &PixelBuffer) -> usize {
        buffer.allocation_size()
    }

    /// Bytes a buffer of the given dimensions and format would occupy.
    fn size_for(&self, width: u32, height: u32, format: PixelFormat) -> usize {
        byte_size_of(width, height, format)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SizeKey {
    bytes: usize,
    format: PixelFormat,
}

/// Matches buffers by (byte size, format), reinterpreting dimensions.
///
/// A request is served by the smallest pooled buffer of the same format
/// whose allocation is at least as large as the request and no more than
/// 8x larger; the buffer is then relabeled with the requested dimensions.
/// This reuses far more allocations than exact-dimension matching, at the
/// cost of handing out slightly oversized allocations.
pub struct SizeFormatStrategy {
    grouped: GroupedLruMap<SizeKey, PixelBuffer>,
    /// Per-format index from byte size to outstanding count.
    sorted_sizes: HashMap<PixelFormat, BTreeMap<usize, usize>>,
}

impl SizeFormatStrategy {
    pub fn new() -> Self {
        Self {
            grouped: GroupedLruMap::new(),
            sorted_sizes: HashMap::new(),
        }
    }

    fn decrement_size(&mut self, key: SizeKey) {
        let sizes = self
            .sorted_sizes
            .get_mut(&key.format)
            .expect("size bucket missing for pooled buffer");
        match sizes.get_mut(&key.bytes) {
            Some(count) if *count == 1 => {
                sizes.remove(&key.bytes);
            }
            Some(count) => *count -= 1,
            None => debug_assert!(false, "decremented missing size bucket {}", key.bytes),
        }
    }
}

impl Default for SizeFormatStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolStrategy for SizeFormatStrategy {
    fn put(&mut self, buffer: PixelBuffer) {
        let key = SizeKey {
            bytes: buffer.allocation_size(),
            format: buffer.format(),
        };
        *self
            .sorted_sizes
            .entry(key.format)
            .or_default()
            .entry(key.bytes)
            .or_insert(0) += 1;
        self.grouped.put(key, buffer);
    }

    fn get(&mut self, width: u32, height: u32, format: PixelFormat) -> Option<PixelBuffer> {
        let required = byte_size_of(width, height, format);
        let candidate = self
            .sorted_sizes
            .get(&format)?
            .range(required..)
            .next()
            .map(|(&bytes, _)| bytes)
            .filter(|&bytes| bytes <= required * MAX_OVERSIZE_MULTIPLE)?;

        let key = SizeKey {
            bytes: candidate,
            format,
        };
        let mut buffer = self.grouped.get(&key)?;
        self.decrement_size(key);
        buffer.reconfigure(width, height, format);
        Some(buffer)
    }

    fn remove_last(&mut self) -> Option<PixelBuffer> {
        let buffer = self.grouped.remove_last()?;
        self.decrement_size(SizeKey {
            bytes: buffer.allocation_size(),
            format: buffer.format(),
        });
        Some(buffer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct DimensionKey {
    width: u32,
    height: u32,
    format: PixelFormat,
}

/// Matches buffers by exact (width, height, format).
///
/// Used where reinterpreting a buffer's dimensions is not valid for the
/// consumer, at the cost of a lower hit rate.
pub struct DimensionStrategy {
    grouped: GroupedLruMap<DimensionKey, PixelBuffer>,
}

impl DimensionStrategy {
    pub fn new() -> Self {
        Self {
            grouped: GroupedLruMap::new(),
        }
    }
}

impl Default for DimensionStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolStrategy for DimensionStrategy {
    fn put(&mut self, buffer: PixelBuffer) {
        let key = DimensionKey {
            width: buffer.width(),
            height: buffer.height(),
            format: buffer.format(),
        };
        self.grouped.put(key, buffer);
    }

    fn get(&mut self, width: u32, height: u32, format: PixelFormat) -> Option<PixelBuffer> {
        let result = self.grouped.get(&DimensionKey {
            width,
            height,
            format,
        });
        if result.is_none() {
            trace!("no pooled buffer for {width}x{height} {format}");
        }
        result
    }

    fn remove_last(&mut self) -> Option<PixelBuffer> {
        self.grouped.remove_last()
    }
}
