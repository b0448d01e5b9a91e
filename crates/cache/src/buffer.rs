//! Decoded pixel buffer type pooled by [`LruBufferPool`](crate::LruBufferPool).

use std::fmt;

/// Pixel layout of a [`PixelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8 bits per channel RGBA, 4 bytes per pixel.
    Rgba8888,
    /// Packed 16-bit RGB, 2 bytes per pixel.
    Rgb565,
    /// Single alpha channel, 1 byte per pixel.
    Alpha8,
    /// Buffer memory owned by the display hardware. Never eligible for
    /// pooling: the backing allocation cannot be rewritten in place.
    Hardware,
}

impl PixelFormat {
    /// Bytes of storage per pixel in this format.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8888 | PixelFormat::Hardware => 4,
            PixelFormat::Rgb565 => 2,
            PixelFormat::Alpha8 => 1,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Rgba8888 => "RGBA8888",
            PixelFormat::Rgb565 => "RGB565",
            PixelFormat::Alpha8 => "ALPHA8",
            PixelFormat::Hardware => "HARDWARE",
        };
        f.write_str(name)
    }
}

/// A dimensioned, format-tagged pixel buffer.
///
/// The pool only accepts mutable buffers; a buffer wrapping shared or
/// borrowed storage is marked immutable by its producer and is dropped
/// instead of pooled.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    mutable: bool,
    /// Bytes backing this buffer. Fixed for the buffer's lifetime;
    /// reconfiguring to smaller dimensions keeps the full allocation so
    /// the buffer can be reused at its original size later.
    allocated: usize,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Allocates a zeroed, mutable buffer.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let len = byte_size_of(width, height, format);
        Self {
            width,
            height,
            format,
            mutable: true,
            allocated: len,
            data: vec![0; len],
        }
    }

    /// Wraps existing pixel data. The data length must match the
    /// dimensions and format.
    pub fn from_data(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), byte_size_of(width, height, format));
        Self {
            width,
            height,
            format,
            mutable: true,
            allocated: data.len(),
            data,
        }
    }

    /// Marks this buffer immutable; the pool will refuse it.
    pub fn freeze(&mut self) {
        self.mutable = false;
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Bytes covered by the current dimensions and format.
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    /// Bytes actually backing this buffer. At least `byte_size`, and
    /// larger after the buffer has been relabeled with smaller
    /// dimensions. Pools account in allocation bytes.
    pub fn allocation_size(&self) -> usize {
        self.allocated
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Zeroes the pixel data in place.
    pub(crate) fn erase(&mut self) {
        self.data.fill(0);
    }

    /// Relabels this buffer with new dimensions and format. The new
    /// logical size must fit within the original allocation; the
    /// allocation itself is unchanged.
    pub(crate) fn reconfigure(&mut self, width: u32, height: u32, format: PixelFormat) {
        let len = byte_size_of(width, height, format);
        debug_assert!(len <= self.allocated);
        self.data.resize(len, 0);
        self.width = width;
        self.height = height;
        self.format = format;
    }
}

/// Bytes required for a buffer of the given dimensions and format.
pub fn byte_size_of(width: u32, height: u32, format: PixelFormat) -> usize {
    width as usize * height as usize * format.bytes_per_pixel()
}
