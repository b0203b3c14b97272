use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::foundation::core::{Domain, ResultType, Value};
use crate::foundation::math::unit_to_u8;

/// Dense `f32` pixel storage for one image result.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    domain: Domain,
    ty: ResultType,
    data: Vec<f32>,
}

impl PixelBuffer {
    /// Wrap existing channel data. `data.len()` must equal `pixel_count * channels`.
    pub fn from_data(domain: Domain, ty: ResultType, data: Vec<f32>) -> Option<Self> {
        (data.len() == domain.pixel_count() * ty.channels()).then_some(Self { domain, ty, data })
    }

    /// Buffer filled with `value` (converted to `ty`).
    pub fn filled(domain: Domain, ty: ResultType, value: Value) -> Self {
        let channels = ty.channels();
        let mut data = vec![0.0; domain.pixel_count() * channels];
        let v = value.convert(ty);
        for px in data.chunks_exact_mut(channels) {
            v.write_channels(px);
        }
        Self { domain, ty, data }
    }

    /// Pixel extent.
    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Value kind of each pixel.
    pub fn ty(&self) -> ResultType {
        self.ty
    }

    /// Raw channel data, row-major, tightly packed.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable raw channel data.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Pixel at linear index `i`.
    pub fn pixel(&self, i: usize) -> Value {
        let c = self.ty.channels();
        Value::from_channels(self.ty, &self.data[i * c..(i + 1) * c])
    }

    /// Pixel at `(x, y)` with coordinates clamped into the domain.
    pub fn sample_clamped(&self, x: u32, y: u32) -> Value {
        let x = x.min(self.domain.width.saturating_sub(1)) as usize;
        let y = y.min(self.domain.height.saturating_sub(1)) as usize;
        self.pixel(y * self.domain.width as usize + x)
    }

    /// Row-major RGBA8 bytes. Non-color pixels convert like socket values do; channels are
    /// clamped to `[0, 1]` and non-finite values become zero.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.domain.pixel_count() * 4);
        for i in 0..self.domain.pixel_count() {
            out.extend(self.pixel(i).as_color().map(unit_to_u8));
        }
        out
    }

    pub(crate) fn into_data(self) -> Vec<f32> {
        self.data
    }
}

/// Pool configuration for recycled pixel storage.
#[derive(Debug, Clone, Copy)]
pub struct BufferPoolOpts {
    /// Maximum bytes retained across all buckets.
    pub max_pool_bytes: usize,
    /// Maximum number of retained buffers per (w, h, channels) bucket.
    pub max_buffers_per_bucket: usize,
}

impl Default for BufferPoolOpts {
    fn default() -> Self {
        Self {
            max_pool_bytes: 256 * 1024 * 1024,
            max_buffers_per_bucket: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BufferKey {
    w: u32,
    h: u32,
    channels: usize,
}

impl BufferKey {
    fn new(domain: Domain, ty: ResultType) -> Self {
        Self {
            w: domain.width,
            h: domain.height,
            channels: ty.channels(),
        }
    }

    fn len(self) -> usize {
        (self.w as usize)
            .saturating_mul(self.h as usize)
            .saturating_mul(self.channels)
    }

    fn byte_len(self) -> usize {
        self.len().saturating_mul(std::mem::size_of::<f32>())
    }
}

/// Pool counters. `live_buffers` is the number of buffers handed out and not yet returned.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Buffers currently retained for reuse.
    pub retained_buffers: usize,
    /// Bytes currently retained for reuse.
    pub retained_bytes: usize,
    /// Fresh allocations performed.
    pub alloc_buffers: u64,
    /// Total buffers handed out (fresh or reused).
    pub acquired: u64,
    /// Total buffers given back.
    pub returned: u64,
    /// Buffers handed out and not yet returned.
    pub live_buffers: u64,
    /// Returned buffers dropped because a cap was hit.
    pub dropped_on_release: u64,
}

struct Bucket {
    buffers: Vec<Vec<f32>>,
}

/// Bounded pooled allocator for image result storage.
///
/// Keyed by `(width, height, channels)`. Acquire/return happen at result granularity.
pub struct BufferPool {
    opts: BufferPoolOpts,
    stats: BufferPoolStats,
    bucket_idx_by_key: HashMap<BufferKey, usize>,
    buckets: Vec<Bucket>,
}

/// Pool shared between a context and the result stores created from it.
pub type SharedBufferPool = Arc<Mutex<BufferPool>>;

impl BufferPool {
    /// Create an empty pool.
    pub fn new(opts: BufferPoolOpts) -> Self {
        Self {
            opts,
            stats: BufferPoolStats::default(),
            bucket_idx_by_key: HashMap::new(),
            buckets: Vec::new(),
        }
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> BufferPoolStats {
        self.stats.clone()
    }

    /// Hand out a zeroed buffer for `domain` and `ty`.
    pub fn acquire(&mut self, domain: Domain, ty: ResultType) -> PixelBuffer {
        let key = BufferKey::new(domain, ty);
        self.stats.acquired = self.stats.acquired.saturating_add(1);
        self.stats.live_buffers = self.stats.live_buffers.saturating_add(1);

        if let Some(&bi) = self.bucket_idx_by_key.get(&key)
            && let Some(mut data) = self.buckets[bi].buffers.pop()
        {
            self.stats.retained_buffers = self.stats.retained_buffers.saturating_sub(1);
            self.stats.retained_bytes = self.stats.retained_bytes.saturating_sub(key.byte_len());
            data.fill(0.0);
            return PixelBuffer { domain, ty, data };
        }

        self.stats.alloc_buffers = self.stats.alloc_buffers.saturating_add(1);
        PixelBuffer {
            domain,
            ty,
            data: vec![0.0; key.len()],
        }
    }

    /// Take back a buffer previously handed out by [`BufferPool::acquire`].
    pub fn release(&mut self, buffer: PixelBuffer) {
        self.stats.returned = self.stats.returned.saturating_add(1);
        self.stats.live_buffers = self.stats.live_buffers.saturating_sub(1);

        let key = BufferKey::new(buffer.domain, buffer.ty);
        let data = buffer.into_data();
        if self.opts.max_pool_bytes == 0
            || self.opts.max_buffers_per_bucket == 0
            || data.len() != key.len()
        {
            self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
            return;
        }

        let bytes = key.byte_len();
        if self.stats.retained_bytes.saturating_add(bytes) > self.opts.max_pool_bytes {
            self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
            return;
        }

        let bi = match self.bucket_idx_by_key.get(&key).copied() {
            Some(i) => i,
            None => {
                let i = self.buckets.len();
                self.buckets.push(Bucket {
                    buffers: Vec::new(),
                });
                self.bucket_idx_by_key.insert(key, i);
                i
            }
        };

        let bucket = &mut self.buckets[bi];
        if bucket.buffers.len() >= self.opts.max_buffers_per_bucket {
            self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
            return;
        }

        bucket.buffers.push(data);
        self.stats.retained_buffers = self.stats.retained_buffers.saturating_add(1);
        self.stats.retained_bytes = self.stats.retained_bytes.saturating_add(bytes);
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(BufferPoolOpts::default())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/result/buffer_pool.rs"]
mod tests;
