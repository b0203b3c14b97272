use std::sync::{Arc, PoisonError};

use crate::foundation::core::{Domain, Precision, ResultType, Value};
use crate::result::buffer_pool::{PixelBuffer, SharedBufferPool};

/// Identifier of a result declared in a [`ResultStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResultId(pub u32);

/// Allocation state of a result.
#[derive(Clone, Debug)]
enum Storage {
    Unallocated,
    Single(Value),
    Image(Arc<PixelBuffer>),
    External(Arc<PixelBuffer>),
    Invalid,
}

/// One produced value: an image buffer or a single value, with a consumer reference count.
///
/// Image storage is an `Arc`, so sharing a result across a group boundary aliases the buffer
/// instead of copying it. The buffer returns to the pool once the last sharer frees it.
#[derive(Clone, Debug)]
pub struct ResultEntry {
    ty: ResultType,
    precision: Precision,
    reference_count: u32,
    storage: Storage,
}

impl ResultEntry {
    /// Value kind.
    pub fn ty(&self) -> ResultType {
        self.ty
    }

    /// Numeric precision.
    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Remaining number of consumers.
    pub fn reference_count(&self) -> u32 {
        self.reference_count
    }

    /// Whether the result holds data (valid or explicitly invalid).
    pub fn is_allocated(&self) -> bool {
        !matches!(self.storage, Storage::Unallocated)
    }

    /// Whether the result was allocated as explicitly invalid.
    pub fn is_invalid(&self) -> bool {
        matches!(self.storage, Storage::Invalid)
    }

    /// Whether the result is uniform over its domain. Invalid results read as a uniform zero.
    pub fn is_single_value(&self) -> bool {
        matches!(self.storage, Storage::Single(_) | Storage::Invalid)
    }

    /// Whether any consumer still needs this result.
    pub fn should_compute(&self) -> bool {
        self.reference_count != 0
    }

    /// The uniform value, if this is a single-value or invalid result.
    pub fn single_value(&self) -> Option<Value> {
        match &self.storage {
            Storage::Single(v) => Some(*v),
            Storage::Invalid => Some(Value::zero(self.ty)),
            _ => None,
        }
    }

    /// The image buffer, if this is an image result.
    pub fn image(&self) -> Option<&Arc<PixelBuffer>> {
        match &self.storage {
            Storage::Image(buf) | Storage::External(buf) => Some(buf),
            _ => None,
        }
    }

    /// Image extent, or `None` for single values and unallocated results.
    pub fn domain(&self) -> Option<Domain> {
        self.image().map(|b| b.domain())
    }

    /// Read-only snapshot usable off the compiler thread.
    pub fn view(&self) -> ResultView {
        match &self.storage {
            Storage::Image(buf) | Storage::External(buf) => ResultView::Image(Arc::clone(buf)),
            Storage::Single(v) => ResultView::Uniform(*v),
            Storage::Unallocated | Storage::Invalid => ResultView::Uniform(Value::zero(self.ty)),
        }
    }
}

/// Cheap, thread-safe read handle over an allocated result.
#[derive(Clone, Debug)]
pub enum ResultView {
    /// Uniform value.
    Uniform(Value),
    /// Shared image buffer.
    Image(Arc<PixelBuffer>),
}

impl ResultView {
    /// Value at `(x, y)`; image coordinates outside the buffer are clamped.
    pub fn sample(&self, x: u32, y: u32) -> Value {
        match self {
            Self::Uniform(v) => *v,
            Self::Image(buf) => buf.sample_clamped(x, y),
        }
    }

    /// Image extent, if any.
    pub fn domain(&self) -> Option<Domain> {
        match self {
            Self::Uniform(_) => None,
            Self::Image(buf) => Some(buf.domain()),
        }
    }
}

/// Arena of every result declared during one evaluation, including nested group instances.
///
/// Operations own their outputs by id and borrow their inputs by id. Image storage is acquired
/// from and returned to the context's buffer pool.
pub struct ResultStore {
    entries: Vec<ResultEntry>,
    pool: SharedBufferPool,
    precision: Precision,
}

impl ResultStore {
    /// Create an empty store allocating from `pool` at `precision`.
    pub fn new(pool: SharedBufferPool, precision: Precision) -> Self {
        Self {
            entries: Vec::new(),
            pool,
            precision,
        }
    }

    /// Declare a new unallocated result with a zero reference count.
    pub fn create(&mut self, ty: ResultType) -> ResultId {
        let id = ResultId(u32::try_from(self.entries.len()).unwrap_or(u32::MAX));
        self.entries.push(ResultEntry {
            ty,
            precision: self.precision,
            reference_count: 0,
            storage: Storage::Unallocated,
        });
        id
    }

    /// Entry for `id`.
    ///
    /// # Panics
    /// Panics if `id` was not created by this store.
    pub fn get(&self, id: ResultId) -> &ResultEntry {
        &self.entries[id.0 as usize]
    }

    fn get_mut(&mut self, id: ResultId) -> &mut ResultEntry {
        &mut self.entries[id.0 as usize]
    }

    /// Number of results declared so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no result was declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of results currently holding data.
    pub fn live_results(&self) -> usize {
        self.entries.iter().filter(|e| e.is_allocated()).count()
    }

    /// Set the number of consumers that will read `id`.
    pub fn set_reference_count(&mut self, id: ResultId, count: u32) {
        self.get_mut(id).reference_count = count;
    }

    /// Add `n` expected consumers.
    pub fn increment_reference_count(&mut self, id: ResultId, n: u32) {
        let e = self.get_mut(id);
        e.reference_count = e.reference_count.saturating_add(n);
    }

    /// Remove `n` expected consumers without freeing.
    pub fn decrement_reference_count(&mut self, id: ResultId, n: u32) {
        let e = self.get_mut(id);
        e.reference_count = e.reference_count.saturating_sub(n);
    }

    /// Whether any consumer still needs `id`.
    pub fn should_compute(&self, id: ResultId) -> bool {
        self.get(id).should_compute()
    }

    /// Hand out a zeroed image buffer from the pool, to be filled and then passed to
    /// [`ResultStore::allocate_image`].
    pub fn acquire_buffer(&self, domain: Domain, ty: ResultType) -> PixelBuffer {
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .acquire(domain, ty)
    }

    /// Return a buffer that was acquired but never allocated into a result.
    pub fn return_buffer(&self, buffer: PixelBuffer) {
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(buffer);
    }

    /// Allocate `id` as a single value, converting to the result kind.
    pub fn allocate_single(&mut self, id: ResultId, value: Value) {
        self.free(id);
        let e = self.get_mut(id);
        e.storage = Storage::Single(value.convert(e.ty));
    }

    /// Allocate `id` with a finished image buffer. The buffer becomes read-only.
    pub fn allocate_image(&mut self, id: ResultId, buffer: PixelBuffer) {
        self.free(id);
        let buffer = if buffer.ty() == self.get(id).ty {
            buffer
        } else {
            let converted = self.convert_buffer(&buffer, self.get(id).ty);
            self.return_buffer(buffer);
            converted
        };
        self.get_mut(id).storage = Storage::Image(Arc::new(buffer));
    }

    /// Allocate `id` over caller-owned pixels. The buffer is never returned to the pool.
    pub fn allocate_external(&mut self, id: ResultId, buffer: Arc<PixelBuffer>) {
        self.free(id);
        let ty = self.get(id).ty;
        let storage = if buffer.ty() == ty {
            Storage::External(buffer)
        } else {
            Storage::Image(Arc::new(self.convert_buffer(&buffer, ty)))
        };
        self.get_mut(id).storage = storage;
    }

    /// Allocate `id` as explicitly invalid.
    pub fn allocate_invalid(&mut self, id: ResultId) {
        self.free(id);
        self.get_mut(id).storage = Storage::Invalid;
    }

    /// Make `target` alias the data of `source` without copying.
    ///
    /// Reference counts are kept. When the kinds differ the data is converted into fresh
    /// storage instead, since a buffer can only be aliased by a result of its own kind.
    pub fn share_data(&mut self, target: ResultId, source: ResultId) {
        if target == source {
            return;
        }
        let target_ty = self.get(target).ty;
        let storage = match &self.get(source).storage {
            Storage::Image(buf) | Storage::External(buf) if buf.ty() != target_ty => {
                let converted = self.convert_buffer(buf, target_ty);
                Storage::Image(Arc::new(converted))
            }
            Storage::Image(buf) => Storage::Image(Arc::clone(buf)),
            Storage::External(buf) => Storage::External(Arc::clone(buf)),
            Storage::Single(v) => Storage::Single(v.convert(target_ty)),
            Storage::Invalid => Storage::Invalid,
            Storage::Unallocated => Storage::Unallocated,
        };
        self.free(target);
        self.get_mut(target).storage = storage;
    }

    /// Drop one consumer of `id`, freeing its data when no consumer remains.
    pub fn release(&mut self, id: ResultId) {
        let e = self.get_mut(id);
        e.reference_count = e.reference_count.saturating_sub(1);
        if e.reference_count == 0 {
            self.free(id);
        }
    }

    /// Free the data of `id` regardless of its reference count.
    ///
    /// Shared image storage goes back to the pool only when the last sharer frees it.
    pub fn free(&mut self, id: ResultId) {
        let storage = std::mem::replace(&mut self.get_mut(id).storage, Storage::Unallocated);
        if let Storage::Image(buf) = storage
            && let Ok(buf) = Arc::try_unwrap(buf)
        {
            self.return_buffer(buf);
        }
    }

    /// Snapshot of `id` for reading.
    pub fn view(&self, id: ResultId) -> ResultView {
        self.get(id).view()
    }

    fn convert_buffer(&self, src: &PixelBuffer, ty: ResultType) -> PixelBuffer {
        let mut out = self.acquire_buffer(src.domain(), ty);
        let channels = ty.channels();
        for (i, px) in out.data_mut().chunks_exact_mut(channels).enumerate() {
            src.pixel(i).convert(ty).write_channels(px);
        }
        out
    }
}

#[cfg(test)]
#[path = "../../tests/unit/result/store.rs"]
mod tests;
