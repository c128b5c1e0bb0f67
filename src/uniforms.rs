//! Uniform data streaming.
//!
//! CPU-produced uniform data flows to the GPU through slices of a shared
//! [`ConstantHeap`]. Two pool flavors sit on top:
//!
//! - [`GlobalUniformPool`]: a stack of pass-level uniform blocks, pushed and
//!   popped around render passes; the top of the stack is what gets bound.
//! - [`LocalUniformPool`]: per-draw uniform data appended into ring slices;
//!   every bind lands at a fresh aligned offset so earlier draws in the same
//!   frame keep the bytes they were recorded with.

use std::sync::Arc;

use crate::backend::{GpuBackend, GpuBuffer};
use crate::block::{BlockAllocation, BlockAllocator, DEFAULT_BLOCK_SIZE};
use crate::error::RhiError;
use crate::types::{BufferDescriptor, BufferUsage};

/// Initial capacity of one global stack level.
pub const GLOBAL_LEVEL_SIZE: u64 = 4096;

/// Capacity of one local-pool ring slice.
pub const LOCAL_RING_SIZE: u64 = 64 * 1024;

/// Round `value` up to a multiple of `alignment` (a power of two).
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// A sub-range of a constant-heap block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapSlice {
    allocation: BlockAllocation,
}

impl HeapSlice {
    /// Byte offset inside the backing buffer.
    pub fn offset(&self) -> u64 {
        self.allocation.offset
    }

    /// Slice capacity in bytes.
    pub fn size(&self) -> u64 {
        self.allocation.size
    }
}

/// A bindable uniform-buffer range.
#[derive(Debug, Clone)]
pub struct BufferBinding {
    pub buffer: Arc<GpuBuffer>,
    pub offset: u64,
    pub size: u64,
}

/// Block-allocated pool of GPU uniform buffers.
///
/// Every slice size is rounded up to the device's uniform-offset alignment,
/// so slice offsets (and therefore binding offsets) stay aligned no matter
/// how allocations interleave.
pub struct ConstantHeap {
    backend: Arc<dyn GpuBackend>,
    allocator: BlockAllocator,
    buffers: Vec<Arc<GpuBuffer>>,
    alignment: u64,
}

impl ConstantHeap {
    pub fn new(backend: Arc<dyn GpuBackend>) -> Self {
        Self::with_block_size(backend, DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(backend: Arc<dyn GpuBackend>, block_size: u64) -> Self {
        let alignment = backend.limits().min_uniform_offset_alignment;
        Self {
            backend,
            allocator: BlockAllocator::new(block_size),
            buffers: Vec::new(),
            alignment,
        }
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// Uniform-offset alignment every slice honors.
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Carve out a slice of at least `size` bytes.
    pub fn allocate(&mut self, size: u64) -> Result<HeapSlice, RhiError> {
        let allocation = self.allocator.allocate(align_up(size, self.alignment))?;
        while self.buffers.len() <= allocation.block {
            let descriptor = BufferDescriptor::new(
                self.allocator.block_size(),
                BufferUsage::UNIFORM | BufferUsage::COPY_DST | BufferUsage::MAP_WRITE,
            )
            .with_label(format!("constant-heap block {}", self.buffers.len()));
            let buffer = self.backend.create_buffer(&descriptor)?;
            self.buffers.push(Arc::new(buffer));
        }
        Ok(HeapSlice { allocation })
    }

    /// Return a slice to the heap.
    pub fn free(&mut self, slice: HeapSlice) {
        self.allocator.deallocate(slice.allocation);
    }

    /// Backing buffer of a slice.
    pub fn buffer(&self, slice: &HeapSlice) -> Arc<GpuBuffer> {
        self.buffers[slice.allocation.block].clone()
    }

    /// Upload into a slice at `offset` bytes past its start.
    pub fn write(&self, slice: &HeapSlice, offset: u64, data: &[u8]) {
        debug_assert!(offset + data.len() as u64 <= slice.size());
        let buffer = &self.buffers[slice.allocation.block];
        self.backend
            .write_buffer(buffer, slice.offset() + offset, data);
    }

    pub fn block_count(&self) -> usize {
        self.allocator.block_count()
    }
}

impl std::fmt::Debug for ConstantHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstantHeap")
            .field("blocks", &self.allocator.block_count())
            .field("alignment", &self.alignment)
            .finish()
    }
}

struct GlobalLevel {
    slice: HeapSlice,
    buffer: Arc<GpuBuffer>,
    size: u64,
}

/// Stack of pass-level uniform blocks.
///
/// Levels are retained across resets and reused; a push only reallocates a
/// level when its data outgrows the retained slice.
pub struct GlobalUniformPool {
    levels: Vec<GlobalLevel>,
    index: isize,
}

impl GlobalUniformPool {
    pub fn new() -> Self {
        Self {
            levels: Vec::new(),
            index: -1,
        }
    }

    /// Push `data` as the new top of the stack.
    pub fn push(&mut self, heap: &mut ConstantHeap, data: &[u8]) -> Result<(), RhiError> {
        let next = (self.index + 1) as usize;
        let needed = data.len() as u64;

        if next < self.levels.len() && self.levels[next].slice.size() < needed {
            // Retained level is too small for this pass; grow it.
            let stale = self.levels.remove(next);
            heap.free(stale.slice);
            debug_assert!(self.levels.len() >= next);
            let slice = heap.allocate(needed.max(GLOBAL_LEVEL_SIZE))?;
            let buffer = heap.buffer(&slice);
            self.levels.insert(
                next,
                GlobalLevel {
                    slice,
                    buffer,
                    size: 0,
                },
            );
        } else if next == self.levels.len() {
            let slice = heap.allocate(needed.max(GLOBAL_LEVEL_SIZE))?;
            let buffer = heap.buffer(&slice);
            self.levels.push(GlobalLevel {
                slice,
                buffer,
                size: 0,
            });
        }

        let level = &mut self.levels[next];
        heap.write(&level.slice, 0, data);
        level.size = needed;
        self.index = next as isize;
        Ok(())
    }

    /// Pop the top of the stack. Popping an empty stack is absorbed.
    pub fn pop(&mut self) {
        if self.index < 0 {
            log::error!("Global uniform pool popped while empty");
            return;
        }
        self.index -= 1;
    }

    /// Binding for the current top of the stack.
    pub fn bind(&self) -> Option<BufferBinding> {
        if self.index < 0 {
            return None;
        }
        let level = &self.levels[self.index as usize];
        Some(BufferBinding {
            buffer: level.buffer.clone(),
            offset: level.slice.offset(),
            size: level.size,
        })
    }

    /// Stack depth.
    pub fn depth(&self) -> usize {
        (self.index + 1) as usize
    }

    /// Rewind the stack for a new frame. Levels are retained.
    pub fn reset(&mut self) {
        self.index = -1;
    }

    /// Give every retained level back to the heap.
    pub fn release(&mut self, heap: &mut ConstantHeap) {
        for level in self.levels.drain(..) {
            heap.free(level.slice);
        }
        self.index = -1;
    }
}

impl Default for GlobalUniformPool {
    fn default() -> Self {
        Self::new()
    }
}

struct RingSlice {
    slice: HeapSlice,
    buffer: Arc<GpuBuffer>,
}

/// Append-only pool for per-draw uniform data.
///
/// `update` stages bytes into a CPU shadow; `bind` flushes the shadow into
/// the current ring slice at the next aligned offset. Earlier flushes are
/// never overwritten within a frame.
#[derive(Default)]
pub struct LocalUniformPool {
    shadow: Vec<u8>,
    shadow_size: u64,
    rings: Vec<RingSlice>,
    ring_index: usize,
    used_data: u64,
}

impl LocalUniformPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `data` at `offset` bytes into the shadow block.
    pub fn update(&mut self, data: &[u8], offset: u64) {
        let end = offset as usize + data.len();
        if self.shadow.len() < end {
            self.shadow.resize(end, 0);
        }
        self.shadow[offset as usize..end].copy_from_slice(data);
        self.shadow_size = self.shadow_size.max(end as u64);
    }

    /// Flush the shadow into the ring and return its binding.
    ///
    /// Returns `Ok(None)` when nothing was staged since the last flush.
    pub fn bind(&mut self, heap: &mut ConstantHeap) -> Result<Option<BufferBinding>, RhiError> {
        if self.shadow_size == 0 {
            return Ok(None);
        }
        let aligned = align_up(self.shadow_size, heap.alignment());
        let needed_capacity = aligned.max(LOCAL_RING_SIZE);

        // Roll to the next ring slice when the current one cannot fit the
        // flush (or when the data outgrew the slice entirely).
        loop {
            match self.rings.get(self.ring_index) {
                None => {
                    let slice = heap.allocate(needed_capacity)?;
                    let buffer = heap.buffer(&slice);
                    self.rings.push(RingSlice { slice, buffer });
                    self.used_data = 0;
                    break;
                }
                Some(ring) if ring.slice.size() < aligned => {
                    let stale = self.rings.remove(self.ring_index);
                    heap.free(stale.slice);
                    continue;
                }
                Some(ring) if self.used_data + aligned > ring.slice.size() => {
                    self.ring_index += 1;
                    self.used_data = 0;
                    continue;
                }
                Some(_) => break,
            }
        }

        let ring = &self.rings[self.ring_index];
        heap.write(&ring.slice, self.used_data, &self.shadow[..self.shadow_size as usize]);
        let binding = BufferBinding {
            buffer: ring.buffer.clone(),
            offset: ring.slice.offset() + self.used_data,
            size: self.shadow_size,
        };
        self.used_data += aligned;
        // The staged length is consumed; the shadow keeps its capacity and
        // bytes so partial updates before the next flush overlay them.
        self.shadow_size = 0;
        Ok(Some(binding))
    }

    /// Bytes consumed in the current ring slice.
    pub fn used_data(&self) -> u64 {
        self.used_data
    }

    /// Rewind for a new frame. Ring slices and shadow capacity are retained;
    /// staged data is discarded.
    pub fn reset(&mut self) {
        self.shadow_size = 0;
        self.ring_index = 0;
        self.used_data = 0;
    }

    /// Give every ring slice back to the heap.
    pub fn release(&mut self, heap: &mut ConstantHeap) {
        for ring in self.rings.drain(..) {
            heap.free(ring.slice);
        }
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;

    fn heap() -> ConstantHeap {
        ConstantHeap::with_block_size(Arc::new(NullBackend::new()), 256 * 1024)
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
    }

    #[test]
    fn test_heap_slices_are_aligned() {
        let mut heap = heap();
        let a = heap.allocate(100).unwrap();
        let b = heap.allocate(1).unwrap();
        assert_eq!(a.offset() % 256, 0);
        assert_eq!(b.offset() % 256, 0);
        assert_eq!(b.offset(), 256);
        heap.free(a);
        heap.free(b);
    }

    #[test]
    fn test_global_stack_push_pop_bind() {
        let mut heap = heap();
        let mut pool = GlobalUniformPool::new();
        assert!(pool.bind().is_none());

        pool.push(&mut heap, &[1u8; 64]).unwrap();
        pool.push(&mut heap, &[2u8; 32]).unwrap();
        assert_eq!(pool.depth(), 2);

        let top = pool.bind().unwrap();
        assert_eq!(top.size, 32);
        assert_eq!(heap.backend().read_buffer(&top.buffer, top.offset, 4), vec![2; 4]);

        pool.pop();
        let top = pool.bind().unwrap();
        assert_eq!(top.size, 64);
        assert_eq!(heap.backend().read_buffer(&top.buffer, top.offset, 4), vec![1; 4]);

        pool.pop();
        assert!(pool.bind().is_none());
        pool.release(&mut heap);
    }

    #[test]
    fn test_global_level_grows_for_large_data() {
        let mut heap = heap();
        let mut pool = GlobalUniformPool::new();
        pool.push(&mut heap, &[3u8; 16]).unwrap();
        pool.reset();

        // Larger than the retained 4 KiB level.
        let big = vec![7u8; 8192];
        pool.push(&mut heap, &big).unwrap();
        let top = pool.bind().unwrap();
        assert_eq!(top.size, 8192);
        assert_eq!(
            heap.backend().read_buffer(&top.buffer, top.offset + 8000, 8),
            vec![7; 8]
        );
        pool.release(&mut heap);
    }

    #[test]
    fn test_local_bind_without_update_is_noop() {
        let mut heap = heap();
        let mut pool = LocalUniformPool::new();
        assert!(pool.bind(&mut heap).unwrap().is_none());
        assert_eq!(pool.used_data(), 0);
    }

    #[test]
    fn test_local_binds_advance_by_alignment() {
        let mut heap = heap();
        let mut pool = LocalUniformPool::new();

        pool.update(&[5u8; 16], 0);
        let first = pool.bind(&mut heap).unwrap().unwrap();
        // Flushing consumes the staged length.
        assert!(pool.bind(&mut heap).unwrap().is_none());

        pool.update(&[5u8; 16], 0);
        let second = pool.bind(&mut heap).unwrap().unwrap();
        assert_eq!(second.offset - first.offset, 256);
        assert_eq!(pool.used_data(), 512);

        // The first flush keeps its bytes after later binds.
        pool.update(&[9u8; 16], 0);
        let third = pool.bind(&mut heap).unwrap().unwrap();
        assert_eq!(third.offset - second.offset, 256);
        assert_eq!(
            heap.backend().read_buffer(&first.buffer, first.offset, 16),
            vec![5; 16]
        );
        assert_eq!(
            heap.backend().read_buffer(&third.buffer, third.offset, 16),
            vec![9; 16]
        );
        pool.release(&mut heap);
    }

    #[test]
    fn test_local_partial_update_overlays_shadow() {
        let mut heap = heap();
        let mut pool = LocalUniformPool::new();
        pool.update(&[1u8; 32], 0);
        pool.update(&[2u8; 8], 8);
        let binding = pool.bind(&mut heap).unwrap().unwrap();
        assert_eq!(binding.size, 32);
        let bytes = heap.backend().read_buffer(&binding.buffer, binding.offset, 32);
        assert_eq!(&bytes[0..8], &[1; 8]);
        assert_eq!(&bytes[8..16], &[2; 8]);
        assert_eq!(&bytes[16..32], &[1; 16]);
        pool.release(&mut heap);
    }

    #[test]
    fn test_local_ring_rolls_when_full() {
        let mut heap = heap();
        let mut pool = LocalUniformPool::new();

        let per_bind = 256;
        let binds_per_ring = LOCAL_RING_SIZE / per_bind;
        for _ in 0..binds_per_ring {
            pool.update(&[4u8; 1], 0);
            pool.bind(&mut heap).unwrap().unwrap();
        }
        assert_eq!(pool.used_data(), LOCAL_RING_SIZE);

        // The next flush does not fit; a second ring slice is carved out.
        pool.update(&[4u8; 1], 0);
        let rolled = pool.bind(&mut heap).unwrap().unwrap();
        assert_eq!(pool.used_data(), 256);
        assert_eq!(rolled.offset % 256, 0);
        pool.release(&mut heap);
    }

    #[test]
    fn test_local_reset_rewinds_ring() {
        let mut heap = heap();
        let mut pool = LocalUniformPool::new();
        pool.update(&[6u8; 64], 0);
        let first = pool.bind(&mut heap).unwrap().unwrap();
        pool.reset();

        assert!(pool.bind(&mut heap).unwrap().is_none());
        pool.update(&[8u8; 64], 0);
        let after_reset = pool.bind(&mut heap).unwrap().unwrap();
        assert_eq!(after_reset.offset, first.offset);
        pool.release(&mut heap);
    }
}
