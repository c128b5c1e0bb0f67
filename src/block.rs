//! Generic fixed-block sub-allocator with free-fragment coalescing.
//!
//! A [`Block`] is a fixed-size backend allocation subdivided into
//! [`Fragment`]s tracked in an offset-ordered free list. Adjacent free
//! fragments merge on release, so a fully released block collapses back to a
//! single fragment spanning it. The [`BlockAllocator`] grows by whole blocks:
//! a new block is created only when no existing block can serve the request,
//! and requests larger than the fixed block size fail outright.
//!
//! This allocator backs the constant-memory heap the uniform streaming pools
//! draw their backing buffers from.

use crate::error::RhiError;

/// Default block size for constant-memory pools (8 MiB).
pub const DEFAULT_BLOCK_SIZE: u64 = 8 * 1024 * 1024;

/// A contiguous free range inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    /// Byte offset of the fragment inside its block.
    pub offset: u64,
    /// Size of the fragment in bytes.
    pub size: u64,
}

impl Fragment {
    /// End offset (offset + size).
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// A fixed-size allocation subdivided into fragments.
#[derive(Debug)]
pub struct Block {
    size: u64,
    /// Free fragments, sorted by offset, never overlapping.
    free: Vec<Fragment>,
}

impl Block {
    /// Create a block whose whole range is one free fragment.
    pub fn new(size: u64) -> Self {
        Self {
            size,
            free: vec![Fragment { offset: 0, size }],
        }
    }

    /// Total block size.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Size of the largest free fragment.
    pub fn largest_free(&self) -> u64 {
        self.free.iter().map(|f| f.size).max().unwrap_or(0)
    }

    /// Whether the whole block is free.
    pub fn is_unused(&self) -> bool {
        self.free.len() == 1 && self.free[0].offset == 0 && self.free[0].size == self.size
    }

    /// First-fit allocation. Returns the offset of the carved range, or
    /// `None` if no fragment is large enough.
    pub fn allocate(&mut self, size: u64) -> Option<u64> {
        let index = self.free.iter().position(|f| f.size >= size)?;
        let fragment = &mut self.free[index];
        let offset = fragment.offset;
        if fragment.size == size {
            self.free.remove(index);
        } else {
            fragment.offset += size;
            fragment.size -= size;
        }
        Some(offset)
    }

    /// Return a range to the free list, merging with adjacent fragments.
    pub fn deallocate(&mut self, offset: u64, size: u64) {
        debug_assert!(offset + size <= self.size, "deallocation out of range");

        let index = self
            .free
            .iter()
            .position(|f| f.offset > offset)
            .unwrap_or(self.free.len());

        // Merge with the preceding fragment when contiguous.
        if index > 0 && self.free[index - 1].end() == offset {
            self.free[index - 1].size += size;
            // The grown fragment may now touch the following one.
            if index < self.free.len() && self.free[index - 1].end() == self.free[index].offset {
                let next = self.free.remove(index);
                self.free[index - 1].size += next.size;
            }
            return;
        }

        // Merge with the following fragment when contiguous.
        if index < self.free.len() && offset + size == self.free[index].offset {
            self.free[index].offset = offset;
            self.free[index].size += size;
            return;
        }

        self.free.insert(index, Fragment { offset, size });
    }
}

/// Location of a sub-allocation produced by a [`BlockAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockAllocation {
    /// Index of the owning block.
    pub block: usize,
    /// Byte offset inside the block.
    pub offset: u64,
    /// Size of the allocation in bytes.
    pub size: u64,
}

/// Grows by fixed-size blocks, carving fragments out of them first-fit.
#[derive(Debug)]
pub struct BlockAllocator {
    block_size: u64,
    blocks: Vec<Block>,
}

impl BlockAllocator {
    /// Create an allocator with the given fixed block size.
    pub fn new(block_size: u64) -> Self {
        Self {
            block_size,
            blocks: Vec::new(),
        }
    }

    /// The fixed block size.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Number of blocks created so far.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Allocate `size` bytes, creating a new block only if no existing block
    /// has a fragment large enough.
    ///
    /// # Errors
    ///
    /// Requests larger than the fixed block size are fatal: no block can
    /// ever satisfy them.
    pub fn allocate(&mut self, size: u64) -> Result<BlockAllocation, RhiError> {
        if size == 0 {
            return Err(RhiError::InvalidParameter(
                "block allocation size cannot be zero".to_string(),
            ));
        }
        if size > self.block_size {
            return Err(RhiError::AllocationTooLarge {
                requested: size,
                block_size: self.block_size,
            });
        }

        for (index, block) in self.blocks.iter_mut().enumerate() {
            if let Some(offset) = block.allocate(size) {
                return Ok(BlockAllocation {
                    block: index,
                    offset,
                    size,
                });
            }
        }

        let mut block = Block::new(self.block_size);
        let offset = block
            .allocate(size)
            .ok_or_else(|| RhiError::Internal("fresh block cannot satisfy allocation".into()))?;
        self.blocks.push(block);

        log::trace!(
            "BlockAllocator: created block {} ({} bytes)",
            self.blocks.len() - 1,
            self.block_size
        );

        Ok(BlockAllocation {
            block: self.blocks.len() - 1,
            offset,
            size,
        })
    }

    /// Return an allocation to its block's free list.
    pub fn deallocate(&mut self, allocation: BlockAllocation) {
        if let Some(block) = self.blocks.get_mut(allocation.block) {
            block.deallocate(allocation.offset, allocation.size);
        } else {
            log::error!(
                "BlockAllocator: deallocation references unknown block {}",
                allocation.block
            );
        }
    }

    /// Access a block, for diagnostics.
    pub fn block(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_offsets() {
        let mut block = Block::new(1024);
        assert_eq!(block.allocate(100), Some(0));
        assert_eq!(block.allocate(50), Some(100));
        assert_eq!(block.allocate(200), Some(150));
    }

    #[test]
    fn test_coalescing_in_release_order() {
        let mut block = Block::new(1024);
        let a = block.allocate(100).unwrap();
        let b = block.allocate(50).unwrap();

        block.deallocate(a, 100);
        block.deallocate(b, 50);

        // Both fragments merged with the tail: a single 150+ byte region at 0.
        assert_eq!(block.allocate(150), Some(0));
    }

    #[test]
    fn test_coalescing_in_reverse_order() {
        let mut block = Block::new(1024);
        let a = block.allocate(100).unwrap();
        let b = block.allocate(50).unwrap();
        // Pin the tail so the freed ranges cannot merge into it.
        let _c = block.allocate(64).unwrap();

        block.deallocate(b, 50);
        block.deallocate(a, 100);

        assert_eq!(block.allocate(150), Some(0));
    }

    #[test]
    fn test_fully_released_block_is_unused() {
        let mut block = Block::new(256);
        let a = block.allocate(128).unwrap();
        let b = block.allocate(128).unwrap();
        assert!(!block.is_unused());

        block.deallocate(a, 128);
        block.deallocate(b, 128);
        assert!(block.is_unused());
        assert_eq!(block.largest_free(), 256);
    }

    #[test]
    fn test_allocator_grows_by_blocks() {
        let mut allocator = BlockAllocator::new(256);
        let a = allocator.allocate(200).unwrap();
        assert_eq!((a.block, a.offset), (0, 0));

        // Does not fit block 0, so a second block appears.
        let b = allocator.allocate(100).unwrap();
        assert_eq!((b.block, b.offset), (1, 0));
        assert_eq!(allocator.block_count(), 2);

        // Small request is served from the first block's remainder.
        let c = allocator.allocate(56).unwrap();
        assert_eq!((c.block, c.offset), (0, 200));
        assert_eq!(allocator.block_count(), 2);
    }

    #[test]
    fn test_oversized_request_fails() {
        let mut allocator = BlockAllocator::new(256);
        let result = allocator.allocate(257);
        assert_eq!(
            result,
            Err(RhiError::AllocationTooLarge {
                requested: 257,
                block_size: 256
            })
        );
    }

    #[test]
    fn test_zero_sized_request_fails() {
        let mut allocator = BlockAllocator::new(256);
        assert!(allocator.allocate(0).is_err());
    }

    #[test]
    fn test_reuse_after_deallocate() {
        let mut allocator = BlockAllocator::new(256);
        let a = allocator.allocate(100).unwrap();
        let b = allocator.allocate(50).unwrap();
        allocator.deallocate(a);
        allocator.deallocate(b);

        let c = allocator.allocate(150).unwrap();
        assert_eq!((c.block, c.offset), (0, 0));
        assert_eq!(allocator.block_count(), 1);
    }
}
