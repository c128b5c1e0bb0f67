//! GPU query allocation.
//!
//! Query slots come from fixed-capacity backend sets. A bitmap tracks free
//! slots per set (bit set means free); allocation scans 64 slots at a time
//! starting from a rewind cursor, so freed low indices are reused before the
//! set grows. When every set is full a new one is created on demand.

use std::sync::Arc;

use crate::backend::{GpuBackend, GpuQuerySet};
use crate::error::RhiError;
use crate::types::QueryKind;

/// Slots per backend query set.
pub const QUERY_POOL_CAPACITY: u32 = 256;

/// Location of an allocated query slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryHandle {
    pub(crate) pool: usize,
    pub(crate) index: u32,
}

impl QueryHandle {
    /// Slot index inside the owning pool.
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// One backend query set plus its free-slot bitmap.
struct QueryPool {
    set: GpuQuerySet,
    capacity: u32,
    free_bits: Vec<u64>,
    cursor: u32,
}

impl QueryPool {
    fn new(backend: &Arc<dyn GpuBackend>, kind: QueryKind, capacity: u32) -> Result<Self, RhiError> {
        let set = backend.create_query_set(kind, capacity)?;
        let words = capacity.div_ceil(64) as usize;
        let mut free_bits = vec![u64::MAX; words];
        // Mask out slots past the capacity in the last word.
        let tail = capacity % 64;
        if tail != 0 {
            free_bits[words - 1] = (1u64 << tail) - 1;
        }
        Ok(Self {
            set,
            capacity,
            free_bits,
            cursor: 0,
        })
    }

    fn has_free_indices(&self) -> bool {
        self.free_bits.iter().any(|word| *word != 0)
    }

    /// Claim the lowest free slot at or above the cursor, if any.
    fn find_index(&mut self) -> Option<u32> {
        let start_word = (self.cursor / 64) as usize;
        for word_index in start_word..self.free_bits.len() {
            let word = self.free_bits[word_index];
            if word == 0 {
                continue;
            }
            let bit = word.trailing_zeros();
            let index = word_index as u32 * 64 + bit;
            if index >= self.capacity {
                return None;
            }
            self.free_bits[word_index] &= !(1u64 << bit);
            self.cursor = index + 1;
            return Some(index);
        }
        // Slots below the cursor may have been freed without rewinding far
        // enough; one full rescan from zero covers them.
        if self.cursor > 0 {
            self.cursor = 0;
            return self.find_index();
        }
        None
    }

    fn release_index(&mut self, index: u32) {
        debug_assert!(index < self.capacity);
        let word = (index / 64) as usize;
        let bit = index % 64;
        debug_assert_eq!(self.free_bits[word] & (1u64 << bit), 0, "double release");
        self.free_bits[word] |= 1u64 << bit;
        self.cursor = self.cursor.min(index);
    }

    fn in_use(&self) -> u32 {
        let free: u32 = self.free_bits.iter().map(|w| w.count_ones()).sum();
        self.capacity - free
    }
}

/// Allocator over a growable list of query pools of one kind.
pub struct QueryAllocator {
    kind: QueryKind,
    capacity: u32,
    pools: Vec<QueryPool>,
}

impl QueryAllocator {
    pub fn new(kind: QueryKind) -> Self {
        Self {
            kind,
            capacity: QUERY_POOL_CAPACITY,
            pools: Vec::new(),
        }
    }

    #[cfg(test)]
    fn with_capacity(kind: QueryKind, capacity: u32) -> Self {
        Self {
            kind,
            capacity,
            pools: Vec::new(),
        }
    }

    /// Claim a slot, growing by one pool if every existing pool is full.
    /// The slot is reset before it is handed out.
    pub fn allocate(&mut self, backend: &Arc<dyn GpuBackend>) -> Result<QueryHandle, RhiError> {
        let pool_index = match self.pools.iter().position(QueryPool::has_free_indices) {
            Some(index) => index,
            None => {
                log::trace!(
                    "Growing {:?} query allocator to {} pools",
                    self.kind,
                    self.pools.len() + 1
                );
                self.pools
                    .push(QueryPool::new(backend, self.kind, self.capacity)?);
                self.pools.len() - 1
            }
        };
        let pool = &mut self.pools[pool_index];
        let index = pool
            .find_index()
            .ok_or_else(|| RhiError::Internal("query pool scan missed a free slot".to_string()))?;
        backend.reset_query(&pool.set, index);
        Ok(QueryHandle {
            pool: pool_index,
            index,
        })
    }

    /// Return a slot to its pool.
    pub fn release(&mut self, handle: QueryHandle) {
        self.pools[handle.pool].release_index(handle.index);
    }

    /// The backend set a handle lives in, for recording commands.
    pub fn set(&self, handle: QueryHandle) -> &GpuQuerySet {
        &self.pools[handle.pool].set
    }

    /// Non-blocking readiness poll.
    pub fn is_available(&self, backend: &Arc<dyn GpuBackend>, handle: QueryHandle) -> bool {
        backend.query_available(&self.pools[handle.pool].set, handle.index)
    }

    /// Non-blocking result read.
    pub fn result(&self, backend: &Arc<dyn GpuBackend>, handle: QueryHandle) -> Option<u64> {
        backend.query_result(&self.pools[handle.pool].set, handle.index)
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Total slots currently claimed.
    pub fn in_use(&self) -> u32 {
        self.pools.iter().map(QueryPool::in_use).sum()
    }
}

impl std::fmt::Debug for QueryAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryAllocator")
            .field("kind", &self.kind)
            .field("pools", &self.pools.len())
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// A begin/end timestamp pair measuring a GPU interval.
#[derive(Debug, Clone, Copy)]
pub struct TimerQuery {
    pub begin: QueryHandle,
    pub end: QueryHandle,
}

impl TimerQuery {
    /// Elapsed ticks, once both timestamps have landed.
    pub fn elapsed(
        &self,
        allocator: &QueryAllocator,
        backend: &Arc<dyn GpuBackend>,
    ) -> Option<u64> {
        let begin = allocator.result(backend, self.begin)?;
        let end = allocator.result(backend, self.end)?;
        Some(end.saturating_sub(begin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;

    fn backend() -> Arc<dyn GpuBackend> {
        Arc::new(NullBackend::new())
    }

    #[test]
    fn test_allocation_prefers_lowest_free_slot() {
        let backend = backend();
        let mut allocator = QueryAllocator::with_capacity(QueryKind::Timestamp, 8);
        let a = allocator.allocate(&backend).unwrap();
        let b = allocator.allocate(&backend).unwrap();
        let c = allocator.allocate(&backend).unwrap();
        assert_eq!((a.index, b.index, c.index), (0, 1, 2));

        // Freeing a low slot rewinds the cursor.
        allocator.release(a);
        let d = allocator.allocate(&backend).unwrap();
        assert_eq!(d.index, 0);

        // Next allocation resumes after the rewound claim.
        let e = allocator.allocate(&backend).unwrap();
        assert_eq!(e.index, 3);
        drop((b, c, d, e));
    }

    #[test]
    fn test_allocator_grows_when_full() {
        let backend = backend();
        let mut allocator = QueryAllocator::with_capacity(QueryKind::Timestamp, 4);
        let mut handles = Vec::new();
        for _ in 0..4 {
            handles.push(allocator.allocate(&backend).unwrap());
        }
        assert_eq!(allocator.pool_count(), 1);

        let overflow = allocator.allocate(&backend).unwrap();
        assert_eq!(allocator.pool_count(), 2);
        assert_eq!(overflow.pool, 1);
        assert_eq!(overflow.index, 0);

        // Releasing into the first pool makes it preferred again.
        allocator.release(handles[1]);
        let reused = allocator.allocate(&backend).unwrap();
        assert_eq!((reused.pool, reused.index), (0, 1));
    }

    #[test]
    fn test_allocation_resets_recycled_slot() {
        let backend = backend();
        let mut allocator = QueryAllocator::with_capacity(QueryKind::Timestamp, 4);
        let handle = allocator.allocate(&backend).unwrap();
        backend.complete_query(allocator.set(handle), handle.index, 77);
        assert_eq!(allocator.result(&backend, handle), Some(77));

        allocator.release(handle);
        let recycled = allocator.allocate(&backend).unwrap();
        assert_eq!(recycled.index, handle.index);
        assert!(!allocator.is_available(&backend, recycled));
    }

    #[test]
    fn test_timer_query_needs_both_timestamps() {
        let backend = backend();
        let mut allocator = QueryAllocator::new(QueryKind::Timestamp);
        let timer = TimerQuery {
            begin: allocator.allocate(&backend).unwrap(),
            end: allocator.allocate(&backend).unwrap(),
        };
        assert_eq!(timer.elapsed(&allocator, &backend), None);

        backend.complete_query(allocator.set(timer.begin), timer.begin.index, 100);
        assert_eq!(timer.elapsed(&allocator, &backend), None);

        backend.complete_query(allocator.set(timer.end), timer.end.index, 350);
        assert_eq!(timer.elapsed(&allocator, &backend), Some(250));
    }

    #[test]
    fn test_bitmap_spans_multiple_words() {
        let backend = backend();
        let mut allocator = QueryAllocator::with_capacity(QueryKind::PipelineStatistics, 130);
        let mut handles = Vec::new();
        for expected in 0..130 {
            let handle = allocator.allocate(&backend).unwrap();
            assert_eq!(handle.index, expected);
            handles.push(handle);
        }
        assert_eq!(allocator.pool_count(), 1);
        assert_eq!(allocator.in_use(), 130);

        allocator.release(handles[129]);
        allocator.release(handles[0]);
        assert_eq!(allocator.allocate(&backend).unwrap().index, 0);
        assert_eq!(allocator.allocate(&backend).unwrap().index, 129);
    }
}
