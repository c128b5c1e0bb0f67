//! Deferred resource destruction.
//!
//! Backend handles queued here are kept alive until the GPU has retired
//! every frame that could still reference them, then dropped. Destruction on
//! the backend side is the handle's `Drop`; this module only delays it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{
    GpuBuffer, GpuCommandList, GpuFence, GpuFramebuffer, GpuQuerySet, GpuSampler, GpuTexture,
    GpuTextureView,
};

/// Maximum number of frames in flight.
pub const FRAMES_IN_FLIGHT: usize = 3;

/// A backend handle awaiting destruction.
#[derive(Debug)]
pub enum DeferredHandle {
    Buffer(Arc<GpuBuffer>),
    Texture(Arc<GpuTexture>),
    TextureView(Arc<GpuTextureView>),
    Sampler(Arc<GpuSampler>),
    Framebuffer(GpuFramebuffer),
    QuerySet(GpuQuerySet),
    Fence(GpuFence),
    CommandList(Arc<GpuCommandList>),
}

/// Holds retired backend handles for [`FRAMES_IN_FLIGHT`] frames before
/// dropping them.
#[derive(Debug, Default)]
pub struct DeferredDestructor {
    frame_queues: [Mutex<Vec<DeferredHandle>>; FRAMES_IN_FLIGHT],
    current_frame: AtomicU64,
}

impl DeferredDestructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a handle for destruction once the current frame retires.
    pub fn queue(&self, handle: DeferredHandle) {
        let frame = self.current_frame.load(Ordering::Acquire) as usize;
        self.frame_queues[frame % FRAMES_IN_FLIGHT].lock().push(handle);
    }

    /// Advance to the next frame, dropping everything queued
    /// [`FRAMES_IN_FLIGHT`] frames ago.
    ///
    /// The caller must have waited on the fence of the frame being recycled
    /// before calling this.
    pub fn advance_frame(&self) {
        let next = self.current_frame.fetch_add(1, Ordering::AcqRel) + 1;
        let recycled: Vec<DeferredHandle> =
            std::mem::take(&mut *self.frame_queues[next as usize % FRAMES_IN_FLIGHT].lock());
        if !recycled.is_empty() {
            log::trace!(
                "Destroying {} deferred resources from frame {}",
                recycled.len(),
                next.saturating_sub(FRAMES_IN_FLIGHT as u64)
            );
        }
        drop(recycled);
    }

    /// Drop everything immediately. Only valid after a full device wait.
    pub fn flush_all(&self) {
        for queue in &self.frame_queues {
            queue.lock().clear();
        }
    }

    /// Total number of handles currently held.
    pub fn pending_count(&self) -> usize {
        self.frame_queues.iter().map(|q| q.lock().len()).sum()
    }

    /// Monotonic frame counter.
    pub fn current_frame(&self) -> u64 {
        self.current_frame.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    fn shadow_buffer() -> Arc<GpuBuffer> {
        Arc::new(GpuBuffer::Null {
            size: 4,
            data: PlMutex::new(vec![0; 4]),
        })
    }

    #[test]
    fn test_handles_survive_until_frame_recycles() {
        let destructor = DeferredDestructor::new();
        let buffer = shadow_buffer();
        let weak = Arc::downgrade(&buffer);
        destructor.queue(DeferredHandle::Buffer(buffer));
        assert_eq!(destructor.pending_count(), 1);

        for _ in 0..FRAMES_IN_FLIGHT - 1 {
            destructor.advance_frame();
            assert!(weak.upgrade().is_some());
        }
        destructor.advance_frame();
        assert!(weak.upgrade().is_none());
        assert_eq!(destructor.pending_count(), 0);
    }

    #[test]
    fn test_flush_all_drops_everything() {
        let destructor = DeferredDestructor::new();
        let buffer = shadow_buffer();
        let weak = Arc::downgrade(&buffer);
        destructor.queue(DeferredHandle::Buffer(buffer));
        destructor.advance_frame();
        destructor.queue(DeferredHandle::TextureView(Arc::new(GpuTextureView::Null)));
        assert_eq!(destructor.pending_count(), 2);
        destructor.flush_all();
        assert_eq!(destructor.pending_count(), 0);
        assert!(weak.upgrade().is_none());
    }
}
