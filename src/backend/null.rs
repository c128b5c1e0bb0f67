//! Null backend.
//!
//! Implements every backend contract without touching a GPU. Buffers carry a
//! CPU shadow so writes and copies are observable, fences signal immediately
//! on submit, and queries complete through the `complete_query` hook. This is
//! the backend the test suite runs against.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::RhiError;
use crate::types::{
    BufferDescriptor, ClearColorValue, Extent3d, FilterMode, IndexFormat, QueryKind, Rect,
    ResourceAccess, SamplerDescriptor, TextureDescriptor, TextureFormat, TextureSubresource,
};

use super::{
    BackendKind, BackendLimits, GpuBackend, GpuBuffer, GpuCommandList, GpuFence, GpuFramebuffer,
    GpuQuerySet, GpuSampler, GpuTexture, GpuTextureView,
};

/// No-op backend for tests and headless development.
#[derive(Debug, Default)]
pub struct NullBackend {
    limits: BackendLimits,
}

impl NullBackend {
    pub fn new() -> Self {
        Self {
            limits: BackendLimits::default(),
        }
    }

    fn record(&self, commands: &GpuCommandList) {
        if let GpuCommandList::Null { recorded, .. } = commands {
            recorded.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl GpuBackend for NullBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::None
    }

    fn name(&self) -> &'static str {
        "None"
    }

    fn limits(&self) -> BackendLimits {
        self.limits
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, RhiError> {
        if descriptor.size == 0 {
            return Err(RhiError::InvalidParameter(
                "buffer size must be non-zero".to_string(),
            ));
        }
        if descriptor.size > self.limits.max_buffer_size {
            return Err(RhiError::OutOfMemory);
        }
        log::trace!(
            "Null: create buffer {:?} ({} bytes)",
            descriptor.label,
            descriptor.size
        );
        Ok(GpuBuffer::Null {
            size: descriptor.size,
            data: Mutex::new(vec![0; descriptor.size as usize]),
        })
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, RhiError> {
        let max = self.limits.max_texture_dimension;
        if descriptor.size.width == 0 || descriptor.size.height == 0 {
            return Err(RhiError::InvalidParameter(
                "texture extent must be non-zero".to_string(),
            ));
        }
        if descriptor.size.width > max || descriptor.size.height > max {
            return Err(RhiError::ResourceCreationFailed(format!(
                "texture extent {}x{} exceeds device limit {}",
                descriptor.size.width, descriptor.size.height, max
            )));
        }
        log::trace!(
            "Null: create texture {:?} ({:?}, {:?})",
            descriptor.label,
            descriptor.format,
            descriptor.size
        );
        Ok(GpuTexture::Null)
    }

    fn create_texture_view(
        &self,
        _texture: &GpuTexture,
        _format: TextureFormat,
        _subresource: &TextureSubresource,
    ) -> Result<GpuTextureView, RhiError> {
        Ok(GpuTextureView::Null)
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<GpuSampler, RhiError> {
        log::trace!("Null: create sampler {:?}", descriptor.label);
        Ok(GpuSampler::Null)
    }

    fn create_fence(&self, signaled: bool) -> GpuFence {
        GpuFence::Null {
            signaled: AtomicBool::new(signaled),
        }
    }

    fn create_query_set(&self, kind: QueryKind, capacity: u32) -> Result<GpuQuerySet, RhiError> {
        if capacity == 0 {
            return Err(RhiError::InvalidParameter(
                "query set capacity must be non-zero".to_string(),
            ));
        }
        log::trace!("Null: create {:?} query set, capacity {}", kind, capacity);
        Ok(GpuQuerySet::Null {
            available: Mutex::new(vec![false; capacity as usize]),
            results: Mutex::new(vec![0; capacity as usize]),
        })
    }

    fn create_framebuffer(
        &self,
        _colors: &[(&GpuTextureView, TextureFormat)],
        _depth: Option<(&GpuTextureView, TextureFormat)>,
        extent: Extent3d,
    ) -> Result<GpuFramebuffer, RhiError> {
        Ok(GpuFramebuffer::Null { extent })
    }

    fn wait_fence(&self, fence: &GpuFence) -> Result<(), RhiError> {
        let GpuFence::Null { signaled } = fence else {
            return Err(RhiError::InvalidParameter(
                "fence belongs to another backend".to_string(),
            ));
        };
        if signaled.load(Ordering::Acquire) {
            Ok(())
        } else {
            // Nothing will ever signal it; report as the diagnostic timeout.
            Err(RhiError::FenceTimeout)
        }
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> bool {
        match fence {
            GpuFence::Null { signaled } => signaled.load(Ordering::Acquire),
            #[cfg(feature = "vulkan-backend")]
            _ => false,
        }
    }

    fn reset_fence(&self, fence: &GpuFence) {
        if let GpuFence::Null { signaled } = fence {
            signaled.store(false, Ordering::Release);
        }
    }

    fn signal_fence(&self, fence: &GpuFence) {
        if let GpuFence::Null { signaled } = fence {
            signaled.store(true, Ordering::Release);
        }
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) {
        if let GpuBuffer::Null { data: shadow, .. } = buffer {
            let mut shadow = shadow.lock();
            let offset = offset as usize;
            let end = offset + data.len();
            if end <= shadow.len() {
                shadow[offset..end].copy_from_slice(data);
            } else {
                log::error!(
                    "Null: write of {} bytes at offset {} overruns buffer of {} bytes",
                    data.len(),
                    offset,
                    shadow.len()
                );
            }
        }
    }

    fn read_buffer(&self, buffer: &GpuBuffer, offset: u64, size: u64) -> Vec<u8> {
        match buffer {
            GpuBuffer::Null { data, .. } => {
                let shadow = data.lock();
                let offset = offset as usize;
                let end = (offset + size as usize).min(shadow.len());
                shadow[offset.min(shadow.len())..end].to_vec()
            }
            #[cfg(feature = "vulkan-backend")]
            _ => Vec::new(),
        }
    }

    fn begin_commands(&self) -> Result<GpuCommandList, RhiError> {
        Ok(GpuCommandList::Null {
            recorded: AtomicU64::new(0),
            submits: AtomicU64::new(0),
        })
    }

    fn end_commands(&self, _commands: &GpuCommandList) -> Result<(), RhiError> {
        Ok(())
    }

    fn submit(&self, commands: &GpuCommandList, signal: Option<&GpuFence>) -> Result<(), RhiError> {
        if let GpuCommandList::Null { submits, .. } = commands {
            submits.fetch_add(1, Ordering::AcqRel);
        }
        // The null GPU retires work instantly.
        if let Some(fence) = signal {
            self.signal_fence(fence);
        }
        Ok(())
    }

    fn begin_render_pass(&self, commands: &GpuCommandList, framebuffer: &GpuFramebuffer) {
        log::trace!("Null: begin render pass ({:?})", framebuffer.extent());
        self.record(commands);
    }

    fn end_render_pass(&self, commands: &GpuCommandList) {
        self.record(commands);
    }

    fn bind_vertex_buffer(
        &self,
        commands: &GpuCommandList,
        _buffer: &GpuBuffer,
        _offset: u64,
        _stride: u32,
        _stream: u32,
    ) {
        self.record(commands);
    }

    fn bind_index_buffer(
        &self,
        commands: &GpuCommandList,
        _buffer: &GpuBuffer,
        _format: IndexFormat,
    ) {
        self.record(commands);
    }

    fn bind_uniform_buffer(
        &self,
        commands: &GpuCommandList,
        _buffer: &GpuBuffer,
        slot: u32,
        offset: u64,
        size: u64,
    ) {
        log::trace!(
            "Null: bind uniform slot {} (offset {}, size {})",
            slot,
            offset,
            size
        );
        self.record(commands);
    }

    fn draw(
        &self,
        commands: &GpuCommandList,
        _vertex_count: u32,
        _instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.record(commands);
    }

    fn draw_indexed(
        &self,
        commands: &GpuCommandList,
        _index_count: u32,
        _instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.record(commands);
    }

    fn dispatch(&self, commands: &GpuCommandList, _x: u32, _y: u32, _z: u32) {
        self.record(commands);
    }

    fn clear_color(
        &self,
        commands: &GpuCommandList,
        _texture: &GpuTexture,
        _subresource: &TextureSubresource,
        _value: ClearColorValue,
    ) {
        self.record(commands);
    }

    fn clear_depth_stencil(
        &self,
        commands: &GpuCommandList,
        _texture: &GpuTexture,
        _subresource: &TextureSubresource,
        _depth: f32,
        _stencil: u32,
    ) {
        self.record(commands);
    }

    fn blit(
        &self,
        commands: &GpuCommandList,
        _src: &GpuTexture,
        _src_rect: Rect,
        _dst: &GpuTexture,
        _dst_rect: Rect,
        _filter: FilterMode,
    ) {
        self.record(commands);
    }

    fn copy_buffer_to_buffer(
        &self,
        commands: &GpuCommandList,
        src: &GpuBuffer,
        src_offset: u64,
        dst: &GpuBuffer,
        dst_offset: u64,
        size: u64,
    ) {
        let data = self.read_buffer(src, src_offset, size);
        self.write_buffer(dst, dst_offset, &data);
        self.record(commands);
    }

    fn copy_buffer_to_texture(
        &self,
        commands: &GpuCommandList,
        _src: &GpuBuffer,
        _src_offset: u64,
        _dst: &GpuTexture,
        _extent: Extent3d,
    ) {
        self.record(commands);
    }

    fn texture_barrier(
        &self,
        commands: &GpuCommandList,
        _texture: &GpuTexture,
        from: ResourceAccess,
        to: ResourceAccess,
    ) {
        log::trace!("Null: texture barrier {:?} -> {:?}", from, to);
        self.record(commands);
    }

    fn buffer_barrier(
        &self,
        commands: &GpuCommandList,
        _buffer: &GpuBuffer,
        from: ResourceAccess,
        to: ResourceAccess,
    ) {
        log::trace!("Null: buffer barrier {:?} -> {:?}", from, to);
        self.record(commands);
    }

    fn write_timestamp(&self, commands: &GpuCommandList, _set: &GpuQuerySet, _index: u32) {
        self.record(commands);
    }

    fn begin_statistics(&self, commands: &GpuCommandList, _set: &GpuQuerySet, _index: u32) {
        self.record(commands);
    }

    fn end_statistics(&self, commands: &GpuCommandList, _set: &GpuQuerySet, _index: u32) {
        self.record(commands);
    }

    fn reset_query(&self, set: &GpuQuerySet, index: u32) {
        if let GpuQuerySet::Null { available, results } = set {
            let mut available = available.lock();
            if let Some(slot) = available.get_mut(index as usize) {
                *slot = false;
                results.lock()[index as usize] = 0;
            }
        }
    }

    fn query_available(&self, set: &GpuQuerySet, index: u32) -> bool {
        match set {
            GpuQuerySet::Null { available, .. } => {
                available.lock().get(index as usize).copied().unwrap_or(false)
            }
            #[cfg(feature = "vulkan-backend")]
            _ => false,
        }
    }

    fn query_result(&self, set: &GpuQuerySet, index: u32) -> Option<u64> {
        match set {
            GpuQuerySet::Null { available, results } => {
                if available.lock().get(index as usize).copied().unwrap_or(false) {
                    results.lock().get(index as usize).copied()
                } else {
                    None
                }
            }
            #[cfg(feature = "vulkan-backend")]
            _ => None,
        }
    }

    fn complete_query(&self, set: &GpuQuerySet, index: u32, result: u64) {
        if let GpuQuerySet::Null { available, results } = set {
            let mut available = available.lock();
            if let Some(slot) = available.get_mut(index as usize) {
                results.lock()[index as usize] = result;
                *slot = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_shadow_round_trip() {
        let backend = NullBackend::new();
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(
                64,
                crate::types::BufferUsage::UNIFORM,
            ))
            .unwrap();
        backend.write_buffer(&buffer, 8, &[1, 2, 3, 4]);
        assert_eq!(backend.read_buffer(&buffer, 8, 4), vec![1, 2, 3, 4]);
        assert_eq!(backend.read_buffer(&buffer, 0, 2), vec![0, 0]);
    }

    #[test]
    fn test_zero_sized_buffer_rejected() {
        let backend = NullBackend::new();
        let err = backend
            .create_buffer(&BufferDescriptor::new(0, crate::types::BufferUsage::VERTEX))
            .unwrap_err();
        assert!(matches!(err, RhiError::InvalidParameter(_)));
    }

    #[test]
    fn test_submit_signals_fence() {
        let backend = NullBackend::new();
        let fence = backend.create_fence(false);
        assert!(!backend.is_fence_signaled(&fence));
        let commands = backend.begin_commands().unwrap();
        backend.end_commands(&commands).unwrap();
        backend.submit(&commands, Some(&fence)).unwrap();
        assert!(backend.is_fence_signaled(&fence));
        assert_eq!(commands.submit_count(), 1);
    }

    #[test]
    fn test_query_completion_hook() {
        let backend = NullBackend::new();
        let set = backend.create_query_set(QueryKind::Timestamp, 4).unwrap();
        assert!(!backend.query_available(&set, 2));
        assert_eq!(backend.query_result(&set, 2), None);
        backend.complete_query(&set, 2, 1234);
        assert!(backend.query_available(&set, 2));
        assert_eq!(backend.query_result(&set, 2), Some(1234));
        backend.reset_query(&set, 2);
        assert!(!backend.query_available(&set, 2));
    }

    #[test]
    fn test_copy_buffer_to_buffer_moves_bytes() {
        let backend = NullBackend::new();
        let usage = crate::types::BufferUsage::COPY_SRC | crate::types::BufferUsage::COPY_DST;
        let src = backend.create_buffer(&BufferDescriptor::new(16, usage)).unwrap();
        let dst = backend.create_buffer(&BufferDescriptor::new(16, usage)).unwrap();
        backend.write_buffer(&src, 0, &[9; 8]);
        let commands = backend.begin_commands().unwrap();
        backend.copy_buffer_to_buffer(&commands, &src, 0, &dst, 4, 8);
        assert_eq!(backend.read_buffer(&dst, 4, 8), vec![9; 8]);
    }
}
