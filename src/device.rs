//! Logical GPU device.
//!
//! The [`Device`] owns the selected backend and every device-wide service:
//! the deferred destructor, the render-target cache, the constant heap and
//! the query allocators. Resources and views are created through its
//! factory methods and carry an `Arc` back to it.

use std::sync::Arc;

use parking_lot::Mutex;
use static_assertions::assert_impl_all;

use crate::backend::{create_backend, BackendKind, BackendLimits, GpuBackend, GpuQuerySet};
use crate::deferred::DeferredDestructor;
use crate::error::RhiError;
use crate::query::{QueryAllocator, QueryHandle, TimerQuery};
use crate::resources::{Buffer, Sampler, Texture};
use crate::target_cache::RenderTargetCache;
use crate::types::{
    BufferDescriptor, QueryKind, SamplerDescriptor, TextureDescriptor, TextureSubresource,
};
use crate::uniforms::ConstantHeap;
use crate::views::{DepthStencilView, RenderTargetView, ShaderResourceView, UnorderedAccessView};

/// Logical GPU device over the selected backend.
pub struct Device {
    backend: Arc<dyn GpuBackend>,
    kind: BackendKind,
    limits: BackendLimits,
    deferred: Arc<DeferredDestructor>,
    render_targets: RenderTargetCache,
    constants: Mutex<ConstantHeap>,
    timestamp_queries: Mutex<QueryAllocator>,
    statistics_queries: Mutex<QueryAllocator>,
}

assert_impl_all!(Device: Send, Sync);

impl Device {
    /// Create a device over the backend selected by `kind`.
    pub fn new(kind: BackendKind) -> Result<Arc<Self>, RhiError> {
        let backend = create_backend(kind)?;
        Ok(Self::from_backend(backend))
    }

    /// Create a device over an already-constructed backend.
    pub fn from_backend(backend: Arc<dyn GpuBackend>) -> Arc<Self> {
        let kind = backend.kind();
        let limits = backend.limits();
        log::info!("Created device on {} backend", backend.name());
        Arc::new(Self {
            constants: Mutex::new(ConstantHeap::new(backend.clone())),
            backend,
            kind,
            limits,
            deferred: Arc::new(DeferredDestructor::new()),
            render_targets: RenderTargetCache::new(),
            timestamp_queries: Mutex::new(QueryAllocator::new(QueryKind::Timestamp)),
            statistics_queries: Mutex::new(QueryAllocator::new(QueryKind::PipelineStatistics)),
        })
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn limits(&self) -> BackendLimits {
        self.limits
    }

    pub fn deferred(&self) -> &Arc<DeferredDestructor> {
        &self.deferred
    }

    pub fn render_targets(&self) -> &RenderTargetCache {
        &self.render_targets
    }

    pub(crate) fn constants(&self) -> &Mutex<ConstantHeap> {
        &self.constants
    }

    /// Create a GPU buffer.
    pub fn create_buffer(
        self: &Arc<Self>,
        descriptor: BufferDescriptor,
    ) -> Result<Arc<Buffer>, RhiError> {
        Buffer::new(self.clone(), descriptor)
    }

    /// Create a GPU texture.
    pub fn create_texture(
        self: &Arc<Self>,
        descriptor: TextureDescriptor,
    ) -> Result<Arc<Texture>, RhiError> {
        Texture::new(self.clone(), descriptor)
    }

    /// Create a GPU sampler.
    pub fn create_sampler(
        self: &Arc<Self>,
        descriptor: SamplerDescriptor,
    ) -> Result<Arc<Sampler>, RhiError> {
        Sampler::new(self.clone(), descriptor)
    }

    /// Create a render-target view over a color texture sub-range.
    pub fn create_render_target_view(
        self: &Arc<Self>,
        texture: &Arc<Texture>,
        subresource: TextureSubresource,
    ) -> Result<Arc<RenderTargetView>, RhiError> {
        RenderTargetView::new(self.clone(), texture.clone(), subresource)
    }

    /// Create a depth-stencil view over a depth texture sub-range.
    pub fn create_depth_stencil_view(
        self: &Arc<Self>,
        texture: &Arc<Texture>,
        subresource: TextureSubresource,
    ) -> Result<Arc<DepthStencilView>, RhiError> {
        DepthStencilView::new(self.clone(), texture.clone(), subresource)
    }

    /// Create a read-only shader view over a texture sub-range.
    pub fn create_shader_resource_view(
        self: &Arc<Self>,
        texture: &Arc<Texture>,
        subresource: TextureSubresource,
    ) -> Result<Arc<ShaderResourceView>, RhiError> {
        ShaderResourceView::for_texture(self.clone(), texture.clone(), subresource)
    }

    /// Create a read-only shader view over a buffer range.
    pub fn create_buffer_shader_resource_view(
        self: &Arc<Self>,
        buffer: &Arc<Buffer>,
        offset: u64,
        size: u64,
    ) -> Result<Arc<ShaderResourceView>, RhiError> {
        ShaderResourceView::for_buffer(self.clone(), buffer.clone(), offset, size)
    }

    /// Create a read-write shader view over a storage texture sub-range.
    pub fn create_unordered_access_view(
        self: &Arc<Self>,
        texture: &Arc<Texture>,
        subresource: TextureSubresource,
    ) -> Result<Arc<UnorderedAccessView>, RhiError> {
        UnorderedAccessView::for_texture(self.clone(), texture.clone(), subresource)
    }

    /// Create a read-write shader view over a storage buffer range.
    pub fn create_buffer_unordered_access_view(
        self: &Arc<Self>,
        buffer: &Arc<Buffer>,
        offset: u64,
        size: u64,
    ) -> Result<Arc<UnorderedAccessView>, RhiError> {
        UnorderedAccessView::for_buffer(self.clone(), buffer.clone(), offset, size)
    }

    /// Claim a timestamp query slot.
    pub fn create_timestamp(&self) -> Result<QueryHandle, RhiError> {
        self.timestamp_queries.lock().allocate(&self.backend)
    }

    /// Return a timestamp slot.
    pub fn release_timestamp(&self, handle: QueryHandle) {
        self.timestamp_queries.lock().release(handle);
    }

    /// Claim a begin/end timestamp pair.
    pub fn create_timer(&self) -> Result<TimerQuery, RhiError> {
        let mut queries = self.timestamp_queries.lock();
        Ok(TimerQuery {
            begin: queries.allocate(&self.backend)?,
            end: queries.allocate(&self.backend)?,
        })
    }

    /// Return both slots of a timer.
    pub fn release_timer(&self, timer: TimerQuery) {
        let mut queries = self.timestamp_queries.lock();
        queries.release(timer.begin);
        queries.release(timer.end);
    }

    /// Non-blocking timestamp readiness poll.
    pub fn timestamp_available(&self, handle: QueryHandle) -> bool {
        self.timestamp_queries.lock().is_available(&self.backend, handle)
    }

    /// Non-blocking timestamp read.
    pub fn timestamp_value(&self, handle: QueryHandle) -> Option<u64> {
        self.timestamp_queries.lock().result(&self.backend, handle)
    }

    /// Elapsed ticks of a timer, once both timestamps have landed.
    pub fn timer_elapsed(&self, timer: &TimerQuery) -> Option<u64> {
        timer.elapsed(&self.timestamp_queries.lock(), &self.backend)
    }

    /// Claim a pipeline-statistics query slot.
    pub fn create_statistics(&self) -> Result<QueryHandle, RhiError> {
        self.statistics_queries.lock().allocate(&self.backend)
    }

    /// Return a pipeline-statistics slot.
    pub fn release_statistics(&self, handle: QueryHandle) {
        self.statistics_queries.lock().release(handle);
    }

    /// Non-blocking pipeline-statistics read.
    pub fn statistics_value(&self, handle: QueryHandle) -> Option<u64> {
        self.statistics_queries.lock().result(&self.backend, handle)
    }

    /// Mark a timestamp query completed from the CPU. Null backend only.
    pub fn complete_timestamp(&self, handle: QueryHandle, value: u64) {
        let queries = self.timestamp_queries.lock();
        self.backend.complete_query(queries.set(handle), handle.index(), value);
    }

    /// Mark a pipeline-statistics query completed from the CPU. Null backend
    /// only.
    pub fn complete_statistics(&self, handle: QueryHandle, value: u64) {
        let queries = self.statistics_queries.lock();
        self.backend.complete_query(queries.set(handle), handle.index(), value);
    }

    pub(crate) fn with_timestamp_set<R>(
        &self,
        handle: QueryHandle,
        f: impl FnOnce(&GpuQuerySet) -> R,
    ) -> R {
        let queries = self.timestamp_queries.lock();
        f(queries.set(handle))
    }

    pub(crate) fn with_statistics_set<R>(
        &self,
        handle: QueryHandle,
        f: impl FnOnce(&GpuQuerySet) -> R,
    ) -> R {
        let queries = self.statistics_queries.lock();
        f(queries.set(handle))
    }

    /// Drop every deferred handle and cached aggregate immediately.
    ///
    /// Only valid once the GPU is idle; intended for teardown.
    pub fn purge(&self) {
        self.render_targets.clear(&self.deferred);
        self.deferred.flush_all();
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("backend", &self.backend.name())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BufferUsage, TextureFormat, TextureUsage};

    #[test]
    fn test_device_over_null_backend() {
        let device = Device::new(BackendKind::None).unwrap();
        assert_eq!(device.kind(), BackendKind::None);
        assert_eq!(device.limits().min_uniform_offset_alignment, 256);
    }

    #[test]
    fn test_resource_factories() {
        let device = Device::new(BackendKind::None).unwrap();
        let buffer = device
            .create_buffer(BufferDescriptor::new(128, BufferUsage::UNIFORM))
            .unwrap();
        assert_eq!(buffer.size(), 128);

        let texture = device
            .create_texture(TextureDescriptor::new_2d(
                64,
                64,
                TextureFormat::Rgba8Unorm,
                TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            ))
            .unwrap();
        assert_eq!(texture.format(), TextureFormat::Rgba8Unorm);

        let view = device
            .create_render_target_view(&texture, TextureSubresource::default())
            .unwrap();
        assert_eq!(view.extent().width, 64);
    }

    #[test]
    fn test_timer_lifecycle() {
        let device = Device::new(BackendKind::None).unwrap();
        let timer = device.create_timer().unwrap();
        assert_eq!(device.timer_elapsed(&timer), None);

        device.with_timestamp_set(timer.begin, |set| {
            device.backend().complete_query(set, timer.begin.index, 10)
        });
        device.with_timestamp_set(timer.end, |set| {
            device.backend().complete_query(set, timer.end.index, 60)
        });
        assert_eq!(device.timer_elapsed(&timer), Some(50));
        device.release_timer(timer);
    }
}
