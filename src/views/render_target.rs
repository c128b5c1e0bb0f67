//! Render-target and depth-stencil views.
//!
//! Attachment views track which render-target cache entries reference them,
//! so destroying a view evicts every aggregate built on it before the
//! backend view handle is surrendered.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::GpuTextureView;
use crate::deferred::DeferredHandle;
use crate::device::Device;
use crate::error::RhiError;
use crate::resource::{GpuResource, ObjectId, RefCount};
use crate::resources::Texture;
use crate::target_cache::FramebufferKey;
use crate::types::{Extent3d, TextureFormat, TextureSubresource, TextureUsage};

/// Shared machinery of the two attachment view flavors.
struct AttachmentInner {
    device: Arc<Device>,
    texture: Arc<Texture>,
    subresource: TextureSubresource,
    id: ObjectId,
    refs: RefCount,
    handle: Mutex<Option<Arc<GpuTextureView>>>,
    dependents: Mutex<HashSet<FramebufferKey>>,
}

impl AttachmentInner {
    fn create(
        device: Arc<Device>,
        texture: Arc<Texture>,
        subresource: TextureSubresource,
    ) -> Result<Self, RhiError> {
        let gpu_texture = texture.gpu().ok_or_else(|| {
            RhiError::ResourceCreationFailed("texture already destroyed".to_string())
        })?;
        let handle =
            device
                .backend()
                .create_texture_view(&gpu_texture, texture.format(), &subresource)?;
        // The view pins its backing texture.
        texture.add_reference();
        Ok(Self {
            device,
            texture,
            subresource,
            id: ObjectId::next(),
            refs: RefCount::new(),
            handle: Mutex::new(Some(Arc::new(handle))),
            dependents: Mutex::new(HashSet::new()),
        })
    }

    fn extent(&self) -> Extent3d {
        self.texture.mip_extent(self.subresource.base_mip)
    }

    fn destroy(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        // The dependent set must be drained with its lock released before
        // touching the cache; lock order is cache before view.
        let dependents: Vec<FramebufferKey> = self.dependents.lock().drain().collect();
        for key in &dependents {
            self.device
                .render_targets()
                .evict(key, self.device.deferred(), Some(self.id));
        }
        self.device
            .deferred()
            .queue(DeferredHandle::TextureView(handle));
        self.texture.release();
    }
}

/// A view over a color texture sub-range, bindable as a render target.
pub struct RenderTargetView {
    inner: AttachmentInner,
}

impl RenderTargetView {
    pub(crate) fn new(
        device: Arc<Device>,
        texture: Arc<Texture>,
        subresource: TextureSubresource,
    ) -> Result<Arc<Self>, RhiError> {
        if texture.format().is_depth_stencil() {
            return Err(RhiError::InvalidParameter(
                "render-target view requires a color format".to_string(),
            ));
        }
        if !texture.usage().contains(TextureUsage::RENDER_ATTACHMENT) {
            return Err(RhiError::InvalidParameter(
                "texture was not created with RENDER_ATTACHMENT usage".to_string(),
            ));
        }
        Ok(Arc::new(Self {
            inner: AttachmentInner::create(device, texture, subresource)?,
        }))
    }

    /// The backing texture.
    pub fn texture(&self) -> &Arc<Texture> {
        &self.inner.texture
    }

    /// View format (the texture's format).
    pub fn format(&self) -> TextureFormat {
        self.inner.texture.format()
    }

    /// Viewed sub-range.
    pub fn subresource(&self) -> &TextureSubresource {
        &self.inner.subresource
    }

    /// Extent of the viewed mip level.
    pub fn extent(&self) -> Extent3d {
        self.inner.extent()
    }

    /// Backend view handle, or `None` after destruction.
    pub fn gpu(&self) -> Option<Arc<GpuTextureView>> {
        self.inner.handle.lock().clone()
    }

    pub(crate) fn register_dependent(&self, key: FramebufferKey) {
        self.inner.dependents.lock().insert(key);
    }

    pub(crate) fn forget_dependent(&self, key: &FramebufferKey) {
        self.inner.dependents.lock().remove(key);
    }

    /// Number of cache entries currently built on this view.
    pub fn dependent_count(&self) -> usize {
        self.inner.dependents.lock().len()
    }
}

impl RenderTargetView {
    /// Clear the viewed sub-range.
    pub fn clear(
        self: &Arc<Self>,
        context: &mut crate::context::CommandContext,
        value: crate::types::ClearColorValue,
    ) {
        context.clear_render_target(self, value);
    }

    /// Scaled copy from this view into `dst`.
    pub fn blit_to(
        self: &Arc<Self>,
        context: &mut crate::context::CommandContext,
        src_rect: crate::types::Rect,
        dst: &Arc<Self>,
        dst_rect: crate::types::Rect,
        filter: crate::types::FilterMode,
    ) {
        context.blit(self, src_rect, dst, dst_rect, filter);
    }
}

impl GpuResource for RenderTargetView {
    fn id(&self) -> ObjectId {
        self.inner.id
    }

    fn ref_count(&self) -> &RefCount {
        &self.inner.refs
    }

    fn destroy(&self) {
        self.inner.destroy();
    }
}

impl Drop for RenderTargetView {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for RenderTargetView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTargetView")
            .field("id", &self.inner.id)
            .field("format", &self.format())
            .field("mip", &self.inner.subresource.base_mip)
            .finish()
    }
}

/// A view over a depth/stencil texture sub-range.
pub struct DepthStencilView {
    inner: AttachmentInner,
}

impl DepthStencilView {
    pub(crate) fn new(
        device: Arc<Device>,
        texture: Arc<Texture>,
        subresource: TextureSubresource,
    ) -> Result<Arc<Self>, RhiError> {
        if !texture.format().is_depth_stencil() {
            return Err(RhiError::InvalidParameter(
                "depth-stencil view requires a depth format".to_string(),
            ));
        }
        if !texture.usage().contains(TextureUsage::RENDER_ATTACHMENT) {
            return Err(RhiError::InvalidParameter(
                "texture was not created with RENDER_ATTACHMENT usage".to_string(),
            ));
        }
        Ok(Arc::new(Self {
            inner: AttachmentInner::create(device, texture, subresource)?,
        }))
    }

    /// The backing texture.
    pub fn texture(&self) -> &Arc<Texture> {
        &self.inner.texture
    }

    /// View format (the texture's format).
    pub fn format(&self) -> TextureFormat {
        self.inner.texture.format()
    }

    /// Viewed sub-range.
    pub fn subresource(&self) -> &TextureSubresource {
        &self.inner.subresource
    }

    /// Extent of the viewed mip level.
    pub fn extent(&self) -> Extent3d {
        self.inner.extent()
    }

    /// Backend view handle, or `None` after destruction.
    pub fn gpu(&self) -> Option<Arc<GpuTextureView>> {
        self.inner.handle.lock().clone()
    }

    pub(crate) fn register_dependent(&self, key: FramebufferKey) {
        self.inner.dependents.lock().insert(key);
    }

    pub(crate) fn forget_dependent(&self, key: &FramebufferKey) {
        self.inner.dependents.lock().remove(key);
    }

    /// Number of cache entries currently built on this view.
    pub fn dependent_count(&self) -> usize {
        self.inner.dependents.lock().len()
    }

    /// Clear the viewed sub-range.
    pub fn clear(
        self: &Arc<Self>,
        context: &mut crate::context::CommandContext,
        depth: f32,
        stencil: u32,
    ) {
        context.clear_depth_stencil(self, depth, stencil);
    }
}

impl GpuResource for DepthStencilView {
    fn id(&self) -> ObjectId {
        self.inner.id
    }

    fn ref_count(&self) -> &RefCount {
        &self.inner.refs
    }

    fn destroy(&self) {
        self.inner.destroy();
    }
}

impl Drop for DepthStencilView {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for DepthStencilView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepthStencilView")
            .field("id", &self.inner.id)
            .field("format", &self.format())
            .field("mip", &self.inner.subresource.base_mip)
            .finish()
    }
}
