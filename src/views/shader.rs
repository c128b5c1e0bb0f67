//! Shader-resource and unordered-access views.
//!
//! Both flavors view either a texture sub-range or a buffer sub-range. A
//! buffer-backed view carries no backend object of its own; binding one
//! hands the context the `(buffer, offset, size)` triple directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::GpuTextureView;
use crate::deferred::DeferredHandle;
use crate::device::Device;
use crate::error::RhiError;
use crate::resource::{GpuResource, ObjectId, RefCount};
use crate::resources::{Buffer, Texture};
use crate::types::{TextureFormat, TextureSubresource, TextureUsage};

/// What a shader-visible view is backed by.
enum Backing {
    Texture {
        texture: Arc<Texture>,
        subresource: TextureSubresource,
        handle: Mutex<Option<Arc<GpuTextureView>>>,
    },
    Buffer {
        buffer: Arc<Buffer>,
        offset: u64,
        size: u64,
    },
}

struct ShaderViewInner {
    device: Arc<Device>,
    id: ObjectId,
    refs: RefCount,
    destroyed: AtomicBool,
    backing: Backing,
}

impl ShaderViewInner {
    fn for_texture(
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
        texture.add_reference();
        Ok(Self {
            device,
            id: ObjectId::next(),
            refs: RefCount::new(),
            destroyed: AtomicBool::new(false),
            backing: Backing::Texture {
                texture,
                subresource,
                handle: Mutex::new(Some(Arc::new(handle))),
            },
        })
    }

    fn for_buffer(
        device: Arc<Device>,
        buffer: Arc<Buffer>,
        offset: u64,
        size: u64,
    ) -> Result<Self, RhiError> {
        if size == 0 || offset + size > buffer.size() {
            return Err(RhiError::InvalidParameter(format!(
                "view range {}..{} exceeds buffer of {} bytes",
                offset,
                offset + size,
                buffer.size()
            )));
        }
        buffer.add_reference();
        Ok(Self {
            device,
            id: ObjectId::next(),
            refs: RefCount::new(),
            destroyed: AtomicBool::new(false),
            backing: Backing::Buffer {
                buffer,
                offset,
                size,
            },
        })
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        match &self.backing {
            Backing::Texture {
                texture, handle, ..
            } => {
                if let Some(handle) = handle.lock().take() {
                    self.device
                        .deferred()
                        .queue(DeferredHandle::TextureView(handle));
                }
                texture.release();
            }
            Backing::Buffer { buffer, .. } => {
                buffer.release();
            }
        }
    }
}

/// Read-only shader view over a texture or buffer sub-range.
pub struct ShaderResourceView {
    inner: ShaderViewInner,
}

impl ShaderResourceView {
    pub(crate) fn for_texture(
        device: Arc<Device>,
        texture: Arc<Texture>,
        subresource: TextureSubresource,
    ) -> Result<Arc<Self>, RhiError> {
        if !texture.usage().contains(TextureUsage::TEXTURE_BINDING) {
            return Err(RhiError::InvalidParameter(
                "texture was not created with TEXTURE_BINDING usage".to_string(),
            ));
        }
        Ok(Arc::new(Self {
            inner: ShaderViewInner::for_texture(device, texture, subresource)?,
        }))
    }

    pub(crate) fn for_buffer(
        device: Arc<Device>,
        buffer: Arc<Buffer>,
        offset: u64,
        size: u64,
    ) -> Result<Arc<Self>, RhiError> {
        Ok(Arc::new(Self {
            inner: ShaderViewInner::for_buffer(device, buffer, offset, size)?,
        }))
    }

    /// The viewed texture, if texture-backed.
    pub fn texture(&self) -> Option<&Arc<Texture>> {
        match &self.inner.backing {
            Backing::Texture { texture, .. } => Some(texture),
            Backing::Buffer { .. } => None,
        }
    }

    /// The viewed buffer range, if buffer-backed.
    pub fn buffer_range(&self) -> Option<(&Arc<Buffer>, u64, u64)> {
        match &self.inner.backing {
            Backing::Buffer {
                buffer,
                offset,
                size,
            } => Some((buffer, *offset, *size)),
            Backing::Texture { .. } => None,
        }
    }

    /// View format, if texture-backed.
    pub fn format(&self) -> Option<TextureFormat> {
        self.texture().map(|t| t.format())
    }

    /// Backend view handle, if texture-backed and alive.
    pub fn gpu(&self) -> Option<Arc<GpuTextureView>> {
        match &self.inner.backing {
            Backing::Texture { handle, .. } => handle.lock().clone(),
            Backing::Buffer { .. } => None,
        }
    }

    /// Bind this view to `slot` on the context.
    pub fn bind(self: &Arc<Self>, context: &mut crate::context::CommandContext, slot: u32) {
        context.bind_shader_resource(slot, Some(self));
    }
}

impl GpuResource for ShaderResourceView {
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

impl Drop for ShaderResourceView {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for ShaderResourceView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("ShaderResourceView");
        s.field("id", &self.inner.id);
        match &self.inner.backing {
            Backing::Texture { subresource, .. } => s.field("mip", &subresource.base_mip),
            Backing::Buffer { offset, size, .. } => s.field("range", &(offset, size)),
        };
        s.finish()
    }
}

/// Read-write shader view over a storage texture or storage buffer sub-range.
pub struct UnorderedAccessView {
    inner: ShaderViewInner,
}

impl UnorderedAccessView {
    pub(crate) fn for_texture(
        device: Arc<Device>,
        texture: Arc<Texture>,
        subresource: TextureSubresource,
    ) -> Result<Arc<Self>, RhiError> {
        if !texture.usage().contains(TextureUsage::STORAGE_BINDING) {
            return Err(RhiError::InvalidParameter(
                "texture was not created with STORAGE_BINDING usage".to_string(),
            ));
        }
        Ok(Arc::new(Self {
            inner: ShaderViewInner::for_texture(device, texture, subresource)?,
        }))
    }

    pub(crate) fn for_buffer(
        device: Arc<Device>,
        buffer: Arc<Buffer>,
        offset: u64,
        size: u64,
    ) -> Result<Arc<Self>, RhiError> {
        if !buffer.usage().contains(crate::types::BufferUsage::STORAGE) {
            return Err(RhiError::InvalidParameter(
                "buffer was not created with STORAGE usage".to_string(),
            ));
        }
        Ok(Arc::new(Self {
            inner: ShaderViewInner::for_buffer(device, buffer, offset, size)?,
        }))
    }

    /// The viewed texture, if texture-backed.
    pub fn texture(&self) -> Option<&Arc<Texture>> {
        match &self.inner.backing {
            Backing::Texture { texture, .. } => Some(texture),
            Backing::Buffer { .. } => None,
        }
    }

    /// The viewed buffer range, if buffer-backed.
    pub fn buffer_range(&self) -> Option<(&Arc<Buffer>, u64, u64)> {
        match &self.inner.backing {
            Backing::Buffer {
                buffer,
                offset,
                size,
            } => Some((buffer, *offset, *size)),
            Backing::Texture { .. } => None,
        }
    }

    /// Backend view handle, if texture-backed and alive.
    pub fn gpu(&self) -> Option<Arc<GpuTextureView>> {
        match &self.inner.backing {
            Backing::Texture { handle, .. } => handle.lock().clone(),
            Backing::Buffer { .. } => None,
        }
    }

    /// Bind this view to `slot` on the context.
    pub fn bind(self: &Arc<Self>, context: &mut crate::context::CommandContext, slot: u32) {
        context.bind_unordered_access(slot, Some(self));
    }
}

impl GpuResource for UnorderedAccessView {
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

impl Drop for UnorderedAccessView {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for UnorderedAccessView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("UnorderedAccessView");
        s.field("id", &self.inner.id);
        match &self.inner.backing {
            Backing::Texture { subresource, .. } => s.field("mip", &subresource.base_mip),
            Backing::Buffer { offset, size, .. } => s.field("range", &(offset, size)),
        };
        s.finish()
    }
}
