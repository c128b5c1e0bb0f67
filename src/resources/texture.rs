//! GPU texture wrapper.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::GpuTexture;
use crate::deferred::DeferredHandle;
use crate::device::Device;
use crate::error::RhiError;
use crate::resource::{GpuResource, ObjectId, RefCount};
use crate::types::{Extent3d, TextureDescriptor, TextureFormat, TextureUsage};

/// A GPU texture.
pub struct Texture {
    device: Arc<Device>,
    descriptor: TextureDescriptor,
    id: ObjectId,
    refs: RefCount,
    handle: Mutex<Option<Arc<GpuTexture>>>,
}

impl Texture {
    pub(crate) fn new(
        device: Arc<Device>,
        descriptor: TextureDescriptor,
    ) -> Result<Arc<Self>, RhiError> {
        let handle = device.backend().create_texture(&descriptor)?;
        log::trace!(
            "Created texture {:?} ({:?}, {:?})",
            descriptor.label,
            descriptor.format,
            descriptor.size
        );
        Ok(Arc::new(Self {
            device,
            descriptor,
            id: ObjectId::next(),
            refs: RefCount::new(),
            handle: Mutex::new(Some(Arc::new(handle))),
        }))
    }

    /// Full-resolution extent.
    pub fn extent(&self) -> Extent3d {
        self.descriptor.size
    }

    /// Extent of the given mip level, clamped to 1 per axis.
    pub fn mip_extent(&self, level: u32) -> Extent3d {
        self.descriptor.size.mip_level(level)
    }

    /// Pixel format.
    pub fn format(&self) -> TextureFormat {
        self.descriptor.format
    }

    /// Usage flags the texture was created with.
    pub fn usage(&self) -> TextureUsage {
        self.descriptor.usage
    }

    /// Number of mip levels.
    pub fn mip_levels(&self) -> u32 {
        self.descriptor.mip_levels
    }

    /// Number of array layers.
    pub fn array_layers(&self) -> u32 {
        self.descriptor.array_layers
    }

    /// Debug label, if any.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Backend handle, or `None` after destruction.
    pub fn gpu(&self) -> Option<Arc<GpuTexture>> {
        self.handle.lock().clone()
    }
}

impl GpuResource for Texture {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn ref_count(&self) -> &RefCount {
        &self.refs
    }

    fn destroy(&self) {
        if let Some(handle) = self.handle.lock().take() {
            log::trace!("Destroying texture {:?}", self.descriptor.label);
            self.device.deferred().queue(DeferredHandle::Texture(handle));
        }
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("id", &self.id)
            .field("format", &self.descriptor.format)
            .field("extent", &self.descriptor.size)
            .field("references", &self.refs.get())
            .finish()
    }
}
