//! GPU buffer wrapper.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::GpuBuffer;
use crate::deferred::DeferredHandle;
use crate::device::Device;
use crate::error::RhiError;
use crate::resource::{GpuResource, ObjectId, RefCount};
use crate::types::{BufferDescriptor, BufferUsage};

/// A GPU buffer.
///
/// The backend handle is surrendered to the deferred-destroy queue when the
/// reference count reaches zero; in-flight command lists keep their own
/// `Arc` to the handle until then.
pub struct Buffer {
    device: Arc<Device>,
    descriptor: BufferDescriptor,
    id: ObjectId,
    refs: RefCount,
    handle: Mutex<Option<Arc<GpuBuffer>>>,
}

impl Buffer {
    pub(crate) fn new(
        device: Arc<Device>,
        descriptor: BufferDescriptor,
    ) -> Result<Arc<Self>, RhiError> {
        let handle = device.backend().create_buffer(&descriptor)?;
        log::trace!(
            "Created buffer {:?} ({} bytes, {:?})",
            descriptor.label,
            descriptor.size,
            descriptor.usage
        );
        Ok(Arc::new(Self {
            device,
            descriptor,
            id: ObjectId::next(),
            refs: RefCount::new(),
            handle: Mutex::new(Some(Arc::new(handle))),
        }))
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    /// Usage flags the buffer was created with.
    pub fn usage(&self) -> BufferUsage {
        self.descriptor.usage
    }

    /// Debug label, if any.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Backend handle, or `None` after destruction.
    pub fn gpu(&self) -> Option<Arc<GpuBuffer>> {
        self.handle.lock().clone()
    }

    /// Upload data at `offset`.
    pub fn write(&self, offset: u64, data: &[u8]) {
        if let Some(handle) = self.gpu() {
            self.device.backend().write_buffer(&handle, offset, data);
        }
    }

    /// Read data back. Returns an empty vec after destruction.
    pub fn read(&self, offset: u64, size: u64) -> Vec<u8> {
        match self.gpu() {
            Some(handle) => self.device.backend().read_buffer(&handle, offset, size),
            None => Vec::new(),
        }
    }
}

impl GpuResource for Buffer {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn ref_count(&self) -> &RefCount {
        &self.refs
    }

    fn destroy(&self) {
        if let Some(handle) = self.handle.lock().take() {
            log::trace!("Destroying buffer {:?}", self.descriptor.label);
            self.device.deferred().queue(DeferredHandle::Buffer(handle));
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // Last-resort cleanup for holders that never called release().
        self.destroy();
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("size", &self.descriptor.size)
            .field("usage", &self.descriptor.usage)
            .field("references", &self.refs.get())
            .finish()
    }
}
