//! GPU sampler wrapper.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::GpuSampler;
use crate::deferred::DeferredHandle;
use crate::device::Device;
use crate::error::RhiError;
use crate::resource::{GpuResource, ObjectId, RefCount};
use crate::types::SamplerDescriptor;

/// A GPU sampler.
pub struct Sampler {
    device: Arc<Device>,
    descriptor: SamplerDescriptor,
    id: ObjectId,
    refs: RefCount,
    handle: Mutex<Option<Arc<GpuSampler>>>,
}

impl Sampler {
    pub(crate) fn new(
        device: Arc<Device>,
        descriptor: SamplerDescriptor,
    ) -> Result<Arc<Self>, RhiError> {
        let handle = device.backend().create_sampler(&descriptor)?;
        Ok(Arc::new(Self {
            device,
            descriptor,
            id: ObjectId::next(),
            refs: RefCount::new(),
            handle: Mutex::new(Some(Arc::new(handle))),
        }))
    }

    pub fn descriptor(&self) -> &SamplerDescriptor {
        &self.descriptor
    }

    /// Backend handle, or `None` after destruction.
    pub fn gpu(&self) -> Option<Arc<GpuSampler>> {
        self.handle.lock().clone()
    }
}

impl GpuResource for Sampler {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn ref_count(&self) -> &RefCount {
        &self.refs
    }

    fn destroy(&self) {
        if let Some(handle) = self.handle.lock().take() {
            self.device.deferred().queue(DeferredHandle::Sampler(handle));
        }
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("id", &self.id)
            .field("filter", &self.descriptor.filter)
            .finish()
    }
}
