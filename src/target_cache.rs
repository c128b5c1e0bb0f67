//! Render-target cache.
//!
//! Binding a set of attachment views requires a backend aggregate (the
//! framebuffer-equivalent). Aggregates are cached keyed by the attachment
//! views' identities, so rebinding the same targets is a hash lookup rather
//! than an object creation. View identities are never reused, which keeps a
//! stale entry from ever matching a recreated view.
//!
//! Teardown is mutual: every cache entry registers itself with its attachment
//! views, and a view being destroyed evicts every entry that references it.
//! Lock order is always cache map before any view's dependent set.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backend::{GpuBackend, GpuFramebuffer};
use crate::deferred::{DeferredDestructor, DeferredHandle};
use crate::error::RhiError;
use crate::resource::ObjectId;
use crate::types::{Extent3d, TextureFormat};
use crate::views::{DepthStencilView, RenderTargetView, MAX_COLOR_ATTACHMENTS};

/// Cache key: the identities of the bound attachment views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FramebufferKey {
    pub colors: [Option<ObjectId>; MAX_COLOR_ATTACHMENTS],
    pub depth: Option<ObjectId>,
}

/// A cached framebuffer aggregate.
///
/// Attachment back-pointers are weak: the entry must never keep a destroyed
/// view alive, it only needs to notify survivors when it is evicted.
pub struct FramebufferEntry {
    key: FramebufferKey,
    extent: Extent3d,
    framebuffer: Mutex<Option<GpuFramebuffer>>,
    colors: [Option<Weak<RenderTargetView>>; MAX_COLOR_ATTACHMENTS],
    depth: Option<Weak<DepthStencilView>>,
}

impl FramebufferEntry {
    pub fn key(&self) -> &FramebufferKey {
        &self.key
    }

    /// Render extent shared by all attachments.
    pub fn extent(&self) -> Extent3d {
        self.extent
    }

    /// Run `f` against the backend aggregate, if it has not been evicted.
    pub(crate) fn with_framebuffer<R>(&self, f: impl FnOnce(&GpuFramebuffer) -> R) -> Option<R> {
        self.framebuffer.lock().as_ref().map(f)
    }
}

impl std::fmt::Debug for FramebufferEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramebufferEntry")
            .field("key", &self.key)
            .field("extent", &self.extent)
            .finish_non_exhaustive()
    }
}

/// Cache of framebuffer aggregates keyed by attachment identities.
#[derive(Debug, Default)]
pub struct RenderTargetCache {
    entries: Mutex<HashMap<FramebufferKey, Arc<FramebufferEntry>>>,
}

impl RenderTargetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or build the aggregate for the given attachment combination.
    ///
    /// At least one attachment must be present; color and depth attachments
    /// must share one extent (the base mip extent of each view).
    pub fn find_or_create(
        &self,
        backend: &Arc<dyn GpuBackend>,
        colors: &[Option<&Arc<RenderTargetView>>],
        depth: Option<&Arc<DepthStencilView>>,
    ) -> Result<Arc<FramebufferEntry>, RhiError> {
        assert!(colors.len() <= MAX_COLOR_ATTACHMENTS);

        let mut key = FramebufferKey::default();
        for (slot, view) in colors.iter().enumerate() {
            key.colors[slot] = view.map(|v| crate::resource::GpuResource::id(&**v));
        }
        key.depth = depth.map(|v| crate::resource::GpuResource::id(&**v));

        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(&key) {
            return Ok(entry.clone());
        }

        // Resolve the render extent from the first live attachment.
        let mut extent: Option<Extent3d> = None;
        for view in colors.iter().flatten() {
            let view_extent = view.extent();
            match extent {
                None => extent = Some(view_extent),
                Some(e) if e != view_extent => {
                    return Err(RhiError::InvalidParameter(format!(
                        "attachment extents differ: {:?} vs {:?}",
                        e, view_extent
                    )))
                }
                Some(_) => {}
            }
        }
        if let Some(depth) = depth {
            let view_extent = depth.extent();
            match extent {
                None => extent = Some(view_extent),
                Some(e) if e != view_extent => {
                    return Err(RhiError::InvalidParameter(format!(
                        "depth extent {:?} does not match color extent {:?}",
                        view_extent, e
                    )))
                }
                Some(_) => {}
            }
        }
        let extent = extent.ok_or(RhiError::MissingRenderTargetExtent)?;

        // Collect live backend view handles.
        let mut color_handles: Vec<(Arc<crate::backend::GpuTextureView>, TextureFormat)> =
            Vec::new();
        for view in colors.iter().flatten() {
            let handle = view.gpu().ok_or_else(|| {
                RhiError::ResourceCreationFailed("render-target view already destroyed".to_string())
            })?;
            color_handles.push((handle, view.format()));
        }
        let depth_handle = match depth {
            Some(view) => {
                let handle = view.gpu().ok_or_else(|| {
                    RhiError::ResourceCreationFailed(
                        "depth-stencil view already destroyed".to_string(),
                    )
                })?;
                Some((handle, view.format()))
            }
            None => None,
        };

        let color_refs: Vec<(&crate::backend::GpuTextureView, TextureFormat)> = color_handles
            .iter()
            .map(|(handle, format)| (&**handle, *format))
            .collect();
        let depth_ref = depth_handle
            .as_ref()
            .map(|(handle, format)| (&**handle, *format));
        let framebuffer = backend.create_framebuffer(&color_refs, depth_ref, extent)?;

        let mut entry_colors: [Option<Weak<RenderTargetView>>; MAX_COLOR_ATTACHMENTS] =
            Default::default();
        for (slot, view) in colors.iter().enumerate() {
            if let Some(view) = view {
                view.register_dependent(key);
                entry_colors[slot] = Some(Arc::downgrade(view));
            }
        }
        let entry_depth = depth.map(|view| {
            view.register_dependent(key);
            Arc::downgrade(view)
        });

        log::trace!("Render-target cache miss, building aggregate {:?}", key);
        let entry = Arc::new(FramebufferEntry {
            key,
            extent,
            framebuffer: Mutex::new(Some(framebuffer)),
            colors: entry_colors,
            depth: entry_depth,
        });
        entries.insert(key, entry.clone());
        Ok(entry)
    }

    /// Evict one entry, routing its aggregate through the deferred queue.
    ///
    /// `skip` names the view driving the eviction (already tearing itself
    /// down); it must not be called back.
    pub(crate) fn evict(
        &self,
        key: &FramebufferKey,
        deferred: &DeferredDestructor,
        skip: Option<ObjectId>,
    ) {
        let entry = self.entries.lock().remove(key);
        let Some(entry) = entry else {
            return;
        };
        if let Some(framebuffer) = entry.framebuffer.lock().take() {
            deferred.queue(DeferredHandle::Framebuffer(framebuffer));
        }
        for weak in entry.colors.iter().flatten() {
            if let Some(view) = weak.upgrade() {
                if skip != Some(crate::resource::GpuResource::id(&*view)) {
                    view.forget_dependent(key);
                }
            }
        }
        if let Some(view) = entry.depth.as_ref().and_then(Weak::upgrade) {
            if skip != Some(crate::resource::GpuResource::id(&*view)) {
                view.forget_dependent(key);
            }
        }
    }

    /// Number of cached aggregates.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Evict everything. Only valid after a full device wait.
    pub fn clear(&self, deferred: &DeferredDestructor) {
        let keys: Vec<FramebufferKey> = self.entries.lock().keys().copied().collect();
        for key in &keys {
            self.evict(key, deferred, None);
        }
    }
}
