//! GPU backend abstraction layer.
//!
//! Each backend implements the [`GpuBackend`] trait: resource creation,
//! command recording, synchronization primitives, and query polling. The
//! active backend is selected once at startup from a configuration string
//! (see [`BackendKind::parse`]); there is no runtime switching.
//!
//! # Available backends
//!
//! - `null` (default): no-op backend for testing and headless development
//! - `vulkan-backend`: native Vulkan backend using ash
//!
//! D3D12, D3D11 and OpenGL are recognized selection strings but are not
//! compiled into this build; requesting them reports `FeatureNotSupported`.

pub mod null;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

#[cfg(feature = "vulkan-backend")]
use ash::vk;
#[cfg(feature = "vulkan-backend")]
use gpu_allocator::vulkan::{Allocation, Allocator};

use crate::error::RhiError;
use crate::types::{
    BufferDescriptor, ClearColorValue, Extent3d, FilterMode, IndexFormat, QueryKind, Rect,
    ResourceAccess, SamplerDescriptor, TextureDescriptor, TextureFormat, TextureSubresource,
};

/// Which concrete backend implements the abstract contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Native Vulkan via ash.
    Vulkan,
    /// Direct3D 12 (not compiled into this build).
    D3D12,
    /// Direct3D 11 (not compiled into this build).
    D3D11,
    /// OpenGL (not compiled into this build).
    OpenGl,
    /// No-op backend for tests and headless runs.
    None,
}

impl BackendKind {
    /// Parse a configuration string into a backend kind.
    ///
    /// Accepts the canonical names `"Vulkan"`, `"D3D12"`, `"D3D11"`,
    /// `"OpenGL"` and `"None"`, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "vulkan" => Some(Self::Vulkan),
            "d3d12" => Some(Self::D3D12),
            "d3d11" => Some(Self::D3D11),
            "opengl" => Some(Self::OpenGl),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    /// Canonical name, used for the shader-cache directory layout.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Vulkan => "Vulkan",
            Self::D3D12 => "D3D12",
            Self::D3D11 => "D3D11",
            Self::OpenGl => "OpenGL",
            Self::None => "None",
        }
    }
}

/// Device limits surfaced by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendLimits {
    /// Minimum alignment for uniform-buffer binding offsets.
    pub min_uniform_offset_alignment: u64,
    /// Maximum buffer size.
    pub max_buffer_size: u64,
    /// Maximum 2D texture dimension.
    pub max_texture_dimension: u32,
}

impl Default for BackendLimits {
    fn default() -> Self {
        Self {
            min_uniform_offset_alignment: 256,
            max_buffer_size: 1 << 30,
            max_texture_dimension: 16384,
        }
    }
}

/// Handle to a GPU buffer resource.
pub enum GpuBuffer {
    /// Null backend: a CPU shadow so writes can be observed in tests.
    Null { size: u64, data: Mutex<Vec<u8>> },
    /// Vulkan backend buffer.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        buffer: vk::Buffer,
        allocation: Mutex<Option<Allocation>>,
        allocator: std::sync::Weak<Mutex<Allocator>>,
        size: u64,
    },
}

impl GpuBuffer {
    /// Size of the buffer in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Self::Null { size, .. } => *size,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { size, .. } => *size,
        }
    }
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null { size, .. } => f.debug_struct("GpuBuffer::Null").field("size", size).finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer, size, .. } => f
                .debug_struct("GpuBuffer::Vulkan")
                .field("buffer", buffer)
                .field("size", size)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let GpuBuffer::Vulkan {
            device,
            buffer,
            allocation,
            allocator,
            ..
        } = self
        {
            if let (Some(alloc), Some(allocator)) = (allocation.lock().take(), allocator.upgrade())
            {
                if let Err(e) = allocator.lock().free(alloc) {
                    log::error!("Failed to free buffer allocation: {}", e);
                }
            }
            unsafe {
                device.destroy_buffer(*buffer, None);
            }
        }
    }
}

/// Handle to a GPU texture resource.
pub enum GpuTexture {
    /// Null backend (no GPU allocation).
    Null,
    /// Vulkan backend texture.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        image: vk::Image,
        allocation: Mutex<Option<Allocation>>,
        allocator: std::sync::Weak<Mutex<Allocator>>,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        extent: vk::Extent3D,
    },
}

impl std::fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "GpuTexture::Null"),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan {
                image,
                format,
                extent,
                ..
            } => f
                .debug_struct("GpuTexture::Vulkan")
                .field("image", image)
                .field("format", format)
                .field("extent", extent)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuTexture {
    fn drop(&mut self) {
        if let GpuTexture::Vulkan {
            device,
            image,
            allocation,
            allocator,
            ..
        } = self
        {
            if let (Some(alloc), Some(allocator)) = (allocation.lock().take(), allocator.upgrade())
            {
                if let Err(e) = allocator.lock().free(alloc) {
                    log::error!("Failed to free texture allocation: {}", e);
                }
            }
            unsafe {
                device.destroy_image(*image, None);
            }
        }
    }
}

/// Handle to a typed view over a texture sub-range.
pub enum GpuTextureView {
    /// Null backend (no GPU object).
    Null,
    /// Vulkan backend image view.
    #[cfg(feature = "vulkan-backend")]
    Vulkan { device: ash::Device, view: vk::ImageView },
}

impl std::fmt::Debug for GpuTextureView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "GpuTextureView::Null"),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { view, .. } => f
                .debug_struct("GpuTextureView::Vulkan")
                .field("view", view)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuTextureView {
    fn drop(&mut self) {
        if let GpuTextureView::Vulkan { device, view } = self {
            unsafe {
                device.destroy_image_view(*view, None);
            }
        }
    }
}

/// Handle to a GPU sampler resource.
pub enum GpuSampler {
    /// Null backend (no GPU object).
    Null,
    /// Vulkan backend sampler.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        sampler: vk::Sampler,
    },
}

impl std::fmt::Debug for GpuSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "GpuSampler::Null"),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { sampler, .. } => f
                .debug_struct("GpuSampler::Vulkan")
                .field("sampler", sampler)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuSampler {
    fn drop(&mut self) {
        if let GpuSampler::Vulkan { device, sampler } = self {
            unsafe {
                device.destroy_sampler(*sampler, None);
            }
        }
    }
}

/// Handle to a GPU fence for CPU-GPU synchronization.
pub enum GpuFence {
    /// Null backend fence signaled from the CPU.
    Null { signaled: AtomicBool },
    /// Vulkan backend fence.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        fence: vk::Fence,
    },
}

impl std::fmt::Debug for GpuFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null { signaled } => f
                .debug_struct("GpuFence::Null")
                .field("signaled", signaled)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { fence, .. } => f
                .debug_struct("GpuFence::Vulkan")
                .field("fence", fence)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuFence {
    fn drop(&mut self) {
        if let GpuFence::Vulkan { device, fence } = self {
            unsafe {
                device.destroy_fence(*fence, None);
            }
        }
    }
}

/// Handle to a fixed-capacity GPU query set.
pub enum GpuQuerySet {
    /// Null backend: completion driven by the `complete_query` test hook.
    Null {
        available: Mutex<Vec<bool>>,
        results: Mutex<Vec<u64>>,
    },
    /// Vulkan backend query pool.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        pool: vk::QueryPool,
        capacity: u32,
    },
}

impl std::fmt::Debug for GpuQuerySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null { available, .. } => f
                .debug_struct("GpuQuerySet::Null")
                .field("capacity", &available.lock().len())
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { pool, capacity, .. } => f
                .debug_struct("GpuQuerySet::Vulkan")
                .field("pool", pool)
                .field("capacity", capacity)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuQuerySet {
    fn drop(&mut self) {
        if let GpuQuerySet::Vulkan { device, pool, .. } = self {
            unsafe {
                device.destroy_query_pool(*pool, None);
            }
        }
    }
}

/// Backend aggregate binding a set of attachments (framebuffer-equivalent).
///
/// The Vulkan backend targets dynamic rendering, so the aggregate is the
/// prepared attachment list rather than a `VkFramebuffer` object. The raw
/// image views referenced here stay alive through the render-target cache's
/// mutual-teardown protocol: an entry never outlives its attachments.
pub enum GpuFramebuffer {
    /// Null backend aggregate.
    Null { extent: Extent3d },
    /// Vulkan backend aggregate for `vkCmdBeginRendering`.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        color_views: Vec<vk::ImageView>,
        color_formats: Vec<vk::Format>,
        depth_view: Option<(vk::ImageView, vk::Format)>,
        extent: vk::Extent2D,
    },
}

impl GpuFramebuffer {
    /// Render extent of the aggregate.
    pub fn extent(&self) -> Extent3d {
        match self {
            Self::Null { extent } => *extent,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { extent, .. } => Extent3d::new_2d(extent.width, extent.height),
        }
    }
}

impl std::fmt::Debug for GpuFramebuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null { extent } => f
                .debug_struct("GpuFramebuffer::Null")
                .field("extent", extent)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan {
                color_views,
                extent,
                ..
            } => f
                .debug_struct("GpuFramebuffer::Vulkan")
                .field("color_count", &color_views.len())
                .field("extent", extent)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a recorded command stream.
pub enum GpuCommandList {
    /// Null backend: counts recorded calls and submissions.
    Null {
        recorded: AtomicU64,
        submits: AtomicU64,
    },
    /// Vulkan backend command buffer.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        pool: vk::CommandPool,
        buffer: vk::CommandBuffer,
    },
}

impl GpuCommandList {
    /// Null backend: number of commands recorded. Zero on hardware backends.
    pub fn recorded_commands(&self) -> u64 {
        match self {
            Self::Null { recorded, .. } => recorded.load(Ordering::Acquire),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { .. } => 0,
        }
    }

    /// Null backend: number of times this list was submitted/replayed.
    pub fn submit_count(&self) -> u64 {
        match self {
            Self::Null { submits, .. } => submits.load(Ordering::Acquire),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { .. } => 0,
        }
    }
}

impl std::fmt::Debug for GpuCommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null { recorded, .. } => f
                .debug_struct("GpuCommandList::Null")
                .field("recorded", recorded)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer, .. } => f
                .debug_struct("GpuCommandList::Vulkan")
                .field("buffer", buffer)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuCommandList {
    fn drop(&mut self) {
        if let GpuCommandList::Vulkan {
            device,
            pool,
            buffer,
        } = self
        {
            unsafe {
                device.free_command_buffers(*pool, &[*buffer]);
            }
        }
    }
}

/// GPU backend trait for abstracting different GPU APIs.
///
/// All methods that record into a [`GpuCommandList`] are only valid between
/// `begin_commands` and `end_commands`; the [`CommandContext`] state machine
/// enforces that ordering.
///
/// [`CommandContext`]: crate::context::CommandContext
pub trait GpuBackend: Send + Sync + 'static {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Human-readable backend name.
    fn name(&self) -> &'static str;

    /// Device limits.
    fn limits(&self) -> BackendLimits;

    /// Create a buffer resource.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, RhiError>;

    /// Create a texture resource.
    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, RhiError>;

    /// Create a typed view over a texture sub-range.
    fn create_texture_view(
        &self,
        texture: &GpuTexture,
        format: TextureFormat,
        subresource: &TextureSubresource,
    ) -> Result<GpuTextureView, RhiError>;

    /// Create a sampler resource.
    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<GpuSampler, RhiError>;

    /// Create a fence for CPU-GPU synchronization.
    fn create_fence(&self, signaled: bool) -> GpuFence;

    /// Create a fixed-capacity query set.
    fn create_query_set(&self, kind: QueryKind, capacity: u32) -> Result<GpuQuerySet, RhiError>;

    /// Create a framebuffer-equivalent aggregate over the given attachments.
    fn create_framebuffer(
        &self,
        colors: &[(&GpuTextureView, TextureFormat)],
        depth: Option<(&GpuTextureView, TextureFormat)>,
        extent: Extent3d,
    ) -> Result<GpuFramebuffer, RhiError>;

    /// Block until the fence signals or the diagnostic timeout elapses.
    fn wait_fence(&self, fence: &GpuFence) -> Result<(), RhiError>;

    /// Check if a fence is signaled (non-blocking).
    fn is_fence_signaled(&self, fence: &GpuFence) -> bool;

    /// Reset a fence to the unsignaled state.
    fn reset_fence(&self, fence: &GpuFence);

    /// Signal a fence from the CPU. Test hook; hardware backends signal
    /// fences from the GPU and treat this as a no-op.
    fn signal_fence(&self, fence: &GpuFence);

    /// Write data to a buffer at the given offset.
    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]);

    /// Read data back from a buffer.
    fn read_buffer(&self, buffer: &GpuBuffer, offset: u64, size: u64) -> Vec<u8>;

    /// Begin recording a fresh command list.
    fn begin_commands(&self) -> Result<GpuCommandList, RhiError>;

    /// Finish recording.
    fn end_commands(&self, commands: &GpuCommandList) -> Result<(), RhiError>;

    /// Submit a finished command list, optionally signaling a fence.
    /// Submitting the same list again replays it.
    fn submit(&self, commands: &GpuCommandList, signal: Option<&GpuFence>) -> Result<(), RhiError>;

    /// Begin rendering into a framebuffer aggregate.
    fn begin_render_pass(&self, commands: &GpuCommandList, framebuffer: &GpuFramebuffer);

    /// End the active render pass.
    fn end_render_pass(&self, commands: &GpuCommandList);

    /// Bind a vertex buffer to a stream slot.
    fn bind_vertex_buffer(
        &self,
        commands: &GpuCommandList,
        buffer: &GpuBuffer,
        offset: u64,
        stride: u32,
        stream: u32,
    );

    /// Bind an index buffer.
    fn bind_index_buffer(&self, commands: &GpuCommandList, buffer: &GpuBuffer, format: IndexFormat);

    /// Bind a uniform-buffer sub-range to a slot.
    fn bind_uniform_buffer(
        &self,
        commands: &GpuCommandList,
        buffer: &GpuBuffer,
        slot: u32,
        offset: u64,
        size: u64,
    );

    /// Record a non-indexed draw.
    fn draw(
        &self,
        commands: &GpuCommandList,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );

    /// Record an indexed draw.
    fn draw_indexed(
        &self,
        commands: &GpuCommandList,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    /// Record a compute dispatch.
    fn dispatch(&self, commands: &GpuCommandList, x: u32, y: u32, z: u32);

    /// Clear a color texture sub-range. The texture must be in `CopyDst`.
    fn clear_color(
        &self,
        commands: &GpuCommandList,
        texture: &GpuTexture,
        subresource: &TextureSubresource,
        value: ClearColorValue,
    );

    /// Clear a depth/stencil texture sub-range. The texture must be in `CopyDst`.
    fn clear_depth_stencil(
        &self,
        commands: &GpuCommandList,
        texture: &GpuTexture,
        subresource: &TextureSubresource,
        depth: f32,
        stencil: u32,
    );

    /// Record a scaled copy between textures. Source/destination must be in
    /// `CopySrc`/`CopyDst` respectively.
    #[allow(clippy::too_many_arguments)]
    fn blit(
        &self,
        commands: &GpuCommandList,
        src: &GpuTexture,
        src_rect: Rect,
        dst: &GpuTexture,
        dst_rect: Rect,
        filter: FilterMode,
    );

    /// Record a buffer-to-buffer copy.
    #[allow(clippy::too_many_arguments)]
    fn copy_buffer_to_buffer(
        &self,
        commands: &GpuCommandList,
        src: &GpuBuffer,
        src_offset: u64,
        dst: &GpuBuffer,
        dst_offset: u64,
        size: u64,
    );

    /// Record a buffer-to-texture copy covering `extent`.
    fn copy_buffer_to_texture(
        &self,
        commands: &GpuCommandList,
        src: &GpuBuffer,
        src_offset: u64,
        dst: &GpuTexture,
        extent: Extent3d,
    );

    /// Record a texture state transition.
    fn texture_barrier(
        &self,
        commands: &GpuCommandList,
        texture: &GpuTexture,
        from: ResourceAccess,
        to: ResourceAccess,
    );

    /// Record a buffer state transition.
    fn buffer_barrier(
        &self,
        commands: &GpuCommandList,
        buffer: &GpuBuffer,
        from: ResourceAccess,
        to: ResourceAccess,
    );

    /// Record a timestamp write into a query slot.
    fn write_timestamp(&self, commands: &GpuCommandList, set: &GpuQuerySet, index: u32);

    /// Begin collecting pipeline statistics into a query slot.
    fn begin_statistics(&self, commands: &GpuCommandList, set: &GpuQuerySet, index: u32);

    /// End collecting pipeline statistics for a query slot.
    fn end_statistics(&self, commands: &GpuCommandList, set: &GpuQuerySet, index: u32);

    /// Reset a query slot for reuse.
    fn reset_query(&self, set: &GpuQuerySet, index: u32);

    /// Poll whether a query's result is available (non-blocking).
    fn query_available(&self, set: &GpuQuerySet, index: u32) -> bool;

    /// Read a query result if available (non-blocking).
    fn query_result(&self, set: &GpuQuerySet, index: u32) -> Option<u64>;

    /// Mark a query completed from the CPU. Test hook; no-op on hardware
    /// backends.
    fn complete_query(&self, set: &GpuQuerySet, index: u32, result: u64);
}

/// Create the backend selected by `kind`.
pub fn create_backend(kind: BackendKind) -> Result<Arc<dyn GpuBackend>, RhiError> {
    match kind {
        BackendKind::None => {
            log::info!("Using null backend");
            Ok(Arc::new(null::NullBackend::new()))
        }
        BackendKind::Vulkan => {
            #[cfg(feature = "vulkan-backend")]
            {
                let backend = vulkan::VulkanBackend::new()?;
                log::info!("Using Vulkan backend (ash)");
                Ok(Arc::new(backend))
            }
            #[cfg(not(feature = "vulkan-backend"))]
            {
                Err(RhiError::FeatureNotSupported(
                    "built without the vulkan-backend feature".to_string(),
                ))
            }
        }
        BackendKind::D3D12 | BackendKind::D3D11 | BackendKind::OpenGl => Err(
            RhiError::FeatureNotSupported(format!("{} backend is not compiled in", kind.name())),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!(BackendKind::parse("Vulkan"), Some(BackendKind::Vulkan));
        assert_eq!(BackendKind::parse("d3d12"), Some(BackendKind::D3D12));
        assert_eq!(BackendKind::parse("OpenGL"), Some(BackendKind::OpenGl));
        assert_eq!(BackendKind::parse("None"), Some(BackendKind::None));
        assert_eq!(BackendKind::parse("metal"), None);
    }

    #[test]
    fn test_uncompiled_backends_are_rejected() {
        assert!(matches!(
            create_backend(BackendKind::D3D11),
            Err(RhiError::FeatureNotSupported(_))
        ));
        assert!(matches!(
            create_backend(BackendKind::D3D12),
            Err(RhiError::FeatureNotSupported(_))
        ));
    }

    #[test]
    fn test_null_backend_creation() {
        let backend = create_backend(BackendKind::None).unwrap();
        assert_eq!(backend.kind(), BackendKind::None);
    }
}
