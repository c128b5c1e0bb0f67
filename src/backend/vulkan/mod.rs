//! Vulkan backend built on ash and gpu-allocator.
//!
//! Targets Vulkan 1.3: render passes use dynamic rendering, query slots are
//! recycled with host query reset. The backend is headless; present/swapchain
//! plumbing lives above this crate.
//!
//! Uniform, texture and sampler descriptor binds are recorded into a binding
//! table rather than descriptor sets; a pipeline layer above this crate
//! converts the table when pipelines are bound.

mod barriers;
mod conversion;
mod instance;

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocationScheme, Allocator};
use parking_lot::Mutex;

use crate::error::RhiError;
use crate::types::{
    BufferDescriptor, BufferUsage, ClearColorValue, Extent3d, FilterMode, IndexFormat, QueryKind,
    Rect, ResourceAccess, SamplerDescriptor, TextureDescriptor, TextureFormat, TextureSubresource,
};

use super::{
    BackendKind, BackendLimits, GpuBackend, GpuBuffer, GpuCommandList, GpuFence, GpuFramebuffer,
    GpuQuerySet, GpuSampler, GpuTexture, GpuTextureView,
};

use conversion::{
    aspect_mask, convert_address_mode, convert_buffer_usage, convert_filter, convert_index_format,
    convert_mipmap_mode, convert_subresource_range, convert_texture_format, convert_texture_usage,
};

/// Diagnostic bound on fence waits; a hung GPU surfaces as `FenceTimeout`
/// instead of freezing the frame loop forever.
const FENCE_TIMEOUT_NS: u64 = 10_000_000_000;

/// Native Vulkan backend.
pub struct VulkanBackend {
    _entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue: Mutex<vk::Queue>,
    queue_family: u32,
    allocator: Option<Arc<Mutex<Allocator>>>,
    command_pool: Mutex<vk::CommandPool>,
    limits: BackendLimits,
    binding_state: Mutex<HashMap<u32, (vk::Buffer, u64, u64)>>,
}

impl VulkanBackend {
    pub fn new() -> Result<Self, RhiError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            RhiError::InitializationFailed(format!("Failed to load Vulkan loader: {}", e))
        })?;
        let vk_instance = instance::create_instance(&entry)?;
        let physical_device = instance::select_physical_device(&vk_instance)?;
        let queue_family = instance::find_graphics_queue_family(&vk_instance, physical_device)?;
        let device =
            instance::create_logical_device(&vk_instance, physical_device, queue_family)?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let allocator = Allocator::new(&gpu_allocator::vulkan::AllocatorCreateDesc {
            instance: vk_instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .map_err(|e| {
            RhiError::InitializationFailed(format!("Failed to create memory allocator: {}", e))
        })?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }.map_err(
            |e| RhiError::InitializationFailed(format!("Failed to create command pool: {:?}", e)),
        )?;

        let properties = unsafe { vk_instance.get_physical_device_properties(physical_device) };
        let limits = BackendLimits {
            min_uniform_offset_alignment: (properties.limits.min_uniform_buffer_offset_alignment)
                .max(256),
            max_buffer_size: properties.limits.max_storage_buffer_range as u64,
            max_texture_dimension: properties.limits.max_image_dimension2_d,
        };

        Ok(Self {
            _entry: entry,
            instance: vk_instance,
            physical_device,
            device,
            queue: Mutex::new(queue),
            queue_family,
            allocator: Some(Arc::new(Mutex::new(allocator))),
            command_pool: Mutex::new(command_pool),
            limits,
            binding_state: Mutex::new(HashMap::new()),
        })
    }

    fn allocator(&self) -> &Arc<Mutex<Allocator>> {
        self.allocator
            .as_ref()
            .expect("allocator lives until backend drop")
    }

    fn vulkan_commands(commands: &GpuCommandList) -> Option<vk::CommandBuffer> {
        match commands {
            GpuCommandList::Vulkan { buffer, .. } => Some(*buffer),
            _ => {
                log::error!("Command list belongs to another backend");
                None
            }
        }
    }

    fn vulkan_buffer(buffer: &GpuBuffer) -> Option<vk::Buffer> {
        match buffer {
            GpuBuffer::Vulkan { buffer, .. } => Some(*buffer),
            _ => {
                log::error!("Buffer belongs to another backend");
                None
            }
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            // The allocator must release its memory before the device goes.
            drop(self.allocator.take());
            self.device
                .destroy_command_pool(*self.command_pool.lock(), None);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

impl GpuBackend for VulkanBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Vulkan
    }

    fn name(&self) -> &'static str {
        "Vulkan"
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

        let location = if descriptor.usage.contains(BufferUsage::MAP_READ) {
            gpu_allocator::MemoryLocation::GpuToCpu
        } else if descriptor.usage.contains(BufferUsage::MAP_WRITE)
            || descriptor.usage.contains(BufferUsage::COPY_DST)
        {
            gpu_allocator::MemoryLocation::CpuToGpu
        } else {
            gpu_allocator::MemoryLocation::GpuOnly
        };

        let buffer_info = vk::BufferCreateInfo::default()
            .size(descriptor.size)
            .usage(convert_buffer_usage(descriptor.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }.map_err(|e| {
            RhiError::ResourceCreationFailed(format!("Failed to create buffer: {:?}", e))
        })?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let allocation = self
            .allocator()
            .lock()
            .allocate(&AllocationCreateDesc {
                name: descriptor.label.as_deref().unwrap_or("buffer"),
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                RhiError::ResourceCreationFailed(format!("Failed to allocate buffer memory: {}", e))
            })?;

        unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        }
        .map_err(|e| {
            RhiError::ResourceCreationFailed(format!("Failed to bind buffer memory: {:?}", e))
        })?;

        Ok(GpuBuffer::Vulkan {
            device: self.device.clone(),
            buffer,
            allocation: Mutex::new(Some(allocation)),
            allocator: Arc::downgrade(self.allocator()),
            size: descriptor.size,
        })
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, RhiError> {
        let format = convert_texture_format(descriptor.format);
        let extent = vk::Extent3D {
            width: descriptor.size.width,
            height: descriptor.size.height,
            depth: descriptor.size.depth.max(1),
        };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(extent)
            .mip_levels(descriptor.mip_levels)
            .array_layers(descriptor.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_texture_usage(descriptor.usage, descriptor.format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device.create_image(&image_info, None) }.map_err(|e| {
            RhiError::ResourceCreationFailed(format!("Failed to create image: {:?}", e))
        })?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let allocation = self
            .allocator()
            .lock()
            .allocate(&AllocationCreateDesc {
                name: descriptor.label.as_deref().unwrap_or("texture"),
                requirements,
                location: gpu_allocator::MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                RhiError::ResourceCreationFailed(format!(
                    "Failed to allocate texture memory: {}",
                    e
                ))
            })?;

        unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .map_err(|e| {
            RhiError::ResourceCreationFailed(format!("Failed to bind image memory: {:?}", e))
        })?;

        Ok(GpuTexture::Vulkan {
            device: self.device.clone(),
            image,
            allocation: Mutex::new(Some(allocation)),
            allocator: Arc::downgrade(self.allocator()),
            format,
            aspect: aspect_mask(descriptor.format),
            extent,
        })
    }

    fn create_texture_view(
        &self,
        texture: &GpuTexture,
        format: TextureFormat,
        subresource: &TextureSubresource,
    ) -> Result<GpuTextureView, RhiError> {
        let GpuTexture::Vulkan { image, .. } = texture else {
            return Err(RhiError::InvalidParameter(
                "texture belongs to another backend".to_string(),
            ));
        };

        let view_type = if subresource.layer_count > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(*image)
            .view_type(view_type)
            .format(convert_texture_format(format))
            .subresource_range(convert_subresource_range(subresource, aspect_mask(format)));

        let view = unsafe { self.device.create_image_view(&view_info, None) }.map_err(|e| {
            RhiError::ResourceCreationFailed(format!("Failed to create image view: {:?}", e))
        })?;
        Ok(GpuTextureView::Vulkan {
            device: self.device.clone(),
            view,
        })
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<GpuSampler, RhiError> {
        let address_mode = convert_address_mode(descriptor.address_mode);
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(convert_filter(descriptor.filter))
            .min_filter(convert_filter(descriptor.filter))
            .mipmap_mode(convert_mipmap_mode(descriptor.filter))
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .anisotropy_enable(descriptor.max_anisotropy > 1.0)
            .max_anisotropy(descriptor.max_anisotropy)
            .max_lod(vk::LOD_CLAMP_NONE);
        let sampler = unsafe { self.device.create_sampler(&sampler_info, None) }.map_err(|e| {
            RhiError::ResourceCreationFailed(format!("Failed to create sampler: {:?}", e))
        })?;
        Ok(GpuSampler::Vulkan {
            device: self.device.clone(),
            sampler,
        })
    }

    fn create_fence(&self, signaled: bool) -> GpuFence {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { self.device.create_fence(&fence_info, None) }
            .expect("fence creation failed; device is unusable");
        GpuFence::Vulkan {
            device: self.device.clone(),
            fence,
        }
    }

    fn create_query_set(&self, kind: QueryKind, capacity: u32) -> Result<GpuQuerySet, RhiError> {
        let mut pool_info = vk::QueryPoolCreateInfo::default().query_count(capacity);
        pool_info = match kind {
            QueryKind::Timestamp => pool_info.query_type(vk::QueryType::TIMESTAMP),
            QueryKind::PipelineStatistics => pool_info
                .query_type(vk::QueryType::PIPELINE_STATISTICS)
                .pipeline_statistics(
                    vk::QueryPipelineStatisticFlags::FRAGMENT_SHADER_INVOCATIONS,
                ),
        };
        let pool = unsafe { self.device.create_query_pool(&pool_info, None) }.map_err(|e| {
            RhiError::ResourceCreationFailed(format!("Failed to create query pool: {:?}", e))
        })?;
        // Pools start in an undefined state; host-reset everything once.
        unsafe { self.device.reset_query_pool(pool, 0, capacity) };
        Ok(GpuQuerySet::Vulkan {
            device: self.device.clone(),
            pool,
            capacity,
        })
    }

    fn create_framebuffer(
        &self,
        colors: &[(&GpuTextureView, TextureFormat)],
        depth: Option<(&GpuTextureView, TextureFormat)>,
        extent: Extent3d,
    ) -> Result<GpuFramebuffer, RhiError> {
        let mut color_views = Vec::with_capacity(colors.len());
        let mut color_formats = Vec::with_capacity(colors.len());
        for (view, format) in colors {
            let GpuTextureView::Vulkan { view, .. } = view else {
                return Err(RhiError::InvalidParameter(
                    "attachment view belongs to another backend".to_string(),
                ));
            };
            color_views.push(*view);
            color_formats.push(convert_texture_format(*format));
        }
        let depth_view = match depth {
            Some((view, format)) => {
                let GpuTextureView::Vulkan { view, .. } = view else {
                    return Err(RhiError::InvalidParameter(
                        "depth view belongs to another backend".to_string(),
                    ));
                };
                Some((*view, convert_texture_format(format)))
            }
            None => None,
        };
        Ok(GpuFramebuffer::Vulkan {
            color_views,
            color_formats,
            depth_view,
            extent: vk::Extent2D {
                width: extent.width,
                height: extent.height,
            },
        })
    }

    fn wait_fence(&self, fence: &GpuFence) -> Result<(), RhiError> {
        let GpuFence::Vulkan { fence, .. } = fence else {
            return Err(RhiError::InvalidParameter(
                "fence belongs to another backend".to_string(),
            ));
        };
        match unsafe {
            self.device
                .wait_for_fences(&[*fence], true, FENCE_TIMEOUT_NS)
        } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => {
                log::warn!("Fence wait timed out after 10 seconds; GPU may be hung");
                Err(RhiError::FenceTimeout)
            }
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(RhiError::DeviceLost),
            Err(e) => Err(RhiError::Internal(format!("Fence wait failed: {:?}", e))),
        }
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> bool {
        match fence {
            GpuFence::Vulkan { fence, .. } => unsafe {
                self.device.get_fence_status(*fence).unwrap_or(false)
            },
            _ => false,
        }
    }

    fn reset_fence(&self, fence: &GpuFence) {
        if let GpuFence::Vulkan { fence, .. } = fence {
            if let Err(e) = unsafe { self.device.reset_fences(&[*fence]) } {
                log::error!("Failed to reset fence: {:?}", e);
            }
        }
    }

    fn signal_fence(&self, _fence: &GpuFence) {
        // Fences are signaled by queue submission on this backend.
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) {
        let GpuBuffer::Vulkan { allocation, .. } = buffer else {
            log::error!("write_buffer called with a foreign buffer");
            return;
        };
        let guard = allocation.lock();
        let Some(mapped) = guard.as_ref().and_then(|a| a.mapped_ptr()) else {
            log::error!("write_buffer called on a buffer without CPU mapping");
            return;
        };
        unsafe {
            let dst = mapped.as_ptr().add(offset as usize) as *mut u8;
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
    }

    fn read_buffer(&self, buffer: &GpuBuffer, offset: u64, size: u64) -> Vec<u8> {
        if let GpuBuffer::Vulkan { allocation, .. } = buffer {
            if let Some(mapped) = allocation.lock().as_ref().and_then(|a| a.mapped_ptr()) {
                let mut result = vec![0u8; size as usize];
                unsafe {
                    let src = mapped.as_ptr().add(offset as usize) as *const u8;
                    std::ptr::copy_nonoverlapping(src, result.as_mut_ptr(), size as usize);
                }
                return result;
            }
        }
        vec![0u8; size as usize]
    }

    fn begin_commands(&self) -> Result<GpuCommandList, RhiError> {
        let pool = *self.command_pool.lock();
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }.map_err(
            |e| RhiError::Internal(format!("Failed to allocate command buffer: {:?}", e)),
        )?;
        let buffer = buffers[0];

        let begin_info = vk::CommandBufferBeginInfo::default();
        unsafe { self.device.begin_command_buffer(buffer, &begin_info) }.map_err(|e| {
            RhiError::Internal(format!("Failed to begin command buffer: {:?}", e))
        })?;

        Ok(GpuCommandList::Vulkan {
            device: self.device.clone(),
            pool,
            buffer,
        })
    }

    fn end_commands(&self, commands: &GpuCommandList) -> Result<(), RhiError> {
        let Some(cmd) = Self::vulkan_commands(commands) else {
            return Err(RhiError::InvalidParameter(
                "command list belongs to another backend".to_string(),
            ));
        };
        unsafe { self.device.end_command_buffer(cmd) }
            .map_err(|e| RhiError::Internal(format!("Failed to end command buffer: {:?}", e)))
    }

    fn submit(&self, commands: &GpuCommandList, signal: Option<&GpuFence>) -> Result<(), RhiError> {
        let Some(cmd) = Self::vulkan_commands(commands) else {
            return Err(RhiError::InvalidParameter(
                "command list belongs to another backend".to_string(),
            ));
        };
        let fence = match signal {
            Some(GpuFence::Vulkan { fence, .. }) => *fence,
            _ => vk::Fence::null(),
        };
        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        let queue = self.queue.lock();
        unsafe { self.device.queue_submit(*queue, &[submit_info], fence) }
            .map_err(|e| match e {
                vk::Result::ERROR_DEVICE_LOST => RhiError::DeviceLost,
                e => RhiError::Internal(format!("Queue submit failed: {:?}", e)),
            })
    }

    fn begin_render_pass(&self, commands: &GpuCommandList, framebuffer: &GpuFramebuffer) {
        let (Some(cmd), GpuFramebuffer::Vulkan { color_views, depth_view, extent, .. }) =
            (Self::vulkan_commands(commands), framebuffer)
        else {
            return;
        };

        let color_attachments: Vec<vk::RenderingAttachmentInfo> = color_views
            .iter()
            .map(|view| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(*view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .store_op(vk::AttachmentStoreOp::STORE)
            })
            .collect();

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: *extent,
        };
        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_attachments);

        let depth_attachment;
        if let Some((view, _)) = depth_view {
            depth_attachment = vk::RenderingAttachmentInfo::default()
                .image_view(*view)
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::LOAD)
                .store_op(vk::AttachmentStoreOp::STORE);
            rendering_info = rendering_info.depth_attachment(&depth_attachment);
        }

        unsafe {
            self.device.cmd_begin_rendering(cmd, &rendering_info);

            // Negative-height viewport flips Y to the D3D/wgpu convention.
            let viewport = vk::Viewport {
                x: 0.0,
                y: extent.height as f32,
                width: extent.width as f32,
                height: -(extent.height as f32),
                min_depth: 0.0,
                max_depth: 1.0,
            };
            self.device.cmd_set_viewport(cmd, 0, &[viewport]);
            self.device.cmd_set_scissor(cmd, 0, &[render_area]);
        }
    }

    fn end_render_pass(&self, commands: &GpuCommandList) {
        if let Some(cmd) = Self::vulkan_commands(commands) {
            unsafe { self.device.cmd_end_rendering(cmd) };
        }
    }

    fn bind_vertex_buffer(
        &self,
        commands: &GpuCommandList,
        buffer: &GpuBuffer,
        offset: u64,
        _stride: u32,
        stream: u32,
    ) {
        if let (Some(cmd), Some(buffer)) =
            (Self::vulkan_commands(commands), Self::vulkan_buffer(buffer))
        {
            unsafe {
                self.device
                    .cmd_bind_vertex_buffers(cmd, stream, &[buffer], &[offset]);
            }
        }
    }

    fn bind_index_buffer(&self, commands: &GpuCommandList, buffer: &GpuBuffer, format: IndexFormat) {
        if let (Some(cmd), Some(buffer)) =
            (Self::vulkan_commands(commands), Self::vulkan_buffer(buffer))
        {
            unsafe {
                self.device
                    .cmd_bind_index_buffer(cmd, buffer, 0, convert_index_format(format));
            }
        }
    }

    fn bind_uniform_buffer(
        &self,
        _commands: &GpuCommandList,
        buffer: &GpuBuffer,
        slot: u32,
        offset: u64,
        size: u64,
    ) {
        if let Some(buffer) = Self::vulkan_buffer(buffer) {
            log::trace!(
                "Vulkan: binding table slot {} <- uniform (offset {}, size {})",
                slot,
                offset,
                size
            );
            self.binding_state.lock().insert(slot, (buffer, offset, size));
        }
    }

    fn draw(
        &self,
        commands: &GpuCommandList,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        if let Some(cmd) = Self::vulkan_commands(commands) {
            unsafe {
                self.device
                    .cmd_draw(cmd, vertex_count, instance_count, first_vertex, first_instance);
            }
        }
    }

    fn draw_indexed(
        &self,
        commands: &GpuCommandList,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        if let Some(cmd) = Self::vulkan_commands(commands) {
            unsafe {
                self.device.cmd_draw_indexed(
                    cmd,
                    index_count,
                    instance_count,
                    first_index,
                    vertex_offset,
                    first_instance,
                );
            }
        }
    }

    fn dispatch(&self, commands: &GpuCommandList, x: u32, y: u32, z: u32) {
        if let Some(cmd) = Self::vulkan_commands(commands) {
            unsafe { self.device.cmd_dispatch(cmd, x, y, z) };
        }
    }

    fn clear_color(
        &self,
        commands: &GpuCommandList,
        texture: &GpuTexture,
        subresource: &TextureSubresource,
        value: ClearColorValue,
    ) {
        let (Some(cmd), GpuTexture::Vulkan { image, aspect, .. }) =
            (Self::vulkan_commands(commands), texture)
        else {
            return;
        };
        let clear_value = match value {
            ClearColorValue::Float(float32) => vk::ClearColorValue { float32 },
            ClearColorValue::Uint(uint32) => vk::ClearColorValue { uint32 },
            ClearColorValue::Sint(int32) => vk::ClearColorValue { int32 },
        };
        let range = convert_subresource_range(subresource, *aspect);
        unsafe {
            self.device.cmd_clear_color_image(
                cmd,
                *image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear_value,
                &[range],
            );
        }
    }

    fn clear_depth_stencil(
        &self,
        commands: &GpuCommandList,
        texture: &GpuTexture,
        subresource: &TextureSubresource,
        depth: f32,
        stencil: u32,
    ) {
        let (Some(cmd), GpuTexture::Vulkan { image, aspect, .. }) =
            (Self::vulkan_commands(commands), texture)
        else {
            return;
        };
        let clear_value = vk::ClearDepthStencilValue { depth, stencil };
        let range = convert_subresource_range(subresource, *aspect);
        unsafe {
            self.device.cmd_clear_depth_stencil_image(
                cmd,
                *image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear_value,
                &[range],
            );
        }
    }

    fn blit(
        &self,
        commands: &GpuCommandList,
        src: &GpuTexture,
        src_rect: Rect,
        dst: &GpuTexture,
        dst_rect: Rect,
        filter: FilterMode,
    ) {
        let (
            Some(cmd),
            GpuTexture::Vulkan {
                image: src_image,
                aspect: src_aspect,
                ..
            },
            GpuTexture::Vulkan {
                image: dst_image,
                aspect: dst_aspect,
                ..
            },
        ) = (Self::vulkan_commands(commands), src, dst)
        else {
            return;
        };

        let layers = |aspect: vk::ImageAspectFlags| vk::ImageSubresourceLayers {
            aspect_mask: aspect,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let offsets = |rect: Rect| {
            [
                vk::Offset3D {
                    x: rect.x,
                    y: rect.y,
                    z: 0,
                },
                vk::Offset3D {
                    x: rect.x + rect.width as i32,
                    y: rect.y + rect.height as i32,
                    z: 1,
                },
            ]
        };
        let blit = vk::ImageBlit {
            src_subresource: layers(*src_aspect),
            src_offsets: offsets(src_rect),
            dst_subresource: layers(*dst_aspect),
            dst_offsets: offsets(dst_rect),
        };
        unsafe {
            self.device.cmd_blit_image(
                cmd,
                *src_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                *dst_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                convert_filter(filter),
            );
        }
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
        let (Some(cmd), Some(src), Some(dst)) = (
            Self::vulkan_commands(commands),
            Self::vulkan_buffer(src),
            Self::vulkan_buffer(dst),
        ) else {
            return;
        };
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, &[region]) };
    }

    fn copy_buffer_to_texture(
        &self,
        commands: &GpuCommandList,
        src: &GpuBuffer,
        src_offset: u64,
        dst: &GpuTexture,
        extent: Extent3d,
    ) {
        let (Some(cmd), Some(src), GpuTexture::Vulkan { image, aspect, .. }) = (
            Self::vulkan_commands(commands),
            Self::vulkan_buffer(src),
            dst,
        ) else {
            return;
        };
        let region = vk::BufferImageCopy {
            buffer_offset: src_offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: *aspect,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: extent.depth.max(1),
            },
        };
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmd,
                src,
                *image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    fn texture_barrier(
        &self,
        commands: &GpuCommandList,
        texture: &GpuTexture,
        from: ResourceAccess,
        to: ResourceAccess,
    ) {
        let (Some(cmd), GpuTexture::Vulkan { image, aspect, .. }) =
            (Self::vulkan_commands(commands), texture)
        else {
            return;
        };
        let (old_layout, src_access, src_stage) = barriers::texture_access_info(from);
        let (new_layout, dst_access, dst_stage) = barriers::texture_access_info(to);
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(*image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: *aspect,
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            });
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    fn buffer_barrier(
        &self,
        commands: &GpuCommandList,
        buffer: &GpuBuffer,
        from: ResourceAccess,
        to: ResourceAccess,
    ) {
        let (Some(cmd), Some(buffer)) =
            (Self::vulkan_commands(commands), Self::vulkan_buffer(buffer))
        else {
            return;
        };
        let (src_access, src_stage) = barriers::buffer_access_info(from);
        let (dst_access, dst_stage) = barriers::buffer_access_info(to);
        let barrier = vk::BufferMemoryBarrier::default()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE);
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[barrier],
                &[],
            );
        }
    }

    fn write_timestamp(&self, commands: &GpuCommandList, set: &GpuQuerySet, index: u32) {
        let (Some(cmd), GpuQuerySet::Vulkan { pool, .. }) =
            (Self::vulkan_commands(commands), set)
        else {
            return;
        };
        unsafe {
            self.device.cmd_write_timestamp(
                cmd,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                *pool,
                index,
            );
        }
    }

    fn begin_statistics(&self, commands: &GpuCommandList, set: &GpuQuerySet, index: u32) {
        let (Some(cmd), GpuQuerySet::Vulkan { pool, .. }) =
            (Self::vulkan_commands(commands), set)
        else {
            return;
        };
        unsafe {
            self.device
                .cmd_begin_query(cmd, *pool, index, vk::QueryControlFlags::empty());
        }
    }

    fn end_statistics(&self, commands: &GpuCommandList, set: &GpuQuerySet, index: u32) {
        let (Some(cmd), GpuQuerySet::Vulkan { pool, .. }) =
            (Self::vulkan_commands(commands), set)
        else {
            return;
        };
        unsafe { self.device.cmd_end_query(cmd, *pool, index) };
    }

    fn reset_query(&self, set: &GpuQuerySet, index: u32) {
        if let GpuQuerySet::Vulkan { pool, .. } = set {
            unsafe { self.device.reset_query_pool(*pool, index, 1) };
        }
    }

    fn query_available(&self, set: &GpuQuerySet, index: u32) -> bool {
        self.query_result(set, index).is_some()
    }

    fn query_result(&self, set: &GpuQuerySet, index: u32) -> Option<u64> {
        let GpuQuerySet::Vulkan { pool, .. } = set else {
            return None;
        };
        // One [value, availability] pair per query; ash derives the query
        // count from the slice length.
        let mut data = [[0u64; 2]; 1];
        let result = unsafe {
            self.device.get_query_pool_results(
                *pool,
                index,
                &mut data,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WITH_AVAILABILITY,
            )
        };
        match result {
            Ok(()) if data[0][1] != 0 => Some(data[0][0]),
            Ok(()) | Err(vk::Result::NOT_READY) => None,
            Err(e) => {
                log::error!("Query readback failed: {:?}", e);
                None
            }
        }
    }

    fn complete_query(&self, _set: &GpuQuerySet, _index: u32, _result: u64) {
        // Queries complete on the GPU timeline on this backend.
    }
}

static_assertions::assert_impl_all!(VulkanBackend: Send, Sync);
