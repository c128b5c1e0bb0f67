//! Command recording context.
//!
//! A [`CommandContext`] walks a strict `Idle -> Recording -> Submitted`
//! cycle per frame. Contract violations (recording outside `begin`/`end`,
//! beginning twice, advancing mid-recording) are caller bugs and panic.
//!
//! Descriptor-style binds (textures, samplers, storage views) are recorded
//! into a slot-indexed binding table rather than issued to the backend;
//! uniform-buffer binds additionally reach the backend because their
//! offset/size pairs are what the streaming pools are built around.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::backend::{GpuCommandList, GpuFence};
use crate::deferred::FRAMES_IN_FLIGHT;
use crate::device::Device;
use crate::error::RhiError;
use crate::query::QueryHandle;
use crate::resource::{GpuResource, ObjectId};
use crate::resources::Buffer;
use crate::target_cache::FramebufferEntry;
use crate::types::{
    ClearColorValue, Extent3d, FilterMode, IndexFormat, Rect, ResourceAccess,
};
use crate::views::{
    DepthStencilView, RenderTargetView, ShaderResourceView, UnorderedAccessView,
    MAX_COLOR_ATTACHMENTS,
};

/// Highest bindable slot index (exclusive).
pub const MAX_BIND_SLOTS: u32 = 256;

/// Default slot the global uniform stack binds to.
pub const GLOBAL_UNIFORM_SLOT: u32 = 0;

/// Default slot the per-draw uniform pool binds to.
pub const LOCAL_UNIFORM_SLOT: u32 = 1;

/// Where a context is in its per-frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Idle,
    Recording,
    Submitted,
}

/// A finished command stream, replayable until the context recycles it.
#[derive(Debug, Clone)]
pub struct CommandHandle {
    commands: Arc<GpuCommandList>,
}

impl CommandHandle {
    /// The underlying backend command list.
    pub fn gpu(&self) -> &Arc<GpuCommandList> {
        &self.commands
    }
}

/// What a binding slot currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    UniformBuffer { id: ObjectId, offset: u64, size: u64 },
    /// A slice of the streaming pools; pool buffers carry no object identity.
    PoolUniform { offset: u64, size: u64 },
    StorageBuffer { id: ObjectId, offset: u64, size: u64 },
    Texture { id: ObjectId },
    StorageTexture { id: ObjectId },
    Sampler { id: ObjectId },
}

struct FrameSlot {
    fence: GpuFence,
    in_flight: bool,
}

/// Records GPU work for one frame at a time.
pub struct CommandContext {
    device: Arc<Device>,
    state: ContextState,
    commands: Option<Arc<GpuCommandList>>,
    frame_slots: Vec<FrameSlot>,
    frame: u64,
    globals: crate::uniforms::GlobalUniformPool,
    locals: crate::uniforms::LocalUniformPool,
    global_slot: u32,
    scalar_slot: u32,
    bound_targets: Option<Arc<FramebufferEntry>>,
    bound_attachments: HashSet<ObjectId>,
    render_pass_active: bool,
    texture_access: HashMap<ObjectId, ResourceAccess>,
    buffer_access: HashMap<ObjectId, ResourceAccess>,
    bindings: HashMap<u32, Binding>,
}

impl CommandContext {
    pub fn new(device: Arc<Device>) -> Self {
        // Slots are only waited on after a submit, so fences start unsignaled
        // and ready for their first use.
        let frame_slots = (0..FRAMES_IN_FLIGHT)
            .map(|_| FrameSlot {
                fence: device.backend().create_fence(false),
                in_flight: false,
            })
            .collect();
        Self {
            device,
            state: ContextState::Idle,
            commands: None,
            frame_slots,
            frame: 0,
            globals: crate::uniforms::GlobalUniformPool::new(),
            locals: crate::uniforms::LocalUniformPool::new(),
            global_slot: GLOBAL_UNIFORM_SLOT,
            scalar_slot: LOCAL_UNIFORM_SLOT,
            bound_targets: None,
            bound_attachments: HashSet::new(),
            render_pass_active: false,
            texture_access: HashMap::new(),
            buffer_access: HashMap::new(),
            bindings: HashMap::new(),
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Monotonic frame counter.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    fn recording(&self) -> &Arc<GpuCommandList> {
        assert!(
            self.state == ContextState::Recording,
            "command recorded outside begin/end (state: {:?})",
            self.state
        );
        self.commands
            .as_ref()
            .expect("recording state implies an open command list")
    }

    /// Open a fresh command stream.
    ///
    /// # Panics
    ///
    /// Panics unless the context is idle.
    pub fn begin(&mut self) -> Result<(), RhiError> {
        assert!(
            self.state == ContextState::Idle,
            "begin() while {:?}",
            self.state
        );
        self.commands = Some(Arc::new(self.device.backend().begin_commands()?));
        self.bindings.clear();
        self.state = ContextState::Recording;
        Ok(())
    }

    /// Close the command stream and hand it out for submission.
    ///
    /// An active render pass is ended implicitly.
    ///
    /// # Panics
    ///
    /// Panics unless the context is recording.
    pub fn end(&mut self) -> Result<CommandHandle, RhiError> {
        assert!(
            self.state == ContextState::Recording,
            "end() while {:?}",
            self.state
        );
        self.end_render_pass_if_active();
        let commands = self
            .commands
            .clone()
            .expect("recording state implies an open command list");
        self.device.backend().end_commands(&commands)?;
        self.state = ContextState::Submitted;
        Ok(CommandHandle { commands })
    }

    /// Submit a finished command stream, signaling this frame's fence.
    ///
    /// Submitting the same handle again replays it.
    ///
    /// # Panics
    ///
    /// Panics if the context is mid-recording.
    pub fn execute(&mut self, handle: &CommandHandle) -> Result<(), RhiError> {
        assert!(
            self.state != ContextState::Recording,
            "execute() while recording"
        );
        let slot = &mut self.frame_slots[self.frame as usize % FRAMES_IN_FLIGHT];
        if slot.in_flight {
            // The fence is still attached to this frame's previous submit;
            // it must retire and reset before it can be signaled again.
            let backend = self.device.backend();
            backend.wait_fence(&slot.fence)?;
            backend.reset_fence(&slot.fence);
            slot.in_flight = false;
        }
        self.device
            .backend()
            .submit(&handle.commands, Some(&slot.fence))?;
        slot.in_flight = true;
        Ok(())
    }

    /// Retire the oldest frame and rotate to the next one.
    ///
    /// Waits for the recycled frame slot's fence (if work was submitted on
    /// it), rewinds both uniform pools and advances the deferred destructor.
    /// A fence timeout is fatal to the frame loop and surfaces as an error.
    ///
    /// # Panics
    ///
    /// Panics if the context is mid-recording.
    pub fn advance_frame(&mut self) -> Result<(), RhiError> {
        assert!(
            self.state != ContextState::Recording,
            "advance_frame() while recording"
        );
        self.frame += 1;
        let slot = &mut self.frame_slots[self.frame as usize % FRAMES_IN_FLIGHT];
        if slot.in_flight {
            let backend = self.device.backend();
            backend.wait_fence(&slot.fence)?;
            backend.reset_fence(&slot.fence);
            slot.in_flight = false;
        }
        self.globals.reset();
        self.locals.reset();
        if let Some(commands) = self.commands.take() {
            self.device
                .deferred()
                .queue(crate::deferred::DeferredHandle::CommandList(commands));
        }
        self.bound_targets = None;
        self.bound_attachments.clear();
        self.texture_access.clear();
        self.buffer_access.clear();
        self.device.deferred().advance_frame();
        self.state = ContextState::Idle;
        Ok(())
    }

    // ---- render targets ---------------------------------------------------

    /// Bind a set of attachment views and begin rendering into them.
    ///
    /// At least one attachment must be present.
    pub fn bind_render_targets(
        &mut self,
        colors: &[Option<&Arc<RenderTargetView>>],
        depth: Option<&Arc<DepthStencilView>>,
    ) -> Result<(), RhiError> {
        assert!(colors.len() <= MAX_COLOR_ATTACHMENTS);
        self.end_render_pass_if_active();

        for view in colors.iter().flatten() {
            self.transition(view.texture(), ResourceAccess::RenderTarget);
        }
        if let Some(view) = depth {
            self.transition(view.texture(), ResourceAccess::DepthWrite);
        }

        let entry =
            self.device
                .render_targets()
                .find_or_create(self.device.backend(), colors, depth)?;
        let _ = entry.with_framebuffer(|framebuffer| {
            self.device
                .backend()
                .begin_render_pass(self.recording(), framebuffer);
        });

        self.bound_attachments = colors
            .iter()
            .flatten()
            .map(|view| view.texture().id())
            .chain(depth.map(|view| view.texture().id()))
            .collect();
        self.bound_targets = Some(entry);
        self.render_pass_active = true;
        Ok(())
    }

    /// End the active render pass, keeping the cache entry warm.
    pub fn unbind_render_targets(&mut self) {
        self.leave_render_pass();
    }

    /// The currently bound aggregate, if any.
    pub fn bound_targets(&self) -> Option<&Arc<FramebufferEntry>> {
        self.bound_targets.as_ref()
    }

    /// Extent of the bound render targets.
    pub fn render_extent(&self) -> Option<Extent3d> {
        self.bound_targets.as_ref().map(|entry| entry.extent())
    }

    fn end_render_pass_if_active(&mut self) {
        if self.render_pass_active {
            self.device.backend().end_render_pass(self.recording());
            self.render_pass_active = false;
        }
    }

    fn leave_render_pass(&mut self) {
        self.end_render_pass_if_active();
        self.bound_targets = None;
        self.bound_attachments.clear();
    }

    // ---- barriers ----------------------------------------------------------

    /// Transition a texture to `access`, splitting the render pass when the
    /// texture is bound as an attachment.
    pub fn barrier(&mut self, texture: &Arc<crate::resources::Texture>, access: ResourceAccess) {
        let _ = self.recording();
        if self.render_pass_active && self.bound_attachments.contains(&texture.id()) {
            self.leave_render_pass();
        }
        self.transition(texture, access);
    }

    fn transition(&mut self, texture: &Arc<crate::resources::Texture>, access: ResourceAccess) {
        let current = self
            .texture_access
            .get(&texture.id())
            .copied()
            .unwrap_or_default();
        if current == access {
            return;
        }
        if let Some(handle) = texture.gpu() {
            self.device
                .backend()
                .texture_barrier(self.recording(), &handle, current, access);
        }
        self.texture_access.insert(texture.id(), access);
    }

    /// The tracked access state of a texture this frame.
    pub fn texture_access(&self, texture: &Arc<crate::resources::Texture>) -> ResourceAccess {
        self.texture_access
            .get(&texture.id())
            .copied()
            .unwrap_or_default()
    }

    /// Transition a buffer to `access`.
    pub fn buffer_barrier(&mut self, buffer: &Arc<Buffer>, access: ResourceAccess) {
        let _ = self.recording();
        let current = self
            .buffer_access
            .get(&buffer.id())
            .copied()
            .unwrap_or_default();
        if current == access {
            return;
        }
        if let Some(handle) = buffer.gpu() {
            self.device
                .backend()
                .buffer_barrier(self.recording(), &handle, current, access);
        }
        self.buffer_access.insert(buffer.id(), access);
    }

    /// The tracked access state of a buffer this frame.
    pub fn buffer_access(&self, buffer: &Arc<Buffer>) -> ResourceAccess {
        self.buffer_access
            .get(&buffer.id())
            .copied()
            .unwrap_or_default()
    }

    // ---- uniform streaming -------------------------------------------------

    /// Push a pass-level uniform block and bind it to the global slot.
    pub fn push_globals(&mut self, data: &[u8]) -> Result<(), RhiError> {
        {
            let mut heap = self.device.constants().lock();
            self.globals.push(&mut heap, data)?;
        }
        self.rebind_globals();
        Ok(())
    }

    /// Pop the top pass-level block, rebinding the one beneath it.
    pub fn pop_globals(&mut self) {
        self.globals.pop();
        self.rebind_globals();
    }

    fn rebind_globals(&mut self) {
        if self.state != ContextState::Recording {
            return;
        }
        match self.globals.bind() {
            Some(binding) => {
                self.device.backend().bind_uniform_buffer(
                    self.recording(),
                    &binding.buffer,
                    self.global_slot,
                    binding.offset,
                    binding.size,
                );
                self.bindings.insert(
                    self.global_slot,
                    Binding::PoolUniform {
                        offset: binding.offset,
                        size: binding.size,
                    },
                );
            }
            None => {
                self.bindings.remove(&self.global_slot);
            }
        }
    }

    /// Push a plain-old-data value as a pass-level uniform block.
    pub fn push_globals_value<T: bytemuck::Pod>(&mut self, value: &T) -> Result<(), RhiError> {
        self.push_globals(bytemuck::bytes_of(value))
    }

    /// Stage per-draw uniform bytes; flushed on the next draw or dispatch.
    pub fn update_scalar(&mut self, data: &[u8], offset: u64) {
        self.locals.update(data, offset);
    }

    /// Stage a plain-old-data value as per-draw uniform data.
    pub fn update_scalar_value<T: bytemuck::Pod>(&mut self, value: &T, offset: u64) {
        self.locals.update(bytemuck::bytes_of(value), offset);
    }

    /// Slot the per-draw pool flushes to.
    pub fn set_scalar_slot(&mut self, slot: u32) {
        self.scalar_slot = slot;
    }

    /// Depth of the pass-level uniform stack.
    pub fn global_depth(&self) -> usize {
        self.globals.depth()
    }

    fn flush_scalars(&mut self) -> Result<(), RhiError> {
        let binding = {
            let mut heap = self.device.constants().lock();
            self.locals.bind(&mut heap)?
        };
        if let Some(binding) = binding {
            self.device.backend().bind_uniform_buffer(
                self.recording(),
                &binding.buffer,
                self.scalar_slot,
                binding.offset,
                binding.size,
            );
            self.bindings.insert(
                self.scalar_slot,
                Binding::PoolUniform {
                    offset: binding.offset,
                    size: binding.size,
                },
            );
        }
        Ok(())
    }

    // ---- binds -------------------------------------------------------------

    fn slot_usable(slot: u32) -> bool {
        if slot >= MAX_BIND_SLOTS {
            log::trace!("Ignoring bind to out-of-range slot {}", slot);
            return false;
        }
        true
    }

    /// Bind a uniform-buffer range. `None` unbinds; both `None` and
    /// out-of-range slots are silent no-ops on the backend.
    pub fn bind_uniform_buffer(
        &mut self,
        slot: u32,
        buffer: Option<&Arc<Buffer>>,
        offset: u64,
        size: u64,
    ) {
        if !Self::slot_usable(slot) {
            return;
        }
        let Some(buffer) = buffer else {
            self.bindings.remove(&slot);
            return;
        };
        let Some(handle) = buffer.gpu() else {
            log::error!("Binding a destroyed buffer to slot {}", slot);
            return;
        };
        self.device
            .backend()
            .bind_uniform_buffer(self.recording(), &handle, slot, offset, size);
        self.bindings.insert(
            slot,
            Binding::UniformBuffer {
                id: buffer.id(),
                offset,
                size,
            },
        );
    }

    /// Bind a read-only shader view. Texture-backed views are transitioned
    /// to `ShaderRead`.
    pub fn bind_shader_resource(&mut self, slot: u32, view: Option<&Arc<ShaderResourceView>>) {
        if !Self::slot_usable(slot) {
            return;
        }
        let Some(view) = view else {
            self.bindings.remove(&slot);
            return;
        };
        if let Some(texture) = view.texture() {
            let texture = texture.clone();
            self.barrier(&texture, ResourceAccess::ShaderRead);
            self.bindings.insert(slot, Binding::Texture { id: view.id() });
        } else if let Some((buffer, offset, size)) = view.buffer_range() {
            self.bindings.insert(
                slot,
                Binding::StorageBuffer {
                    id: buffer.id(),
                    offset,
                    size,
                },
            );
        }
    }

    /// Bind a read-write shader view. Texture-backed views are transitioned
    /// to `ShaderWrite`.
    pub fn bind_unordered_access(&mut self, slot: u32, view: Option<&Arc<UnorderedAccessView>>) {
        if !Self::slot_usable(slot) {
            return;
        }
        let Some(view) = view else {
            self.bindings.remove(&slot);
            return;
        };
        if let Some(texture) = view.texture() {
            let texture = texture.clone();
            self.barrier(&texture, ResourceAccess::ShaderWrite);
            self.bindings
                .insert(slot, Binding::StorageTexture { id: view.id() });
        } else if let Some((buffer, offset, size)) = view.buffer_range() {
            self.bindings.insert(
                slot,
                Binding::StorageBuffer {
                    id: buffer.id(),
                    offset,
                    size,
                },
            );
        }
    }

    /// Bind a sampler.
    pub fn bind_sampler(&mut self, slot: u32, sampler: Option<&Arc<crate::resources::Sampler>>) {
        if !Self::slot_usable(slot) {
            return;
        }
        match sampler {
            Some(sampler) => {
                self.bindings
                    .insert(slot, Binding::Sampler { id: sampler.id() });
            }
            None => {
                self.bindings.remove(&slot);
            }
        }
    }

    /// Bind a vertex buffer to a stream.
    pub fn bind_vertex_buffer(
        &mut self,
        stream: u32,
        buffer: Option<&Arc<Buffer>>,
        offset: u64,
        stride: u32,
    ) {
        let Some(buffer) = buffer else {
            return;
        };
        let Some(handle) = buffer.gpu() else {
            log::error!("Binding a destroyed vertex buffer to stream {}", stream);
            return;
        };
        self.device
            .backend()
            .bind_vertex_buffer(self.recording(), &handle, offset, stride, stream);
    }

    /// Bind an index buffer.
    pub fn bind_index_buffer(&mut self, buffer: Option<&Arc<Buffer>>, format: IndexFormat) {
        let Some(buffer) = buffer else {
            return;
        };
        let Some(handle) = buffer.gpu() else {
            log::error!("Binding a destroyed index buffer");
            return;
        };
        self.device
            .backend()
            .bind_index_buffer(self.recording(), &handle, format);
    }

    /// What a slot currently holds, for diagnostics and tests.
    pub fn binding(&self, slot: u32) -> Option<Binding> {
        self.bindings.get(&slot).copied()
    }

    // ---- draws -------------------------------------------------------------

    /// Record a non-indexed draw, flushing staged per-draw uniforms first.
    pub fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> Result<(), RhiError> {
        self.draw_instanced(vertex_count, 1, first_vertex, 0)
    }

    /// Record an instanced draw.
    pub fn draw_instanced(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), RhiError> {
        self.flush_scalars()?;
        self.device.backend().draw(
            self.recording(),
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        );
        Ok(())
    }

    /// Record an indexed draw, flushing staged per-draw uniforms first.
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<(), RhiError> {
        self.flush_scalars()?;
        self.device.backend().draw_indexed(
            self.recording(),
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        );
        Ok(())
    }

    /// Record a compute dispatch, flushing staged per-draw uniforms first.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), RhiError> {
        self.flush_scalars()?;
        self.device.backend().dispatch(self.recording(), x, y, z);
        Ok(())
    }

    // ---- transfer and clears ----------------------------------------------

    /// Clear the texture behind a render-target view.
    ///
    /// Clears are transfer-stage commands; any active render pass is ended,
    /// whether or not the target is bound to it.
    pub fn clear_render_target(&mut self, view: &Arc<RenderTargetView>, value: ClearColorValue) {
        self.leave_render_pass();
        let texture = view.texture().clone();
        self.barrier(&texture, ResourceAccess::CopyDst);
        if let Some(handle) = texture.gpu() {
            self.device.backend().clear_color(
                self.recording(),
                &handle,
                view.subresource(),
                value,
            );
        }
    }

    /// Clear the texture behind a depth-stencil view.
    pub fn clear_depth_stencil(&mut self, view: &Arc<DepthStencilView>, depth: f32, stencil: u32) {
        self.leave_render_pass();
        let texture = view.texture().clone();
        self.barrier(&texture, ResourceAccess::CopyDst);
        if let Some(handle) = texture.gpu() {
            self.device.backend().clear_depth_stencil(
                self.recording(),
                &handle,
                view.subresource(),
                depth,
                stencil,
            );
        }
    }

    /// Scaled copy between two render-target views.
    ///
    /// Any active render pass is ended first, whether or not either view is
    /// bound to it, then both textures are moved to transfer states.
    pub fn blit(
        &mut self,
        src: &Arc<RenderTargetView>,
        src_rect: Rect,
        dst: &Arc<RenderTargetView>,
        dst_rect: Rect,
        filter: FilterMode,
    ) {
        self.leave_render_pass();
        let src_texture = src.texture().clone();
        let dst_texture = dst.texture().clone();
        self.barrier(&src_texture, ResourceAccess::CopySrc);
        self.barrier(&dst_texture, ResourceAccess::CopyDst);
        if let (Some(src_handle), Some(dst_handle)) = (src_texture.gpu(), dst_texture.gpu()) {
            self.device.backend().blit(
                self.recording(),
                &src_handle,
                src_rect,
                &dst_handle,
                dst_rect,
                filter,
            );
        }
    }

    /// Record a buffer-to-buffer copy.
    pub fn copy_buffer_to_buffer(
        &mut self,
        src: &Arc<Buffer>,
        src_offset: u64,
        dst: &Arc<Buffer>,
        dst_offset: u64,
        size: u64,
    ) {
        self.buffer_barrier(src, ResourceAccess::CopySrc);
        self.buffer_barrier(dst, ResourceAccess::CopyDst);
        if let (Some(src_handle), Some(dst_handle)) = (src.gpu(), dst.gpu()) {
            self.device.backend().copy_buffer_to_buffer(
                self.recording(),
                &src_handle,
                src_offset,
                &dst_handle,
                dst_offset,
                size,
            );
        }
    }

    /// Record a buffer-to-texture upload covering `extent`.
    pub fn copy_buffer_to_texture(
        &mut self,
        src: &Arc<Buffer>,
        src_offset: u64,
        dst: &Arc<crate::resources::Texture>,
        extent: Extent3d,
    ) {
        self.buffer_barrier(src, ResourceAccess::CopySrc);
        let dst = dst.clone();
        self.barrier(&dst, ResourceAccess::CopyDst);
        if let (Some(src_handle), Some(dst_handle)) = (src.gpu(), dst.gpu()) {
            self.device.backend().copy_buffer_to_texture(
                self.recording(),
                &src_handle,
                src_offset,
                &dst_handle,
                extent,
            );
        }
    }

    // ---- queries -----------------------------------------------------------

    /// Record a timestamp write.
    pub fn write_timestamp(&mut self, handle: QueryHandle) {
        let commands = self.recording().clone();
        let backend = self.device.backend().clone();
        self.device
            .with_timestamp_set(handle, |set| {
                backend.write_timestamp(&commands, set, handle.index())
            });
    }

    /// Begin a pipeline-statistics capture.
    pub fn begin_statistics(&mut self, handle: QueryHandle) {
        let commands = self.recording().clone();
        let backend = self.device.backend().clone();
        self.device
            .with_statistics_set(handle, |set| {
                backend.begin_statistics(&commands, set, handle.index())
            });
    }

    /// End a pipeline-statistics capture.
    pub fn end_statistics(&mut self, handle: QueryHandle) {
        let commands = self.recording().clone();
        let backend = self.device.backend().clone();
        self.device
            .with_statistics_set(handle, |set| {
                backend.end_statistics(&commands, set, handle.index())
            });
    }
}

impl Drop for CommandContext {
    fn drop(&mut self) {
        let mut heap = self.device.constants().lock();
        self.globals.release(&mut heap);
        self.locals.release(&mut heap);
    }
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("state", &self.state)
            .field("frame", &self.frame)
            .field("render_pass_active", &self.render_pass_active)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::types::{BufferDescriptor, BufferUsage, TextureDescriptor, TextureFormat, TextureUsage};

    fn context() -> CommandContext {
        CommandContext::new(Device::new(BackendKind::None).unwrap())
    }

    #[test]
    fn test_frame_cycle() {
        let mut ctx = context();
        assert_eq!(ctx.state(), ContextState::Idle);
        ctx.begin().unwrap();
        assert_eq!(ctx.state(), ContextState::Recording);
        let handle = ctx.end().unwrap();
        assert_eq!(ctx.state(), ContextState::Submitted);
        ctx.execute(&handle).unwrap();
        ctx.advance_frame().unwrap();
        assert_eq!(ctx.state(), ContextState::Idle);
        assert_eq!(ctx.frame(), 1);
    }

    #[test]
    #[should_panic(expected = "begin() while")]
    fn test_begin_twice_panics() {
        let mut ctx = context();
        ctx.begin().unwrap();
        let _ = ctx.begin();
    }

    #[test]
    #[should_panic(expected = "end() while")]
    fn test_end_without_begin_panics() {
        let mut ctx = context();
        let _ = ctx.end();
    }

    #[test]
    #[should_panic(expected = "advance_frame() while recording")]
    fn test_advance_mid_recording_panics() {
        let mut ctx = context();
        ctx.begin().unwrap();
        let _ = ctx.advance_frame();
    }

    #[test]
    #[should_panic(expected = "outside begin/end")]
    fn test_draw_outside_recording_panics() {
        let mut ctx = context();
        let _ = ctx.draw(3, 0);
    }

    #[test]
    fn test_replay_submits_same_commands() {
        let mut ctx = context();
        ctx.begin().unwrap();
        ctx.draw(3, 0).unwrap();
        let handle = ctx.end().unwrap();
        ctx.execute(&handle).unwrap();
        ctx.execute(&handle).unwrap();
        assert_eq!(handle.gpu().submit_count(), 2);
    }

    #[test]
    fn test_resubmit_retires_the_frame_fence_first() {
        let mut ctx = context();
        ctx.begin().unwrap();
        ctx.draw(3, 0).unwrap();
        let handle = ctx.end().unwrap();

        // The second same-frame submit must wait out and reset the slot's
        // fence; the frame loop then keeps cycling normally.
        ctx.execute(&handle).unwrap();
        ctx.execute(&handle).unwrap();
        ctx.advance_frame().unwrap();

        ctx.begin().unwrap();
        let next = ctx.end().unwrap();
        ctx.execute(&next).unwrap();
        ctx.advance_frame().unwrap();
        assert_eq!(ctx.frame(), 2);
        assert_eq!(handle.gpu().submit_count(), 2);
    }

    #[test]
    fn test_out_of_range_and_null_binds_are_noops(){
        let mut ctx = context();
        let device = ctx.device().clone();
        let buffer = device
            .create_buffer(BufferDescriptor::new(256, BufferUsage::UNIFORM))
            .unwrap();
        ctx.begin().unwrap();
        ctx.bind_uniform_buffer(MAX_BIND_SLOTS, Some(&buffer), 0, 256);
        assert_eq!(ctx.binding(MAX_BIND_SLOTS), None);

        ctx.bind_uniform_buffer(7, Some(&buffer), 0, 256);
        assert!(matches!(
            ctx.binding(7),
            Some(Binding::UniformBuffer { size: 256, .. })
        ));
        ctx.bind_uniform_buffer(7, None, 0, 0);
        assert_eq!(ctx.binding(7), None);
    }

    #[test]
    fn test_global_stack_rebinds_on_pop() {
        let mut ctx = context();
        ctx.begin().unwrap();
        ctx.push_globals(&[1u8; 64]).unwrap();
        let first = ctx.binding(GLOBAL_UNIFORM_SLOT).unwrap();
        ctx.push_globals(&[2u8; 64]).unwrap();
        let second = ctx.binding(GLOBAL_UNIFORM_SLOT).unwrap();
        assert_ne!(first, second);
        ctx.pop_globals();
        assert_eq!(ctx.binding(GLOBAL_UNIFORM_SLOT), Some(first));
        ctx.pop_globals();
        assert_eq!(ctx.binding(GLOBAL_UNIFORM_SLOT), None);
    }

    #[test]
    fn test_draws_flush_scalars_at_advancing_offsets() {
        let mut ctx = context();
        ctx.begin().unwrap();
        ctx.update_scalar(&[3u8; 16], 0);
        ctx.draw(3, 0).unwrap();
        let Some(Binding::PoolUniform { offset: first, .. }) = ctx.binding(LOCAL_UNIFORM_SLOT)
        else {
            panic!("scalar slot not bound");
        };
        ctx.update_scalar(&[4u8; 16], 0);
        ctx.draw(3, 0).unwrap();
        let Some(Binding::PoolUniform { offset: second, .. }) = ctx.binding(LOCAL_UNIFORM_SLOT)
        else {
            panic!("scalar slot not bound");
        };
        assert_eq!(second - first, 256);
    }

    #[test]
    fn test_barrier_on_bound_attachment_splits_pass() {
        let mut ctx = context();
        let device = ctx.device().clone();
        let texture = device
            .create_texture(TextureDescriptor::new_2d(
                32,
                32,
                TextureFormat::Rgba8Unorm,
                TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            ))
            .unwrap();
        let view = device
            .create_render_target_view(&texture, Default::default())
            .unwrap();

        ctx.begin().unwrap();
        ctx.bind_render_targets(&[Some(&view)], None).unwrap();
        assert!(ctx.bound_targets().is_some());

        ctx.barrier(&texture, ResourceAccess::ShaderRead);
        assert!(ctx.bound_targets().is_none());
        assert_eq!(ctx.texture_access(&texture), ResourceAccess::ShaderRead);
    }

    #[test]
    fn test_blit_of_unbound_textures_ends_active_pass() {
        let mut ctx = context();
        let device = ctx.device().clone();
        let usage = TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC | TextureUsage::COPY_DST;
        let attachment = device
            .create_texture(TextureDescriptor::new_2d(32, 32, TextureFormat::Rgba8Unorm, usage))
            .unwrap();
        let bound = device
            .create_render_target_view(&attachment, Default::default())
            .unwrap();
        let src = device
            .create_render_target_view(
                &device
                    .create_texture(TextureDescriptor::new_2d(16, 16, TextureFormat::Rgba8Unorm, usage))
                    .unwrap(),
                Default::default(),
            )
            .unwrap();
        let dst = device
            .create_render_target_view(
                &device
                    .create_texture(TextureDescriptor::new_2d(16, 16, TextureFormat::Rgba8Unorm, usage))
                    .unwrap(),
                Default::default(),
            )
            .unwrap();

        ctx.begin().unwrap();
        ctx.bind_render_targets(&[Some(&bound)], None).unwrap();
        assert!(ctx.bound_targets().is_some());

        // Neither texture is an attachment, but the blit still may not be
        // recorded inside the open pass.
        let rect = Rect::from_dimensions(16, 16);
        ctx.blit(&src, rect, &dst, rect, FilterMode::Nearest);
        assert!(ctx.bound_targets().is_none());
        assert_eq!(ctx.texture_access(src.texture()), ResourceAccess::CopySrc);
        assert_eq!(ctx.texture_access(dst.texture()), ResourceAccess::CopyDst);
    }

    #[test]
    fn test_clear_of_unbound_texture_ends_active_pass() {
        let mut ctx = context();
        let device = ctx.device().clone();
        let usage = TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_DST;
        let attachment = device
            .create_texture(TextureDescriptor::new_2d(32, 32, TextureFormat::Rgba8Unorm, usage))
            .unwrap();
        let bound = device
            .create_render_target_view(&attachment, Default::default())
            .unwrap();
        let other = device
            .create_render_target_view(
                &device
                    .create_texture(TextureDescriptor::new_2d(16, 16, TextureFormat::Rgba8Unorm, usage))
                    .unwrap(),
                Default::default(),
            )
            .unwrap();

        ctx.begin().unwrap();
        ctx.bind_render_targets(&[Some(&bound)], None).unwrap();
        ctx.clear_render_target(&other, ClearColorValue::Float([0.0; 4]));
        assert!(ctx.bound_targets().is_none());
        assert_eq!(ctx.texture_access(other.texture()), ResourceAccess::CopyDst);
    }

    #[test]
    fn test_buffer_barrier_tracks_per_buffer_state() {
        let mut ctx = context();
        let device = ctx.device().clone();
        let buffer = device
            .create_buffer(BufferDescriptor::new(
                64,
                BufferUsage::VERTEX | BufferUsage::COPY_DST,
            ))
            .unwrap();

        ctx.begin().unwrap();
        assert_eq!(ctx.buffer_access(&buffer), ResourceAccess::Undefined);

        ctx.buffer_barrier(&buffer, ResourceAccess::CopyDst);
        assert_eq!(ctx.buffer_access(&buffer), ResourceAccess::CopyDst);

        ctx.buffer_barrier(&buffer, ResourceAccess::VertexBuffer);
        assert_eq!(ctx.buffer_access(&buffer), ResourceAccess::VertexBuffer);

        let handle = ctx.end().unwrap();
        ctx.execute(&handle).unwrap();
        ctx.advance_frame().unwrap();
        // Tracking is per frame.
        assert_eq!(ctx.buffer_access(&buffer), ResourceAccess::Undefined);
    }

    #[test]
    fn test_copies_move_buffers_to_transfer_states() {
        let mut ctx = context();
        let device = ctx.device().clone();
        let usage = BufferUsage::COPY_SRC | BufferUsage::COPY_DST;
        let src = device.create_buffer(BufferDescriptor::new(64, usage)).unwrap();
        let dst = device.create_buffer(BufferDescriptor::new(64, usage)).unwrap();

        ctx.begin().unwrap();
        ctx.copy_buffer_to_buffer(&src, 0, &dst, 0, 64);
        assert_eq!(ctx.buffer_access(&src), ResourceAccess::CopySrc);
        assert_eq!(ctx.buffer_access(&dst), ResourceAccess::CopyDst);
    }

    #[test]
    fn test_binding_all_none_targets_fails() {
        let mut ctx = context();
        ctx.begin().unwrap();
        let err = ctx.bind_render_targets(&[None, None], None).unwrap_err();
        assert!(matches!(err, RhiError::MissingRenderTargetExtent));
    }
}
