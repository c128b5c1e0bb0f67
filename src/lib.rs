//! cinder-rhi: a render hardware interface over native GPU backends.
//!
//! The crate exposes one device/context API and routes it to a concrete
//! backend selected at startup. The null backend runs everywhere and backs
//! the test suite; the Vulkan backend (feature `vulkan-backend`) drives real
//! hardware through ash.
//!
//! The moving parts:
//!
//! - [`Device`]: backend ownership plus every device-wide service
//! - [`CommandContext`]: per-frame recording state machine
//! - [`RenderThread`]: single thread that owns the context
//! - resources, views and the render-target cache for attachment reuse
//! - uniform streaming pools over a block-allocated constant heap
//! - query allocation and the persisted shader cache

pub mod backend;
pub mod block;
pub mod context;
pub mod deferred;
pub mod device;
pub mod error;
pub mod query;
pub mod resource;
pub mod resources;
pub mod shader_cache;
pub mod target_cache;
pub mod thread;
pub mod types;
pub mod uniforms;
pub mod views;

pub use backend::{BackendKind, BackendLimits, GpuBackend};
pub use context::{Binding, CommandContext, CommandHandle, ContextState};
pub use device::Device;
pub use error::RhiError;
pub use query::{QueryHandle, TimerQuery};
pub use resource::{GpuResource, ObjectId};
pub use resources::{Buffer, Sampler, Texture};
pub use shader_cache::{CompiledShader, ShaderCache, ShaderStage};
pub use thread::RenderThread;
pub use views::{DepthStencilView, RenderTargetView, ShaderResourceView, UnorderedAccessView};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_device_and_context_smoke() {
        let device = Device::new(BackendKind::None).unwrap();
        let mut context = CommandContext::new(device);
        context.begin().unwrap();
        let handle = context.end().unwrap();
        context.execute(&handle).unwrap();
        context.advance_frame().unwrap();
    }
}
