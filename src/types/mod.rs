//! Shared type definitions for the RHI.

mod buffer;
mod common;
mod query;
mod sampler;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage, IndexFormat};
pub use common::{ClearColorValue, Extent3d, FilterMode, Rect, ResourceAccess};
pub use query::QueryKind;
pub use sampler::{AddressMode, SamplerDescriptor};
pub use texture::{TextureDescriptor, TextureFormat, TextureSubresource, TextureUsage};
