//! Device-level resource wrappers.
//!
//! Each wrapper pairs a backend handle with an [`ObjectId`], an explicit
//! reference count and the deferred-destroy hookup. Wrappers are created
//! through [`Device`] factory methods and handed out as `Arc`s.
//!
//! [`ObjectId`]: crate::resource::ObjectId
//! [`Device`]: crate::device::Device

mod buffer;
mod sampler;
mod texture;

pub use buffer::Buffer;
pub use sampler::Sampler;
pub use texture::Texture;
