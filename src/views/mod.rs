//! Typed views over GPU resources.
//!
//! Views pin their backing resource: construction takes a reference on the
//! texture or buffer, destruction releases it. A view can therefore be the
//! last holder keeping a resource alive.

mod render_target;
mod shader;

pub use render_target::{DepthStencilView, RenderTargetView};
pub use shader::{ShaderResourceView, UnorderedAccessView};

/// Maximum number of simultaneously bound color attachments.
pub const MAX_COLOR_ATTACHMENTS: usize = 4;
