//! Common types shared across the RHI.

/// 3D extent for textures and framebuffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent3d {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Depth in pixels (1 for 2D textures).
    pub depth: u32,
}

impl Extent3d {
    /// Create a new 2D extent.
    pub fn new_2d(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
        }
    }

    /// Create a new 3D extent.
    pub fn new_3d(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Extent of the given mip level, clamped to at least one pixel per axis.
    pub fn mip_level(&self, level: u32) -> Self {
        Self {
            width: (self.width >> level).max(1),
            height: (self.height >> level).max(1),
            depth: (self.depth >> level).max(1),
        }
    }
}

/// A rectangular region used by blit and scissor operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    /// X coordinate of the top-left corner.
    pub x: i32,
    /// Y coordinate of the top-left corner.
    pub y: i32,
    /// Width of the rectangle.
    pub width: u32,
    /// Height of the rectangle.
    pub height: u32,
}

impl Rect {
    /// Create a new rectangle.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a rectangle from dimensions with origin at (0, 0).
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// Sampling filter for blits and samplers.
///
/// Backends that only distinguish nearest/linear collapse `Trilinear`
/// to linear filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    /// Nearest-neighbor filtering.
    Nearest,
    /// Bilinear filtering.
    #[default]
    Bilinear,
    /// Trilinear filtering (bilinear across mip levels).
    Trilinear,
}

/// Clear value for a color render target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearColorValue {
    /// Floating-point clear for normalized and float formats.
    Float([f32; 4]),
    /// Unsigned integer clear for UINT formats.
    Uint([u32; 4]),
    /// Signed integer clear for SINT formats.
    Sint([i32; 4]),
}

/// Logical access state of a resource.
///
/// The command context's `barrier` call is the single authority that
/// translates these into backend pipeline-stage and memory-access flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceAccess {
    /// Initial state, contents undefined.
    #[default]
    Undefined,
    /// Source of a copy or blit.
    CopySrc,
    /// Destination of a copy, blit, or clear.
    CopyDst,
    /// Read as a vertex buffer.
    VertexBuffer,
    /// Read as an index buffer.
    IndexBuffer,
    /// Read as a uniform buffer.
    UniformBuffer,
    /// Written as a color render target.
    RenderTarget,
    /// Written as a depth/stencil attachment.
    DepthWrite,
    /// Read as a depth/stencil attachment (depth testing without write).
    DepthRead,
    /// Sampled or read in a shader.
    ShaderRead,
    /// Written from a shader (unordered access).
    ShaderWrite,
    /// Presented to a swapchain.
    Present,
}

impl ResourceAccess {
    /// Whether this access writes the resource as a framebuffer attachment.
    pub fn is_attachment(&self) -> bool {
        matches!(self, Self::RenderTarget | Self::DepthWrite | Self::DepthRead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_extent_clamps_to_one() {
        let extent = Extent3d::new_2d(256, 64);
        assert_eq!(extent.mip_level(0), Extent3d::new_2d(256, 64));
        assert_eq!(extent.mip_level(4), Extent3d::new_2d(16, 4));
        assert_eq!(extent.mip_level(10), Extent3d::new_2d(1, 1));
    }

    #[test]
    fn test_attachment_accesses() {
        assert!(ResourceAccess::RenderTarget.is_attachment());
        assert!(ResourceAccess::DepthWrite.is_attachment());
        assert!(!ResourceAccess::ShaderRead.is_attachment());
        assert!(!ResourceAccess::CopyDst.is_attachment());
    }
}
