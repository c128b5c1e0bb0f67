//! Sampler types and descriptors.

use super::FilterMode;

/// Texture coordinate addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    /// Clamp coordinates to the edge of the texture.
    #[default]
    ClampToEdge,
    /// Repeat the texture.
    Repeat,
    /// Repeat the texture, mirroring on each wrap.
    MirrorRepeat,
}

/// Descriptor for creating a sampler.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDescriptor {
    /// Debug label for the sampler.
    pub label: Option<String>,
    /// Minification/magnification filter.
    pub filter: FilterMode,
    /// Addressing mode for all coordinates.
    pub address_mode: AddressMode,
    /// Maximum anisotropy (1.0 disables anisotropic filtering).
    pub max_anisotropy: f32,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            filter: FilterMode::Bilinear,
            address_mode: AddressMode::ClampToEdge,
            max_anisotropy: 1.0,
        }
    }
}

impl SamplerDescriptor {
    /// A bilinear clamping sampler.
    pub fn linear() -> Self {
        Self::default()
    }

    /// A nearest-neighbor clamping sampler.
    pub fn nearest() -> Self {
        Self {
            filter: FilterMode::Nearest,
            ..Self::default()
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}
