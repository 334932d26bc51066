//! Pixel formats, aspects and sample counts.

use bitflags::bitflags;

/// Pixel format of images and vertex attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    /// No format. Never mappable to a backend format.
    #[default]
    Undefined,

    // 8-bit formats
    R8Unorm,
    R8Snorm,
    R8Uint,
    R8Sint,

    // 16-bit formats
    R16Uint,
    R16Sint,
    R16Float,
    Rg8Unorm,
    Rg8Snorm,
    Rg8Uint,
    Rg8Sint,

    // 32-bit formats
    R32Uint,
    R32Sint,
    R32Float,
    Rg16Uint,
    Rg16Sint,
    Rg16Float,
    Rgba8Unorm,
    Rgba8Srgb,
    Rgba8Snorm,
    Rgba8Uint,
    Rgba8Sint,
    Bgra8Unorm,
    Bgra8Srgb,
    Rgb10a2Unorm,
    Rg11b10Float,

    // 64-bit formats
    Rg32Uint,
    Rg32Sint,
    Rg32Float,
    Rgba16Uint,
    Rgba16Sint,
    Rgba16Float,

    // 96/128-bit formats
    Rgb32Float,
    Rgba32Uint,
    Rgba32Sint,
    Rgba32Float,

    // Depth/stencil formats
    /// 16-bit depth.
    D16Unorm,
    /// 32-bit float depth.
    D32Float,
    /// 8-bit stencil.
    S8,
    /// 24-bit depth with 8-bit stencil.
    D24UnormS8,
    /// 32-bit float depth with 8-bit stencil.
    D32FloatS8,
}

bitflags! {
    /// Aspects of an image format.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Aspect: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

impl Format {
    /// Returns the aspects this format exposes. `Undefined` has none.
    pub fn aspect(&self) -> Aspect {
        match self {
            Self::Undefined => Aspect::empty(),
            Self::D16Unorm | Self::D32Float => Aspect::DEPTH,
            Self::S8 => Aspect::STENCIL,
            Self::D24UnormS8 | Self::D32FloatS8 => Aspect::DEPTH | Aspect::STENCIL,
            _ => Aspect::COLOR,
        }
    }

    /// Returns true if this is a depth and/or stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        self.aspect().intersects(Aspect::DEPTH | Aspect::STENCIL)
    }

    /// Returns true if this format has a stencil component.
    pub fn has_stencil(&self) -> bool {
        self.aspect().contains(Aspect::STENCIL)
    }

    /// Size in bytes of one texel. `Undefined` is zero.
    pub fn texel_size(&self) -> u32 {
        match self {
            Self::Undefined => 0,
            Self::R8Unorm | Self::R8Snorm | Self::R8Uint | Self::R8Sint | Self::S8 => 1,
            Self::R16Uint
            | Self::R16Sint
            | Self::R16Float
            | Self::Rg8Unorm
            | Self::Rg8Snorm
            | Self::Rg8Uint
            | Self::Rg8Sint
            | Self::D16Unorm => 2,
            Self::R32Uint
            | Self::R32Sint
            | Self::R32Float
            | Self::Rg16Uint
            | Self::Rg16Sint
            | Self::Rg16Float
            | Self::Rgba8Unorm
            | Self::Rgba8Srgb
            | Self::Rgba8Snorm
            | Self::Rgba8Uint
            | Self::Rgba8Sint
            | Self::Bgra8Unorm
            | Self::Bgra8Srgb
            | Self::Rgb10a2Unorm
            | Self::Rg11b10Float
            | Self::D32Float
            | Self::D24UnormS8 => 4,
            // Depth packed with a separate stencil byte.
            Self::D32FloatS8 => 5,
            Self::Rg32Uint
            | Self::Rg32Sint
            | Self::Rg32Float
            | Self::Rgba16Uint
            | Self::Rgba16Sint
            | Self::Rgba16Float => 8,
            Self::Rgb32Float => 12,
            Self::Rgba32Uint | Self::Rgba32Sint | Self::Rgba32Float => 16,
        }
    }
}

/// Multisample count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum Samples {
    #[default]
    S1,
    S2,
    S4,
    S8,
    S16,
    S32,
    S64,
}

impl Samples {
    /// Convert a raw sample count. Returns `None` for non power-of-two counts
    /// and counts above 64.
    pub fn from_count(count: u32) -> Option<Self> {
        match count {
            1 => Some(Self::S1),
            2 => Some(Self::S2),
            4 => Some(Self::S4),
            8 => Some(Self::S8),
            16 => Some(Self::S16),
            32 => Some(Self::S32),
            64 => Some(Self::S64),
            _ => None,
        }
    }

    /// Raw sample count.
    pub fn count(&self) -> u32 {
        match self {
            Self::S1 => 1,
            Self::S2 => 2,
            Self::S4 => 4,
            Self::S8 => 8,
            Self::S16 => 16,
            Self::S32 => 32,
            Self::S64 => 64,
        }
    }
}
