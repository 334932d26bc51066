//! Image types and descriptors.

use bitflags::bitflags;

use super::{Extent3d, Format, Samples};

/// Dimensionality of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageDimension {
    D1,
    #[default]
    D2,
    D3,
}

bitflags! {
    /// Usage flags for images.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        /// Image can be copied from.
        const COPY_SRC = 1 << 0;
        /// Image can be copied to.
        const COPY_DST = 1 << 1;
        /// Image can be sampled in a shader.
        const SAMPLED = 1 << 2;
        /// Image can be used as a storage image.
        const STORAGE = 1 << 3;
        /// Image can be used as a pass attachment.
        const ATTACHMENT = 1 << 4;
    }
}

impl Default for ImageUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Descriptor for creating an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageDescriptor {
    /// Debug label for the image.
    pub label: Option<String>,
    /// Dimensionality.
    pub dimension: ImageDimension,
    /// Pixel format.
    pub format: Format,
    /// Size of level 0.
    pub size: Extent3d,
    /// Mip level count.
    pub levels: u32,
    /// Array layer count.
    pub layers: u32,
    /// Sample count.
    pub samples: Samples,
    /// Usage flags.
    pub usage: ImageUsage,
}

impl ImageDescriptor {
    /// Create a new 2D image descriptor.
    pub fn new_2d(width: u32, height: u32, format: Format, usage: ImageUsage) -> Self {
        Self {
            label: None,
            dimension: ImageDimension::D2,
            format,
            size: Extent3d::new_2d(width, height),
            levels: 1,
            layers: 1,
            samples: Samples::S1,
            usage,
        }
    }

    /// Create a new 3D image descriptor.
    pub fn new_3d(extent: Extent3d, format: Format, usage: ImageUsage) -> Self {
        Self {
            dimension: ImageDimension::D3,
            size: extent,
            ..Self::new_2d(extent.width, extent.height, format, usage)
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the mip level count.
    pub fn with_levels(mut self, levels: u32) -> Self {
        self.levels = levels;
        self
    }

    /// Set the array layer count.
    pub fn with_layers(mut self, layers: u32) -> Self {
        self.layers = layers;
        self
    }

    /// Set the sample count.
    pub fn with_samples(mut self, samples: Samples) -> Self {
        self.samples = samples;
        self
    }

    /// Number of levels in a full mip chain for this size.
    pub fn max_levels(&self) -> u32 {
        let largest = self.size.width.max(self.size.height).max(self.size.depth);
        u32::BITS - largest.leading_zeros()
    }
}

impl Default for ImageDescriptor {
    fn default() -> Self {
        Self::new_2d(0, 0, Format::Undefined, ImageUsage::empty())
    }
}

/// Dimensionality of an image view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageViewDimension {
    D1,
    D1Array,
    D2,
    D2Array,
    D3,
}

/// Level and layer range viewed by an image view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageViewDescriptor {
    /// First mip level.
    pub base_level: u32,
    /// Number of mip levels.
    pub levels: u32,
    /// First array layer.
    pub base_layer: u32,
    /// Number of array layers.
    pub layers: u32,
}

impl ImageViewDescriptor {
    /// View a single level and a layer range.
    pub fn new(level: u32, base_layer: u32, layers: u32) -> Self {
        Self {
            base_level: level,
            levels: 1,
            base_layer,
            layers,
        }
    }

    /// Set the level range.
    pub fn with_levels(mut self, base_level: u32, levels: u32) -> Self {
        self.base_level = base_level;
        self.levels = levels;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_levels() {
        let desc = ImageDescriptor::new_2d(64, 64, Format::Rgba8Unorm, ImageUsage::SAMPLED);
        assert_eq!(desc.max_levels(), 7);

        let desc = ImageDescriptor::new_2d(1, 1, Format::Rgba8Unorm, ImageUsage::SAMPLED);
        assert_eq!(desc.max_levels(), 1);

        let desc = ImageDescriptor::new_2d(100, 3, Format::R8Unorm, ImageUsage::SAMPLED);
        assert_eq!(desc.max_levels(), 7);
    }
}
