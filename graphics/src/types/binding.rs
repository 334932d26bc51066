//! Descriptor table entry types.

/// Kind of resource a descriptor table slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DcType {
    /// Uniform buffer.
    Uniform,
    /// Storage buffer.
    Storage,
    /// Sampled image without a sampler.
    Image,
    /// Sampled image combined with a sampler.
    ImgSampler,
    /// Standalone sampler.
    Sampler,
}

impl DcType {
    /// Returns true for buffer-backed slots.
    pub fn is_buffer(&self) -> bool {
        matches!(self, Self::Uniform | Self::Storage)
    }

    /// Returns true for image-backed slots.
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image | Self::ImgSampler)
    }
}

/// One binding slot of a descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DcEntry {
    /// Binding number, unique within the table.
    pub id: u32,
    /// Resource kind.
    pub kind: DcType,
    /// Number of array elements.
    pub count: u32,
}

impl DcEntry {
    /// Create a new entry.
    pub fn new(id: u32, kind: DcType, count: u32) -> Self {
        Self { id, kind, count }
    }
}
