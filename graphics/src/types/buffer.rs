//! Buffer types and descriptors.

use bitflags::bitflags;

bitflags! {
    /// Usage flags for buffers.
    ///
    /// An empty set is treated as "every usage" when the buffer is created.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be used as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 1;
        /// Buffer can be used as a uniform buffer.
        const UNIFORM = 1 << 2;
        /// Buffer can be used as a storage buffer.
        const STORAGE = 1 << 3;
        /// Buffer can be copied from.
        const COPY_SRC = 1 << 4;
        /// Buffer can be copied to.
        const COPY_DST = 1 << 5;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Usage flags.
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Usage flags that the buffer is actually created with.
    pub fn effective_usage(&self) -> BufferUsage {
        if self.usage.is_empty() {
            BufferUsage::all()
        } else {
            self.usage
        }
    }
}

/// Index element type for indexed draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexType {
    /// 16-bit unsigned indices.
    U16,
    /// 32-bit unsigned indices.
    #[default]
    U32,
}

impl IndexType {
    /// Size of one index in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_usage_means_all() {
        let desc = BufferDescriptor::new(16, BufferUsage::empty());
        assert_eq!(desc.effective_usage(), BufferUsage::all());

        let desc = BufferDescriptor::new(16, BufferUsage::VERTEX | BufferUsage::UNIFORM);
        assert_eq!(desc.effective_usage(), BufferUsage::VERTEX | BufferUsage::UNIFORM);
    }
}
