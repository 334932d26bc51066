//! Attachment shapes and load/store operations.

use super::{Format, Samples};

/// What happens to an attachment's contents when a pass begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadOp {
    /// Keep the previous contents.
    #[default]
    Load,
    /// Clear to the target operation's clear value.
    Clear,
    /// Previous contents are undefined.
    DontCare,
}

/// What happens to an attachment's contents when a pass ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreOp {
    /// Write the results back to the image.
    #[default]
    Store,
    /// Results may be discarded.
    DontCare,
}

/// A load/store pair for one attachment (or one depth/stencil aspect).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AttachmentOp {
    pub load: LoadOp,
    pub store: StoreOp,
}

impl AttachmentOp {
    /// Load and store.
    pub const LOAD_STORE: Self = Self::new(LoadOp::Load, StoreOp::Store);
    /// Clear and store.
    pub const CLEAR_STORE: Self = Self::new(LoadOp::Clear, StoreOp::Store);
    /// Neither read nor written back.
    pub const DONT_CARE: Self = Self::new(LoadOp::DontCare, StoreOp::DontCare);

    /// Create a new load/store pair.
    pub const fn new(load: LoadOp, store: StoreOp) -> Self {
        Self { load, store }
    }
}

/// Format and sample count of one pass attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentDesc {
    /// Pixel format.
    pub format: Format,
    /// Sample count.
    pub samples: Samples,
}

impl AttachmentDesc {
    /// Create a new attachment descriptor.
    pub fn new(format: Format, samples: Samples) -> Self {
        Self { format, samples }
    }

    /// Create a single-sampled attachment descriptor.
    pub fn single(format: Format) -> Self {
        Self::new(format, Samples::S1)
    }
}
