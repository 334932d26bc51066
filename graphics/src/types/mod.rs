//! Common types and descriptors for graphics resources.
//!
//! This module contains format enums, usage flags, and descriptor structs
//! used throughout the graphics system.

mod attachment;
mod binding;
mod buffer;
mod common;
mod format;
mod image;
mod pipeline;
mod sampler;
mod shader;

pub use attachment::{AttachmentDesc, AttachmentOp, LoadOp, StoreOp};
pub use binding::{DcEntry, DcType};
pub use buffer::{BufferDescriptor, BufferUsage, IndexType};
pub use common::{
    ClearValue, DeviceLimits, Extent2d, Extent3d, Origin3d, PipelineStage, QueueCapabilities,
    ScissorRect, Viewport,
};
pub use format::{Aspect, Format, Samples};
pub use image::{
    ImageDescriptor, ImageDimension, ImageUsage, ImageViewDescriptor, ImageViewDimension,
};
pub use pipeline::{
    CullMode, PolygonMode, Topology, VertexAttribute, VertexInput, VertexStepMode, Winding,
};
pub use sampler::{AddressMode, CompareFunction, FilterMode, SamplerDescriptor};
pub use shader::{ShaderDescriptor, ShaderStage};
