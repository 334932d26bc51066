//! GPU resources.
//!
//! This module contains the GPU resource types that are created by [`GraphicsDevice`]:
//! - [`Buffer`] - Host-visible GPU memory buffer
//! - [`Image`] / [`ImageView`] - GPU image and level/layer projections of it
//! - [`Sampler`] - Texture sampler
//! - [`Shader`] - SPIR-V shader module
//! - [`DcTable`] - Descriptor table with per-frame allocations
//!
//! Resources are reference-counted with [`Arc`] and can be shared across threads.
//! Each resource releases its backend object exactly once, on drop.
//!
//! [`GraphicsDevice`]: crate::GraphicsDevice
//! [`Arc`]: std::sync::Arc

mod buffer;
mod dc_table;
mod image;
mod sampler;
mod shader;

pub use buffer::Buffer;
pub use dc_table::DcTable;
pub use image::{Image, ImageView};
pub use sampler::Sampler;
pub use shader::{SPIRV_MAGIC, Shader};
