//! # cmdgfx
//!
//! Backend-agnostic graphics command layer: command buffers and queue
//! submission, render pass caching, and validated command encoding over an
//! explicit GPU backend.
//!
//! ## Overview
//!
//! - [`GraphicsDevice`] - Root object, creates everything else
//! - [`Queue`] / [`CmdBuffer`] - Recording, batching and synchronous submission
//! - [`Pass`] / [`Target`] - Attachment shapes, framebuffers and a render pass cache
//! - [`GraphicsEncoder`], [`ComputeEncoder`], [`TransferEncoder`] - Replayable command lists
//! - [`GpuBackend`] - Trait for backend implementations: Vulkan and Dummy (for testing)
//!
//! ## Example
//!
//! ```ignore
//! use cmdgfx::*;
//!
//! let device = GraphicsDevice::new()?;
//! let pass = device.create_pass(&[AttachmentDesc::single(Format::Rgba8Unorm)], &[], None)?;
//! let target = pass.target(Extent2d::new(64, 64), 1, &[AttachImg::new(image)], &[], None)?;
//!
//! let mut encoder = GraphicsEncoder::new();
//! encoder
//!     .set_viewport(0, Viewport::from_dimensions(64, 64))
//!     .set_scissor(0, ScissorRect::from_dimensions(64, 64))
//!     .set_target(&target, TargetOp::clear(1, [0.0, 0.0, 0.0, 1.0]))
//!     .set_state(&state)
//!     .set_vertex_buffer(0, &vertices, 0)
//!     .draw(3, 1, 0, 0);
//!
//! let queue = device.default_queue();
//! let mut cmd = queue.cmd_buffer()?;
//! cmd.encode(&encoder)?;
//! cmd.enqueue()?;
//! queue.submit()?;
//! ```

pub mod backend;
pub mod device;
pub mod encoder;
pub mod error;
pub mod pass;
pub mod queue;
pub mod resources;
pub mod state;
pub mod types;
pub mod wsi;

// Re-export main types for convenience
pub use backend::{BackendError, DummyBackend, GpuBackend};
pub use device::{BackendType, DeviceParameters, GraphicsDevice};
pub use encoder::{
    ComputeEncoder, EncodeStatus, EncoderKind, EncoderRef, GraphicsEncoder, ImageRegion,
    TransferEncoder,
};
pub use error::GraphicsError;
pub use pass::{AttachImg, ColorOp, Pass, Target, TargetOp};
pub use queue::{CmdBuffer, CmdBufferState, CompletionHandler, PriorityCmd, Queue, Semaphore};
pub use resources::{Buffer, DcTable, Image, ImageView, Sampler, Shader};
pub use state::{ComputeState, ComputeStateConfig, GraphicsState, GraphicsStateConfig};
pub use types::*;
pub use wsi::Wsi;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_dummy_device() {
        let device =
            GraphicsDevice::with_parameters(DeviceParameters::new().with_backend(BackendType::Dummy))
                .unwrap();
        assert_eq!(device.backend().name(), "Dummy");
    }
}
