//! GPU backend abstraction layer.
//!
//! The front end (device, queue, passes, encoders) talks to the GPU only
//! through the [`GpuBackend`] trait: a narrow create/destroy/record/submit
//! interface over opaque handles.
//!
//! # Available Backends
//!
//! - `dummy` (default): Inspectable no-op backend for testing and development
//! - `vulkan-backend`: Native Vulkan backend using ash
//!
//! # Handles
//!
//! Every backend object is named by a `u64` newtype. `0` is the null handle
//! and is never returned by a successful create call.

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub mod dummy;
mod error;

use std::sync::Arc;

use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::device::{BackendType, DeviceParameters};
use crate::types::{
    AttachmentDesc, AttachmentOp, Aspect, BufferDescriptor, ClearValue, CullMode, DcEntry,
    DcType, DeviceLimits, Extent2d, Extent3d, Format, ImageDescriptor, ImageViewDimension,
    IndexType, Origin3d, PipelineStage, PolygonMode, QueueCapabilities, Samples,
    SamplerDescriptor, ScissorRect, ShaderDescriptor, ShaderStage, Topology, VertexInput,
    Viewport, Winding,
};

pub use dummy::{DummyBackend, DummyFailure, DummyStats, RecordedCommand};
pub use error::BackendError;

macro_rules! define_handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
            pub struct $name(pub u64);

            impl $name {
                /// The null handle.
                pub const NULL: Self = Self(0);

                /// Returns true for the null handle.
                pub fn is_null(&self) -> bool {
                    self.0 == 0
                }
            }
        )*
    };
}

define_handle!(
    /// Handle to a backend buffer.
    BufferHandle,
    /// Handle to a backend image.
    ImageHandle,
    /// Handle to a backend image view.
    ImageViewHandle,
    /// Handle to a backend sampler.
    SamplerHandle,
    /// Handle to a backend shader module.
    ShaderHandle,
    /// Handle to a descriptor set layout.
    DescriptorLayoutHandle,
    /// Handle to a descriptor pool.
    DescriptorPoolHandle,
    /// Handle to a descriptor set.
    DescriptorSetHandle,
    /// Handle to a render pass.
    RenderPassHandle,
    /// Handle to a framebuffer.
    FramebufferHandle,
    /// Handle to a pipeline layout.
    PipelineLayoutHandle,
    /// Handle to a graphics or compute pipeline.
    PipelineHandle,
    /// Handle to a command pool.
    CommandPoolHandle,
    /// Handle to a primary command buffer.
    CommandBufferHandle,
    /// Handle to a binary semaphore.
    SemaphoreHandle,
    /// Handle to a swapchain.
    SwapchainHandle,
);

// ============================================================================
// Creation Infos
// ============================================================================

/// Parameters of an image view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageViewInfo {
    pub image: ImageHandle,
    pub format: Format,
    pub dimension: ImageViewDimension,
    pub aspect: Aspect,
    pub base_level: u32,
    pub levels: u32,
    pub base_layer: u32,
    pub layers: u32,
}

/// Depth/stencil attachment of a render pass, with per-aspect operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilInfo {
    pub desc: AttachmentDesc,
    pub depth: AttachmentOp,
    pub stencil: AttachmentOp,
}

/// Attachment shape and operations of a render pass.
///
/// Attachments are numbered colors first, then resolves, then depth/stencil.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderPassInfo {
    pub colors: Vec<(AttachmentDesc, AttachmentOp)>,
    pub resolves: Vec<AttachmentDesc>,
    pub depth_stencil: Option<DepthStencilInfo>,
}

/// Parameters of a framebuffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FramebufferInfo {
    pub render_pass: RenderPassHandle,
    pub attachments: Vec<ImageViewHandle>,
    pub extent: Extent2d,
    pub layers: u32,
}

/// Render pass begin parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassBeginInfo {
    pub render_pass: RenderPassHandle,
    pub framebuffer: FramebufferHandle,
    pub extent: Extent2d,
    /// One value per attachment, in attachment order. `ClearValue::None` for
    /// attachments that are not cleared.
    pub clear_values: Vec<ClearValue>,
}

/// A shader stage inside a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderStageInfo {
    pub shader: ShaderHandle,
    pub stage: ShaderStage,
    pub entry_point: String,
}

/// Parameters of a graphics pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphicsPipelineInfo {
    pub layout: PipelineLayoutHandle,
    pub render_pass: RenderPassHandle,
    pub stages: Vec<ShaderStageInfo>,
    pub vertex_inputs: Vec<VertexInput>,
    pub topology: Topology,
    pub polygon_mode: PolygonMode,
    pub cull_mode: CullMode,
    pub winding: Winding,
    pub color_count: u32,
    pub samples: Samples,
    pub depth_stencil: Option<Format>,
}

/// Parameters of a compute pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComputePipelineInfo {
    pub layout: PipelineLayoutHandle,
    pub stage: ShaderStageInfo,
}

/// A resource written into a descriptor set slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorResource {
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    },
    Image {
        view: ImageViewHandle,
        sampler: Option<SamplerHandle>,
    },
    Sampler(SamplerHandle),
}

/// One descriptor write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorWrite {
    pub set: DescriptorSetHandle,
    pub binding: u32,
    pub element: u32,
    pub kind: DcType,
    pub resource: DescriptorResource,
}

/// A buffer to buffer copy region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

/// One side of an image copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageLocation {
    pub image: ImageHandle,
    pub aspect: Aspect,
    pub level: u32,
    pub base_layer: u32,
    pub origin: Origin3d,
}

/// An image to image copy region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageCopy {
    pub src: ImageLocation,
    pub dst: ImageLocation,
    pub extent: Extent3d,
    pub layers: u32,
}

/// A buffer to image copy region. Buffer rows are tightly packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferImageCopy {
    pub buffer: BufferHandle,
    pub buffer_offset: u64,
    pub dst: ImageLocation,
    pub extent: Extent3d,
    pub layers: u32,
}

/// One batch of a queue submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitBatch {
    pub command_buffers: Vec<CommandBufferHandle>,
    pub wait: Vec<(SemaphoreHandle, PipelineStage)>,
    pub signal: Vec<SemaphoreHandle>,
}

/// Parameters of a swapchain.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainInfo {
    pub display: RawDisplayHandle,
    pub window: RawWindowHandle,
    pub extent: Extent2d,
    pub min_images: u32,
}

/// A created swapchain and the images it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainImages {
    pub swapchain: SwapchainHandle,
    pub format: Format,
    pub extent: Extent2d,
    pub images: Vec<ImageHandle>,
}

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready. The semaphore is signaled once it can be rendered to.
    Ready(u32),
    /// A non-blocking acquire found no image available.
    NotReady,
    /// The swapchain no longer matches its surface.
    OutOfDate,
}

// ============================================================================
// Backend Trait
// ============================================================================

/// GPU backend trait for abstracting different GPU APIs.
///
/// All calls are synchronous. Command recording calls take the command buffer
/// they record into; the caller guarantees exclusive access to it.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Limits that front-end validation checks against.
    fn limits(&self) -> DeviceLimits;

    /// Capabilities of the queue used for submission.
    fn queue_capabilities(&self) -> QueueCapabilities;

    // --- Resources ---

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle, BackendError>;
    fn destroy_buffer(&self, buffer: BufferHandle);

    /// Write bytes into a host-visible buffer.
    fn write_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError>;

    /// Read bytes back from a host-visible buffer.
    fn read_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, BackendError>;

    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<ImageHandle, BackendError>;
    fn destroy_image(&self, image: ImageHandle);

    fn create_image_view(&self, info: &ImageViewInfo) -> Result<ImageViewHandle, BackendError>;
    fn destroy_image_view(&self, view: ImageViewHandle);

    fn create_sampler(
        &self,
        descriptor: &SamplerDescriptor,
    ) -> Result<SamplerHandle, BackendError>;
    fn destroy_sampler(&self, sampler: SamplerHandle);

    fn create_shader(&self, descriptor: &ShaderDescriptor) -> Result<ShaderHandle, BackendError>;
    fn destroy_shader(&self, shader: ShaderHandle);

    // --- Descriptor tables ---

    fn create_descriptor_layout(
        &self,
        entries: &[DcEntry],
    ) -> Result<DescriptorLayoutHandle, BackendError>;
    fn destroy_descriptor_layout(&self, layout: DescriptorLayoutHandle);

    /// Create a pool holding `count` sets of `layout` and allocate them.
    fn allocate_descriptor_sets(
        &self,
        layout: DescriptorLayoutHandle,
        entries: &[DcEntry],
        count: u32,
    ) -> Result<(DescriptorPoolHandle, Vec<DescriptorSetHandle>), BackendError>;

    /// Destroy a descriptor pool and every set allocated from it.
    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle);

    fn write_descriptor(&self, write: &DescriptorWrite) -> Result<(), BackendError>;

    // --- Passes and pipelines ---

    fn create_render_pass(&self, info: &RenderPassInfo) -> Result<RenderPassHandle, BackendError>;
    fn destroy_render_pass(&self, render_pass: RenderPassHandle);

    fn create_framebuffer(
        &self,
        info: &FramebufferInfo,
    ) -> Result<FramebufferHandle, BackendError>;
    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle);

    fn create_pipeline_layout(
        &self,
        layouts: &[DescriptorLayoutHandle],
    ) -> Result<PipelineLayoutHandle, BackendError>;
    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle);

    fn create_graphics_pipeline(
        &self,
        info: &GraphicsPipelineInfo,
    ) -> Result<PipelineHandle, BackendError>;
    fn create_compute_pipeline(
        &self,
        info: &ComputePipelineInfo,
    ) -> Result<PipelineHandle, BackendError>;
    fn destroy_pipeline(&self, pipeline: PipelineHandle);

    // --- Command pools and buffers ---

    /// Create a command pool whose buffers can be reset individually.
    fn create_command_pool(&self) -> Result<CommandPoolHandle, BackendError>;
    /// Destroy a pool and free every buffer allocated from it.
    fn destroy_command_pool(&self, pool: CommandPoolHandle);
    fn allocate_command_buffer(
        &self,
        pool: CommandPoolHandle,
    ) -> Result<CommandBufferHandle, BackendError>;

    /// Begin one-time-submit recording.
    fn begin_command_buffer(&self, cmd: CommandBufferHandle) -> Result<(), BackendError>;
    fn end_command_buffer(&self, cmd: CommandBufferHandle) -> Result<(), BackendError>;
    fn reset_command_buffer(&self, cmd: CommandBufferHandle) -> Result<(), BackendError>;

    // --- Recording ---

    fn cmd_begin_render_pass(&self, cmd: CommandBufferHandle, info: &RenderPassBeginInfo);
    fn cmd_end_render_pass(&self, cmd: CommandBufferHandle);
    fn cmd_set_viewport(&self, cmd: CommandBufferHandle, viewport: &Viewport);
    fn cmd_set_scissor(&self, cmd: CommandBufferHandle, scissor: &ScissorRect);
    fn cmd_bind_graphics_pipeline(&self, cmd: CommandBufferHandle, pipeline: PipelineHandle);
    fn cmd_bind_compute_pipeline(&self, cmd: CommandBufferHandle, pipeline: PipelineHandle);
    /// Bind consecutive descriptor sets starting at `first`.
    fn cmd_bind_descriptor_sets(
        &self,
        cmd: CommandBufferHandle,
        compute: bool,
        layout: PipelineLayoutHandle,
        first: u32,
        sets: &[DescriptorSetHandle],
    );
    fn cmd_bind_vertex_buffer(
        &self,
        cmd: CommandBufferHandle,
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
    );
    fn cmd_bind_index_buffer(
        &self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
        index_type: IndexType,
    );
    fn cmd_draw(
        &self,
        cmd: CommandBufferHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    fn cmd_draw_indexed(
        &self,
        cmd: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn cmd_dispatch(&self, cmd: CommandBufferHandle, x: u32, y: u32, z: u32);
    /// Full memory barrier, all writes made visible to all later accesses.
    fn cmd_memory_barrier(&self, cmd: CommandBufferHandle, by_region: bool);
    fn cmd_copy_buffer(
        &self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        region: &BufferCopy,
    );
    fn cmd_copy_image(&self, cmd: CommandBufferHandle, region: &ImageCopy);
    fn cmd_copy_buffer_to_image(&self, cmd: CommandBufferHandle, region: &BufferImageCopy);

    // --- Submission ---

    fn create_semaphore(&self) -> Result<SemaphoreHandle, BackendError>;
    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);

    /// Submit all batches in one call.
    fn queue_submit(&self, batches: &[SubmitBatch]) -> Result<(), BackendError>;

    /// Block until the queue has drained.
    fn queue_wait_idle(&self) -> Result<(), BackendError>;

    // --- Presentation ---

    fn create_swapchain(&self, info: &SwapchainInfo) -> Result<SwapchainImages, BackendError>;
    fn destroy_swapchain(&self, swapchain: SwapchainHandle);
    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
        non_blocking: bool,
    ) -> Result<AcquireOutcome, BackendError>;
    /// Present an image. Returns false when the swapchain is out of date.
    fn present(&self, swapchain: SwapchainHandle, index: u32) -> Result<bool, BackendError>;
}

/// Selects and creates the backend requested by `params`.
///
/// `BackendType::Auto` prefers Vulkan and falls back to the dummy backend.
pub fn create_backend(params: &DeviceParameters) -> Result<Arc<dyn GpuBackend>, BackendError> {
    match params.backend {
        BackendType::Dummy => {
            log::info!("Using dummy backend");
            Ok(Arc::new(DummyBackend::new()))
        }
        #[cfg(feature = "vulkan-backend")]
        BackendType::Vulkan => {
            let backend = vulkan::VulkanBackend::with_params(params)?;
            log::info!("Using Vulkan backend (ash)");
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "vulkan-backend"))]
        BackendType::Vulkan => Err(BackendError::FeatureNotSupported(
            "crate built without the vulkan-backend feature".to_string(),
        )),
        BackendType::Auto => {
            #[cfg(feature = "vulkan-backend")]
            {
                match vulkan::VulkanBackend::with_params(params) {
                    Ok(backend) => {
                        log::info!("Using Vulkan backend (ash)");
                        return Ok(Arc::new(backend));
                    }
                    Err(e) => {
                        log::warn!("Failed to create Vulkan backend: {}", e);
                    }
                }
            }

            log::info!("Using dummy backend");
            Ok(Arc::new(DummyBackend::new()))
        }
    }
}

/// Check if a real GPU backend is available.
pub fn has_gpu_backend() -> bool {
    cfg!(feature = "vulkan-backend")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handles() {
        assert!(BufferHandle::NULL.is_null());
        assert!(!RenderPassHandle(7).is_null());
        assert_eq!(CommandBufferHandle::default(), CommandBufferHandle::NULL);
    }

    #[test]
    fn test_create_dummy_backend() {
        let params = DeviceParameters::new().with_backend(BackendType::Dummy);
        let backend = create_backend(&params).unwrap();
        assert_eq!(backend.name(), "Dummy");
    }
}
