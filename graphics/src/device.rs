//! Graphics device.
//!
//! The [`GraphicsDevice`] is the root of the object graph: it owns the backend
//! and the default [`Queue`], and creates every other object.

use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::backend::{self, GpuBackend};
use crate::error::GraphicsError;
use crate::pass::Pass;
use crate::queue::{Queue, Semaphore};
use crate::resources::{Buffer, DcTable, Image, Sampler, Shader};
use crate::state::{ComputeState, ComputeStateConfig, GraphicsState, GraphicsStateConfig};
use crate::types::{
    AttachmentDesc, BufferDescriptor, DcEntry, DeviceLimits, Extent2d, ImageDescriptor,
    QueueCapabilities, SamplerDescriptor, ShaderDescriptor,
};
use crate::wsi::Wsi;

/// Render pass cache slots per [`Pass`] unless configured otherwise.
pub const DEFAULT_RENDER_PASS_CACHE_CAPACITY: usize = 4;

/// Which backend a device is created on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendType {
    /// Vulkan when available, otherwise the dummy backend.
    #[default]
    Auto,
    /// The inspectable no-op backend.
    Dummy,
    /// Native Vulkan via ash.
    Vulkan,
}

/// Parameters for creating a [`GraphicsDevice`].
///
/// # Example
///
/// ```ignore
/// let params = DeviceParameters::new()
///     .with_backend(BackendType::Vulkan)
///     .with_validation(true)
///     .with_render_pass_cache_capacity(8);
/// let device = GraphicsDevice::with_parameters(params)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceParameters {
    /// Backend to create.
    pub backend: BackendType,
    /// Enable backend validation layers.
    pub validation: bool,
    /// Render pass cache slots per pass.
    pub render_pass_cache_capacity: usize,
    /// Debug label.
    pub label: Option<String>,
}

impl DeviceParameters {
    /// Create parameters with defaults: automatic backend, validation in
    /// debug builds, four render pass cache slots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend.
    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the number of render pass cache slots per pass. Clamped to at least one.
    pub fn with_render_pass_cache_capacity(mut self, capacity: usize) -> Self {
        self.render_pass_cache_capacity = capacity.max(1);
        self
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl Default for DeviceParameters {
    fn default() -> Self {
        Self {
            backend: BackendType::Auto,
            validation: cfg!(debug_assertions),
            render_pass_cache_capacity: DEFAULT_RENDER_PASS_CACHE_CAPACITY,
            label: None,
        }
    }
}

/// A graphics device for creating GPU objects.
///
/// # Thread Safety
///
/// `GraphicsDevice` is `Send + Sync`. Recording and submission on its queue
/// are expected to happen from one thread at a time.
///
/// # Example
///
/// ```ignore
/// let device = GraphicsDevice::new()?;
/// let buffer = device.create_buffer(&BufferDescriptor::new(1024, BufferUsage::VERTEX))?;
/// let queue = device.default_queue();
/// let mut cmd = queue.cmd_buffer()?;
/// cmd.encode(&encoder)?;
/// cmd.enqueue()?;
/// queue.submit()?;
/// ```
pub struct GraphicsDevice {
    backend: Arc<dyn GpuBackend>,
    parameters: DeviceParameters,
    limits: DeviceLimits,
    queue: Queue,
}

impl GraphicsDevice {
    /// Create a device with default parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if no backend can be initialized.
    pub fn new() -> Result<Arc<Self>, GraphicsError> {
        Self::with_parameters(DeviceParameters::default())
    }

    /// Create a device with explicit parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested backend cannot be initialized.
    pub fn with_parameters(parameters: DeviceParameters) -> Result<Arc<Self>, GraphicsError> {
        let backend = backend::create_backend(&parameters)?;
        Ok(Self::with_backend(backend, parameters))
    }

    /// Create a device on an existing backend.
    pub fn with_backend(backend: Arc<dyn GpuBackend>, parameters: DeviceParameters) -> Arc<Self> {
        let limits = backend.limits();
        let queue = Queue::new(Arc::clone(&backend), backend.queue_capabilities());
        log::info!(
            "Created GraphicsDevice {:?} on {} backend",
            parameters.label,
            backend.name()
        );
        Arc::new(Self {
            backend,
            parameters,
            limits,
            queue,
        })
    }

    /// Get the GPU backend.
    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// Get the parameters the device was created with.
    pub fn parameters(&self) -> &DeviceParameters {
        &self.parameters
    }

    /// Get the backend limits.
    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    /// Get the queue every device has.
    pub fn default_queue(&self) -> &Queue {
        &self.queue
    }

    /// Get a queue supporting all of `capabilities`, if there is one.
    pub fn queue(&self, capabilities: QueueCapabilities) -> Option<&Queue> {
        self.queue
            .capabilities()
            .contains(capabilities)
            .then_some(&self.queue)
    }

    /// Create a host-visible buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the size is zero or allocation fails.
    pub fn create_buffer(
        self: &Arc<Self>,
        descriptor: &BufferDescriptor,
    ) -> Result<Arc<Buffer>, GraphicsError> {
        let buffer = Arc::new(Buffer::new(self, descriptor.clone())?);
        log::trace!(
            "GraphicsDevice: created buffer {:?}, size={}",
            descriptor.label,
            descriptor.size
        );
        Ok(buffer)
    }

    /// Create an image.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor is invalid or exceeds device limits.
    pub fn create_image(
        self: &Arc<Self>,
        descriptor: &ImageDescriptor,
    ) -> Result<Arc<Image>, GraphicsError> {
        let image = Arc::new(Image::new(self, descriptor.clone())?);
        log::trace!(
            "GraphicsDevice: created image {:?}, size={}x{}x{}",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.size.depth
        );
        Ok(image)
    }

    /// Create a sampler.
    pub fn create_sampler(
        self: &Arc<Self>,
        descriptor: &SamplerDescriptor,
    ) -> Result<Arc<Sampler>, GraphicsError> {
        Ok(Arc::new(Sampler::new(self, descriptor.clone())?))
    }

    /// Create a shader module from SPIR-V.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytecode is empty, not word aligned, or lacks
    /// the SPIR-V magic number.
    pub fn create_shader(
        self: &Arc<Self>,
        descriptor: &ShaderDescriptor,
    ) -> Result<Arc<Shader>, GraphicsError> {
        Ok(Arc::new(Shader::new(self, descriptor.clone())?))
    }

    /// Create a descriptor table layout. Call [`DcTable::allocate`] before writing.
    pub fn create_dc_table(
        self: &Arc<Self>,
        entries: &[DcEntry],
    ) -> Result<Arc<DcTable>, GraphicsError> {
        Ok(Arc::new(DcTable::new(self, entries.to_vec())?))
    }

    /// Create a pass describing the shape of a render target.
    ///
    /// # Errors
    ///
    /// Returns an error if attachment formats have the wrong aspect or the
    /// resolve list does not mirror the color list.
    pub fn create_pass(
        self: &Arc<Self>,
        colors: &[AttachmentDesc],
        resolves: &[AttachmentDesc],
        depth_stencil: Option<AttachmentDesc>,
    ) -> Result<Arc<Pass>, GraphicsError> {
        let pass = Arc::new(Pass::new(
            self,
            colors.to_vec(),
            resolves.to_vec(),
            depth_stencil,
        )?);
        log::debug!(
            "GraphicsDevice: created pass with {} colors, {} resolves, depth/stencil: {}",
            colors.len(),
            resolves.len(),
            depth_stencil.is_some()
        );
        Ok(pass)
    }

    /// Create a graphics pipeline state.
    pub fn create_graphics_state(
        self: &Arc<Self>,
        config: GraphicsStateConfig,
    ) -> Result<Arc<GraphicsState>, GraphicsError> {
        Ok(Arc::new(GraphicsState::new(self, config)?))
    }

    /// Create a compute pipeline state.
    pub fn create_compute_state(
        self: &Arc<Self>,
        config: ComputeStateConfig,
    ) -> Result<Arc<ComputeState>, GraphicsError> {
        Ok(Arc::new(ComputeState::new(self, config)?))
    }

    /// Create a binary semaphore for cross-queue waits.
    pub fn create_semaphore(self: &Arc<Self>) -> Result<Arc<Semaphore>, GraphicsError> {
        Ok(Arc::new(Semaphore::new(Arc::clone(&self.backend))?))
    }

    /// Create a window system integration (swapchain) for a window.
    ///
    /// # Errors
    ///
    /// Returns an error if the window handles are unavailable or the backend
    /// cannot create a swapchain for them.
    pub fn create_wsi<W>(self: &Arc<Self>, window: &W, extent: Extent2d) -> Result<Wsi, GraphicsError>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let display = window.display_handle().map_err(|e| {
            GraphicsError::InvalidParameter(format!("failed to get display handle: {e}"))
        })?;
        let window = window.window_handle().map_err(|e| {
            GraphicsError::InvalidParameter(format!("failed to get window handle: {e}"))
        })?;
        Wsi::new(self, display.as_raw(), window.as_raw(), extent)
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("backend", &self.backend.name())
            .field("label", &self.parameters.label)
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);

/// A device on a fresh dummy backend, plus the backend for inspection.
#[cfg(test)]
pub(crate) fn test_device() -> (Arc<GraphicsDevice>, Arc<crate::backend::DummyBackend>) {
    let backend = Arc::new(crate::backend::DummyBackend::new());
    let device = GraphicsDevice::with_backend(
        Arc::clone(&backend) as Arc<dyn GpuBackend>,
        DeviceParameters::new().with_backend(BackendType::Dummy),
    );
    (device, backend)
}
