//! Common utilities for integration tests.
//!
//! This module provides shared test infrastructure that can be reused
//! across different backend implementations.

use std::sync::Arc;

use cmdgfx::{
    AttachImg, AttachmentDesc, BackendType, Buffer, BufferDescriptor, BufferUsage,
    DeviceParameters, DummyBackend, Extent2d, Format, GpuBackend, GraphicsDevice, Image,
    ImageDescriptor, ImageUsage, Pass, Shader, ShaderDescriptor, ShaderStage, Target,
};
use cmdgfx::resources::SPIRV_MAGIC;

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Available GPU backends for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Dummy backend (no actual GPU operations).
    Dummy,
    /// Vulkan backend (native via ash).
    Vulkan,
}

impl Backend {
    /// Check if this backend is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Backend::Dummy => true,
            Backend::Vulkan => cfg!(feature = "vulkan-backend"),
        }
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// A device for one test, plus the dummy backend behind it when there is one.
pub struct TestContext {
    #[allow(dead_code)]
    pub backend: Backend,
    pub device: Arc<GraphicsDevice>,
    /// Set for [`Backend::Dummy`] so tests can inspect recorded calls.
    #[allow(dead_code)]
    pub dummy: Option<Arc<DummyBackend>>,
}

impl TestContext {
    /// Create a new test context for the given backend.
    ///
    /// Returns `None` if the backend is not compiled in or no device can be
    /// created on this machine.
    pub fn new(backend: Backend) -> Option<Self> {
        let _ = env_logger::builder().is_test(true).try_init();
        if !backend.is_available() {
            return None;
        }

        match backend {
            Backend::Dummy => {
                let dummy = Arc::new(DummyBackend::new());
                let device = GraphicsDevice::with_backend(
                    Arc::clone(&dummy) as Arc<dyn GpuBackend>,
                    DeviceParameters::new().with_backend(BackendType::Dummy),
                );
                Some(Self {
                    backend,
                    device,
                    dummy: Some(dummy),
                })
            }
            Backend::Vulkan => {
                let params = DeviceParameters::new()
                    .with_backend(BackendType::Vulkan)
                    .with_validation(false);
                let device = GraphicsDevice::with_parameters(params).ok()?;
                Some(Self {
                    backend,
                    device,
                    dummy: None,
                })
            }
        }
    }

    /// The dummy backend. Panics for other backends.
    #[allow(dead_code)]
    pub fn dummy(&self) -> &Arc<DummyBackend> {
        self.dummy.as_ref().expect("test requires the dummy backend")
    }

    /// Create a buffer of `size` bytes.
    pub fn create_buffer(&self, size: u64, usage: BufferUsage) -> Arc<Buffer> {
        self.device
            .create_buffer(&BufferDescriptor::new(size, usage))
            .expect("Failed to create buffer")
    }

    /// Create a 2D image.
    #[allow(dead_code)]
    pub fn create_image(&self, width: u32, height: u32, format: Format, usage: ImageUsage) -> Arc<Image> {
        self.device
            .create_image(&ImageDescriptor::new_2d(width, height, format, usage))
            .expect("Failed to create image")
    }

    /// A single color attachment pass and a target for it.
    #[allow(dead_code)]
    pub fn color_target(&self, width: u32, height: u32) -> (Arc<Pass>, Arc<Target>) {
        let pass = self
            .device
            .create_pass(&[AttachmentDesc::single(Format::Rgba8Unorm)], &[], None)
            .expect("Failed to create pass");
        let image = self.create_image(
            width,
            height,
            Format::Rgba8Unorm,
            ImageUsage::ATTACHMENT | ImageUsage::COPY_SRC,
        );
        let target = pass
            .target(Extent2d::new(width, height), 1, &[AttachImg::new(image)], &[], None)
            .expect("Failed to create target");
        (pass, target)
    }

    /// A shader module with a valid header and no body.
    ///
    /// Only the dummy backend accepts it.
    #[allow(dead_code)]
    pub fn stub_shader(&self, stage: ShaderStage) -> Arc<Shader> {
        let mut code = SPIRV_MAGIC.to_le_bytes().to_vec();
        code.resize(20, 0);
        self.device
            .create_shader(&ShaderDescriptor::new(stage, code))
            .expect("Failed to create shader")
    }
}

/// Generate a test pattern for buffer data.
pub fn generate_test_pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}
