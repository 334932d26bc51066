//! GPU sampler resource.

use std::sync::{Arc, Weak};

use crate::backend::{GpuBackend, SamplerHandle};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::SamplerDescriptor;

/// A GPU texture sampler.
///
/// Samplers are created by [`GraphicsDevice::create_sampler`] and are reference-counted.
/// They hold a weak reference back to their parent device.
///
/// # Example
///
/// ```ignore
/// let sampler = device.create_sampler(&SamplerDescriptor::linear())?;
/// ```
pub struct Sampler {
    device: Weak<GraphicsDevice>,
    backend: Arc<dyn GpuBackend>,
    handle: SamplerHandle,
    descriptor: SamplerDescriptor,
}

impl Sampler {
    /// Create a new sampler (called by GraphicsDevice).
    pub(crate) fn new(
        device: &Arc<GraphicsDevice>,
        descriptor: SamplerDescriptor,
    ) -> Result<Self, GraphicsError> {
        if descriptor.lod_min_clamp < 0.0 || descriptor.lod_max_clamp < descriptor.lod_min_clamp {
            return Err(GraphicsError::InvalidParameter(format!(
                "invalid sampler lod clamp {}..{}",
                descriptor.lod_min_clamp, descriptor.lod_max_clamp
            )));
        }
        let backend = Arc::clone(device.backend());
        let handle = backend.create_sampler(&descriptor)?;
        log::trace!("GraphicsDevice: created sampler {:?}", descriptor.label);
        Ok(Self {
            device: Arc::downgrade(device),
            backend,
            handle,
            descriptor,
        })
    }

    /// Get the parent device, if it still exists.
    pub fn device(&self) -> Option<Arc<GraphicsDevice>> {
        self.device.upgrade()
    }

    /// Get the backend handle.
    pub fn handle(&self) -> SamplerHandle {
        self.handle
    }

    /// Get the sampler descriptor.
    pub fn descriptor(&self) -> &SamplerDescriptor {
        &self.descriptor
    }

    /// Get the sampler label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.backend.destroy_sampler(self.handle);
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("mag_filter", &self.descriptor.mag_filter)
            .field("min_filter", &self.descriptor.min_filter)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

// Ensure Sampler is Send + Sync
static_assertions::assert_impl_all!(Sampler: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_device;

    #[test]
    fn test_sampler_debug() {
        let (device, _backend) = test_device();
        let sampler = device
            .create_sampler(&SamplerDescriptor::linear().with_label("linear"))
            .unwrap();
        let debug = format!("{:?}", sampler);
        assert!(debug.contains("Sampler"));
        assert!(debug.contains("Linear"));
        assert_eq!(sampler.label(), Some("linear"));
    }

    #[test]
    fn test_rejects_inverted_lod_clamp() {
        let (device, backend) = test_device();
        let result = device.create_sampler(&SamplerDescriptor::new().with_lod_clamp(4.0, 1.0));
        assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
        assert_eq!(backend.live_count("sampler"), 0);
    }
}
