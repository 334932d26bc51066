//! GPU buffer resource.

use std::sync::{Arc, Weak};

use crate::backend::{BufferHandle, GpuBackend};
use crate::device::GraphicsDevice;
use crate::error::{GraphicsError, check_range};
use crate::types::{BufferDescriptor, BufferUsage};

/// A host-visible GPU buffer.
///
/// Buffers are created by [`GraphicsDevice::create_buffer`] and are reference-counted.
/// They hold a weak reference back to their parent device and release their
/// backend memory on drop.
///
/// # Example
///
/// ```ignore
/// let buffer = device.create_buffer(&BufferDescriptor::new(1024, BufferUsage::VERTEX))?;
/// buffer.write(0, &vertices)?;
/// ```
pub struct Buffer {
    device: Weak<GraphicsDevice>,
    backend: Arc<dyn GpuBackend>,
    handle: BufferHandle,
    descriptor: BufferDescriptor,
}

impl Buffer {
    /// Create a new buffer (called by GraphicsDevice).
    pub(crate) fn new(
        device: &Arc<GraphicsDevice>,
        mut descriptor: BufferDescriptor,
    ) -> Result<Self, GraphicsError> {
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size must be greater than zero".to_string(),
            ));
        }
        descriptor.usage = descriptor.effective_usage();

        let backend = Arc::clone(device.backend());
        let handle = backend.create_buffer(&descriptor)?;
        Ok(Self {
            device: Arc::downgrade(device),
            backend,
            handle,
            descriptor,
        })
    }

    /// Copy `data` into the buffer at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::OutOfBounds`] if the write does not fit, in
    /// which case the buffer is untouched.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        check_range(offset, data.len() as u64, self.descriptor.size)?;
        self.backend.write_buffer(self.handle, offset, data)?;
        Ok(())
    }

    /// Read `size` bytes starting at `offset`.
    pub fn read(&self, offset: u64, size: u64) -> Result<Vec<u8>, GraphicsError> {
        check_range(offset, size, self.descriptor.size)?;
        Ok(self.backend.read_buffer(self.handle, offset, size)?)
    }

    /// Get the parent device, if it still exists.
    pub fn device(&self) -> Option<Arc<GraphicsDevice>> {
        self.device.upgrade()
    }

    /// Get the backend handle.
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    /// Get the buffer descriptor.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    /// Get the usage flags the buffer was created with.
    pub fn usage(&self) -> BufferUsage {
        self.descriptor.usage
    }

    /// Get the buffer label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    pub(crate) fn require_usage(&self, usage: BufferUsage, what: &str) -> Result<(), GraphicsError> {
        if self.descriptor.usage.contains(usage) {
            Ok(())
        } else {
            Err(GraphicsError::InvalidParameter(format!(
                "buffer {:?} used as {what} without {usage:?} usage",
                self.descriptor.label
            )))
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.backend.destroy_buffer(self.handle);
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.descriptor.size)
            .field("usage", &self.descriptor.usage)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

// Ensure Buffer is Send + Sync
static_assertions::assert_impl_all!(Buffer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_device;

    #[test]
    fn test_buffer_debug() {
        let (device, _backend) = test_device();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(1024, BufferUsage::VERTEX))
            .unwrap();
        let debug = format!("{:?}", buffer);
        assert!(debug.contains("Buffer"));
        assert!(debug.contains("1024"));
    }

    #[test]
    fn test_write_then_read() {
        let (device, _backend) = test_device();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::UNIFORM))
            .unwrap();
        buffer.write(4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(buffer.read(2, 6).unwrap(), vec![0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_write_out_of_bounds_leaves_contents() {
        let (device, backend) = test_device();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(8, BufferUsage::UNIFORM))
            .unwrap();
        buffer.write(0, &[7; 8]).unwrap();

        let result = buffer.write(6, &[1, 2, 3]);
        assert!(matches!(result, Err(GraphicsError::OutOfBounds { .. })));
        assert_eq!(backend.buffer_contents(buffer.handle()).unwrap(), vec![7; 8]);

        // Exactly filling the tail is fine.
        buffer.write(6, &[1, 2]).unwrap();
    }

    #[test]
    fn test_empty_usage_becomes_all() {
        let (device, _backend) = test_device();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(8, BufferUsage::empty()))
            .unwrap();
        assert_eq!(buffer.usage(), BufferUsage::all());
    }

    #[test]
    fn test_drop_releases_backend_buffer() {
        let (device, backend) = test_device();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(8, BufferUsage::VERTEX))
            .unwrap();
        assert_eq!(backend.live_count("buffer"), 1);
        drop(buffer);
        assert_eq!(backend.live_count("buffer"), 0);
    }
}
