//! Window system integration.
//!
//! A [`Wsi`] owns a swapchain for one window and exposes its images as
//! ordinary [`Image`]s that can be attached to a [`Target`](crate::Target).
//!
//! # Example
//!
//! ```ignore
//! let mut wsi = device.create_wsi(&window, Extent2d::new(1280, 720))?;
//! if let Some((image, index)) = wsi.next_image(false)? {
//!     // ... render into `image` ...
//!     device.default_queue().submit()?;
//!     wsi.present(index)?;
//! }
//! ```

use std::sync::Arc;

use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::backend::{AcquireOutcome, SwapchainHandle, SwapchainInfo};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::queue::Semaphore;
use crate::resources::Image;
use crate::types::{Extent2d, Format, PipelineStage};

/// Number of images requested from the presentation engine.
const MIN_IMAGES: u32 = 3;

/// A swapchain bound to a window.
pub struct Wsi {
    device: Arc<GraphicsDevice>,
    swapchain: SwapchainHandle,
    format: Format,
    extent: Extent2d,
    images: Vec<Arc<Image>>,
    /// One acquire semaphore per image, used round robin.
    acquire: Vec<Arc<Semaphore>>,
    next_semaphore: usize,
}

impl Wsi {
    pub(crate) fn new(
        device: &Arc<GraphicsDevice>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        extent: Extent2d,
    ) -> Result<Self, GraphicsError> {
        if extent.is_empty() {
            return Err(GraphicsError::InvalidParameter(
                "swapchain extent cannot be zero".to_string(),
            ));
        }
        let backend = device.backend();
        let created = backend.create_swapchain(&SwapchainInfo {
            display,
            window,
            extent,
            min_images: MIN_IMAGES,
        })?;
        if created.images.is_empty() {
            backend.destroy_swapchain(created.swapchain);
            return Err(GraphicsError::Unsupported(
                "swapchain has no images".to_string(),
            ));
        }

        let images: Vec<Arc<Image>> = created
            .images
            .iter()
            .map(|&handle| {
                Arc::new(Image::from_swapchain(
                    device,
                    handle,
                    created.format,
                    created.extent,
                ))
            })
            .collect();
        let acquire = match (0..images.len())
            .map(|_| Semaphore::new(Arc::clone(backend)).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(acquire) => acquire,
            Err(e) => {
                drop(images);
                backend.destroy_swapchain(created.swapchain);
                return Err(e);
            }
        };

        log::info!(
            "Created swapchain {}x{} {:?} with {} images",
            created.extent.width,
            created.extent.height,
            created.format,
            images.len()
        );
        Ok(Self {
            device: Arc::clone(device),
            swapchain: created.swapchain,
            format: created.format,
            extent: created.extent,
            images,
            acquire,
            next_semaphore: 0,
        })
    }

    /// Get the swapchain images, by index.
    pub fn images(&self) -> &[Arc<Image>] {
        &self.images
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    /// Acquire the next image to render into.
    ///
    /// On success the default queue's next submit waits for the image at
    /// `COLOR_ATTACHMENT_OUTPUT`. Returns `None` when `non_blocking` is set
    /// and no image is ready, or when the swapchain is out of date.
    ///
    /// # Errors
    ///
    /// Returns a device error if acquisition fails.
    pub fn next_image(
        &mut self,
        non_blocking: bool,
    ) -> Result<Option<(Arc<Image>, u32)>, GraphicsError> {
        let semaphore = &self.acquire[self.next_semaphore];
        let outcome = self.device.backend().acquire_next_image(
            self.swapchain,
            semaphore.handle(),
            non_blocking,
        )?;
        match outcome {
            AcquireOutcome::Ready(index) => {
                let image = self.images.get(index as usize).cloned().ok_or_else(|| {
                    GraphicsError::InvalidState(format!("acquired unknown swapchain image {index}"))
                })?;
                self.device
                    .default_queue()
                    .wait_for(semaphore, PipelineStage::COLOR_ATTACHMENT_OUTPUT)?;
                self.next_semaphore = (self.next_semaphore + 1) % self.acquire.len();
                log::trace!("Wsi: acquired image {}", index);
                Ok(Some((image, index)))
            }
            AcquireOutcome::NotReady => Ok(None),
            AcquireOutcome::OutOfDate => {
                log::debug!("Wsi: swapchain out of date");
                Ok(None)
            }
        }
    }

    /// Present an acquired image.
    ///
    /// Returns `false` when the swapchain no longer matches its window.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an index outside the swapchain, or a
    /// device error if presentation fails.
    pub fn present(&self, index: u32) -> Result<bool, GraphicsError> {
        if index as usize >= self.images.len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "swapchain image {index} out of range ({} images)",
                self.images.len()
            )));
        }
        Ok(self.device.backend().present(self.swapchain, index)?)
    }
}

impl Drop for Wsi {
    fn drop(&mut self) {
        self.images.clear();
        self.device.backend().destroy_swapchain(self.swapchain);
    }
}

impl std::fmt::Debug for Wsi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wsi")
            .field("swapchain", &self.swapchain)
            .field("format", &self.format)
            .field("extent", &self.extent)
            .field("images", &self.images.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroIsize;

    use raw_window_handle::{RawDisplayHandle, RawWindowHandle, Win32WindowHandle, WindowsDisplayHandle};

    use super::*;
    use crate::backend::{DummyBackend, GpuBackend};
    use crate::device::{DeviceParameters, test_device};

    fn raw_handles() -> (RawDisplayHandle, RawWindowHandle) {
        let hwnd = NonZeroIsize::new(1).unwrap_or(NonZeroIsize::MIN);
        (
            RawDisplayHandle::Windows(WindowsDisplayHandle::new()),
            RawWindowHandle::Win32(Win32WindowHandle::new(hwnd)),
        )
    }

    #[test]
    fn test_acquire_registers_wait() {
        let (device, backend) = test_device();
        let (display, window) = raw_handles();
        let mut wsi = Wsi::new(&device, display, window, Extent2d::new(64, 48)).unwrap();
        assert!(wsi.image_count() >= 2);
        assert_eq!(wsi.extent(), Extent2d::new(64, 48));

        let (image, index) = wsi.next_image(false).unwrap().unwrap();
        assert!(Arc::ptr_eq(&image, &wsi.images()[index as usize]));

        let mut cmd = device.default_queue().cmd_buffer().unwrap();
        cmd.encode(&crate::encoder::GraphicsEncoder::new()).unwrap();
        cmd.enqueue().unwrap();
        device.default_queue().submit().unwrap();

        let batch = &backend.submissions()[0][0];
        assert_eq!(batch.wait.len(), 1);
        assert_eq!(batch.wait[0].1, PipelineStage::COLOR_ATTACHMENT_OUTPUT);
        assert!(wsi.present(index).unwrap());
        assert!(wsi.present(wsi.image_count() as u32).is_err());
    }

    #[test]
    fn test_drop_releases_swapchain() {
        let (device, backend) = test_device();
        let (display, window) = raw_handles();
        let wsi = Wsi::new(&device, display, window, Extent2d::new(8, 8)).unwrap();
        let image = Arc::clone(&wsi.images()[0]);
        drop(wsi);
        drop(image);
        assert_eq!(backend.live_count("swapchain"), 0);
        assert_eq!(backend.live_count("semaphore"), 0);
        assert_eq!(backend.stats().unknown_destroys, 0);
    }

    #[test]
    fn test_swapchain_without_images_rejected() {
        let backend = Arc::new(DummyBackend::new().with_swapchain_images(0));
        let device = GraphicsDevice::with_backend(
            Arc::clone(&backend) as Arc<dyn GpuBackend>,
            DeviceParameters::new(),
        );
        let (display, window) = raw_handles();
        let err = Wsi::new(&device, display, window, Extent2d::new(8, 8)).unwrap_err();
        assert!(matches!(err, GraphicsError::Unsupported(_)));
        assert_eq!(backend.live_count("swapchain"), 0);
        assert_eq!(backend.stats().unknown_destroys, 0);
    }

    #[test]
    fn test_zero_extent_rejected() {
        let (device, _backend) = test_device();
        let (display, window) = raw_handles();
        assert!(Wsi::new(&device, display, window, Extent2d::new(0, 8)).is_err());
    }
}
