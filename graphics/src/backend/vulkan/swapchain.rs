//! Vulkan surfaces and swapchains.
//!
//! Swapchain images follow the rest of the backend and are rendered to in
//! `GENERAL` layout: acquisition transitions the image there before the
//! caller's semaphore is signaled, and presentation transitions it to
//! `PRESENT_SRC_KHR`.

use ash::vk;
use ash::vk::Handle;

use crate::backend::{
    AcquireOutcome, BackendError, ImageHandle, SwapchainHandle, SwapchainImages, SwapchainInfo,
};
use crate::types::{Extent2d, Format};

use super::VulkanBackend;
use super::command::record_layout_transition;
use super::conversion::{convert_result, format_from_vk};

/// Surface formats in order of preference.
const PREFERRED_FORMATS: [vk::Format; 2] =
    [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB];

/// A swapchain and the surface it presents to.
pub struct VulkanSwapchain {
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    /// Signaled by the presentation engine, consumed by the layout transition.
    acquired: vk::Semaphore,
    format: Format,
    extent: Extent2d,
}

impl VulkanSwapchain {
    /// Create a surface for the window and a swapchain on it.
    pub fn new(backend: &VulkanBackend, info: &SwapchainInfo) -> Result<Self, BackendError> {
        let surface = unsafe {
            ash_window::create_surface(
                &backend.entry,
                &backend.instance,
                info.display,
                info.window,
                None,
            )
        }
        .map_err(|e| convert_result(e, "create surface"))?;

        match Self::with_surface(backend, surface, info) {
            Ok(swapchain) => Ok(swapchain),
            Err(e) => {
                unsafe { backend.surface_loader.destroy_surface(surface, None) };
                Err(e)
            }
        }
    }

    fn with_surface(
        backend: &VulkanBackend,
        surface: vk::SurfaceKHR,
        info: &SwapchainInfo,
    ) -> Result<Self, BackendError> {
        let surface_loader = &backend.surface_loader;
        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(
                backend.physical_device,
                backend.queue_family,
                surface,
            )
        }
        .map_err(|e| convert_result(e, "query surface support"))?;
        if !supported {
            return Err(BackendError::FeatureNotSupported(
                "queue family cannot present to this surface".to_string(),
            ));
        }

        let capabilities = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(backend.physical_device, surface)
        }
        .map_err(|e| convert_result(e, "query surface capabilities"))?;
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(backend.physical_device, surface)
        }
        .map_err(|e| convert_result(e, "query surface formats"))?;

        let (surface_format, format) = choose_format(&formats).ok_or_else(|| {
            BackendError::FeatureNotSupported(format!(
                "no supported surface format among {:?}",
                formats.iter().map(|f| f.format).collect::<Vec<_>>()
            ))
        })?;

        let vk_extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: info.extent.width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: info.extent.height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };

        let max_images = if capabilities.max_image_count > 0 {
            capabilities.max_image_count
        } else {
            u32::MAX
        };
        let image_count = info
            .min_images
            .max(capabilities.min_image_count)
            .min(max_images);

        let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        for extra in [vk::ImageUsageFlags::TRANSFER_DST, vk::ImageUsageFlags::TRANSFER_SRC] {
            if capabilities.supported_usage_flags.contains(extra) {
                usage |= extra;
            }
        }

        // FIFO is the only mode every implementation supports.
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(vk_extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain_loader = &backend.swapchain_loader;
        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|e| convert_result(e, "create swapchain"))?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(convert_result(e, "get swapchain images"));
            }
        };
        let acquired = match unsafe {
            backend
                .device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        } {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(convert_result(e, "create acquire semaphore"));
            }
        };

        log::info!(
            "Created Vulkan swapchain: {}x{} {:?} with {} images",
            vk_extent.width,
            vk_extent.height,
            surface_format.format,
            images.len()
        );

        Ok(Self {
            surface,
            swapchain,
            images,
            acquired,
            format,
            extent: Extent2d::new(vk_extent.width, vk_extent.height),
        })
    }

    /// Describe the swapchain for the front end.
    pub fn images(&self) -> SwapchainImages {
        SwapchainImages {
            swapchain: SwapchainHandle(self.swapchain.as_raw()),
            format: self.format,
            extent: self.extent,
            images: self
                .images
                .iter()
                .map(|image| ImageHandle(image.as_raw()))
                .collect(),
        }
    }

    /// Acquire an image and signal `signal` once it is in `GENERAL` layout.
    pub fn acquire(
        &self,
        backend: &VulkanBackend,
        signal: vk::Semaphore,
        non_blocking: bool,
    ) -> Result<AcquireOutcome, BackendError> {
        let timeout = if non_blocking { 0 } else { u64::MAX };
        let acquired = unsafe {
            backend.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                self.acquired,
                vk::Fence::null(),
            )
        };
        let index = match acquired {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::debug!("Swapchain is suboptimal for its surface");
                }
                index
            }
            Err(vk::Result::NOT_READY | vk::Result::TIMEOUT) => return Ok(AcquireOutcome::NotReady),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Ok(AcquireOutcome::OutOfDate),
            Err(e) => return Err(convert_result(e, "acquire swapchain image")),
        };
        let image = self.image(index)?;

        backend.immediate(
            Some((self.acquired, vk::PipelineStageFlags::ALL_COMMANDS)),
            Some(signal),
            |device, cmd| {
                record_layout_transition(
                    device,
                    cmd,
                    image,
                    vk::ImageAspectFlags::COLOR,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::GENERAL,
                );
            },
        )?;
        Ok(AcquireOutcome::Ready(index))
    }

    /// Present image `index`. Returns false when the swapchain is out of date.
    pub fn present(&self, backend: &VulkanBackend, index: u32) -> Result<bool, BackendError> {
        let image = self.image(index)?;
        backend.immediate(None, None, |device, cmd| {
            record_layout_transition(
                device,
                cmd,
                image,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::GENERAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            );
        })?;

        let swapchains = [self.swapchain];
        let indices = [index];
        let present_info = vk::PresentInfoKHR::default()
            .swapchains(&swapchains)
            .image_indices(&indices);
        let queue = backend.queue.lock();
        match unsafe { backend.swapchain_loader.queue_present(*queue, &present_info) } {
            Ok(suboptimal) => {
                if suboptimal {
                    log::debug!("Presented to a suboptimal swapchain");
                }
                Ok(true)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(false),
            Err(e) => Err(convert_result(e, "present")),
        }
    }

    fn image(&self, index: u32) -> Result<vk::Image, BackendError> {
        self.images.get(index as usize).copied().ok_or_else(|| {
            BackendError::InvalidParameter(format!(
                "swapchain image {index} out of range ({} images)",
                self.images.len()
            ))
        })
    }

    /// Destroy the swapchain, its semaphore and its surface.
    ///
    /// The caller waits for the queue to go idle first.
    pub fn destroy(&self, backend: &VulkanBackend) {
        unsafe {
            backend.device.destroy_semaphore(self.acquired, None);
            backend
                .swapchain_loader
                .destroy_swapchain(self.swapchain, None);
            backend.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

/// Pick a surface format the front end can name, preferring sRGB.
fn choose_format(formats: &[vk::SurfaceFormatKHR]) -> Option<(vk::SurfaceFormatKHR, Format)> {
    let preferred = PREFERRED_FORMATS.iter().find_map(|wanted| {
        formats.iter().find(|f| {
            f.format == *wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
    });
    preferred
        .into_iter()
        .chain(formats.iter())
        .find_map(|f| format_from_vk(f.format).map(|format| (*f, format)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_choose_format_prefers_srgb() {
        let formats = [
            surface_format(vk::Format::B8G8R8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
        ];
        let (chosen, format) = choose_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(format, Format::Bgra8Srgb);
    }

    #[test]
    fn test_choose_format_skips_unknown() {
        let formats = [
            surface_format(vk::Format::R5G6B5_UNORM_PACK16),
            surface_format(vk::Format::R8G8B8A8_UNORM),
        ];
        let (_, format) = choose_format(&formats).unwrap();
        assert_eq!(format, Format::Rgba8Unorm);
        assert!(choose_format(&[surface_format(vk::Format::R5G6B5_UNORM_PACK16)]).is_none());
    }
}
