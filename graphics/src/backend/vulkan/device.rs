//! Vulkan physical and logical device management.

use ash::vk;

use crate::backend::BackendError;
use crate::types::{DeviceLimits, QueueCapabilities};

/// Select the best physical device for rendering.
///
/// Prefers discrete GPUs over integrated GPUs.
pub fn select_physical_device(
    instance: &ash::Instance,
) -> Result<vk::PhysicalDevice, BackendError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        BackendError::InitializationFailed(format!(
            "Failed to enumerate physical devices: {:?}",
            e
        ))
    })?;

    if devices.is_empty() {
        return Err(BackendError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best_device = None;
    let mut best_score = 0;

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        if find_queue_family(instance, device).is_none() {
            continue;
        }

        let mut score = 1;

        if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 1000;
        } else if properties.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            score += 100;
        }

        score += properties.limits.max_image_dimension2_d / 1024;

        log::info!(
            "Found GPU: {:?} (type: {:?}, score: {})",
            properties.device_name_as_c_str().unwrap_or(c"unknown"),
            properties.device_type,
            score
        );

        if score > best_score {
            best_score = score;
            best_device = Some(device);
        }
    }

    best_device
        .ok_or_else(|| BackendError::InitializationFailed("No suitable GPU found".to_string()))
}

/// Find a queue family that supports graphics and compute operations.
pub fn find_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Option<u32> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    queue_families
        .iter()
        .position(|family| {
            family
                .queue_flags
                .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .map(|index| index as u32)
}

/// Capabilities of the selected queue family.
///
/// Graphics and compute families always accept transfer work. Presentation
/// support is checked per surface when a swapchain is created.
pub fn queue_capabilities(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    family: u32,
) -> QueueCapabilities {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let Some(properties) = queue_families.get(family as usize) else {
        return QueueCapabilities::empty();
    };

    let mut caps = QueueCapabilities::PRESENT;
    if properties.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
        caps |= QueueCapabilities::GRAPHICS | QueueCapabilities::TRANSFER;
    }
    if properties.queue_flags.contains(vk::QueueFlags::COMPUTE) {
        caps |= QueueCapabilities::COMPUTE | QueueCapabilities::TRANSFER;
    }
    if properties.queue_flags.contains(vk::QueueFlags::TRANSFER) {
        caps |= QueueCapabilities::TRANSFER;
    }
    caps
}

/// Read the limits checked by front-end validation.
pub fn device_limits(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> DeviceLimits {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let limits = properties.limits;
    DeviceLimits {
        max_color_attachments: limits.max_color_attachments,
        max_framebuffer_width: limits.max_framebuffer_width,
        max_framebuffer_height: limits.max_framebuffer_height,
        max_framebuffer_layers: limits.max_framebuffer_layers,
        max_image_dimension_1d: limits.max_image_dimension1_d,
        max_image_dimension_2d: limits.max_image_dimension2_d,
        max_image_dimension_3d: limits.max_image_dimension3_d,
        max_image_layers: limits.max_image_array_layers,
        max_bound_dc_tables: limits.max_bound_descriptor_sets,
        max_vertex_inputs: limits.max_vertex_input_bindings,
        max_dispatch_size: limits.max_compute_work_group_count,
        min_uniform_offset_alignment: limits.min_uniform_buffer_offset_alignment,
    }
}

/// Create a logical device with one queue from `queue_family`.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<ash::Device, BackendError> {
    let queue_priorities = [1.0f32];
    let queue_create_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(&queue_priorities);

    let queue_create_infos = [queue_create_info];

    #[allow(unused_mut)]
    let mut device_extensions = vec![ash::khr::swapchain::NAME.as_ptr()];

    #[cfg(target_os = "macos")]
    {
        device_extensions.push(ash::khr::portability_subset::NAME.as_ptr());
    }

    let supported = unsafe { instance.get_physical_device_features(physical_device) };
    let features = vk::PhysicalDeviceFeatures::default()
        .sampler_anisotropy(supported.sampler_anisotropy == vk::TRUE)
        .fill_mode_non_solid(supported.fill_mode_non_solid == vk::TRUE);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .enabled_features(&features);

    unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
        BackendError::InitializationFailed(format!("Failed to create logical device: {:?}", e))
    })
}
