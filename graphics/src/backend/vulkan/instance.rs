//! Vulkan instance creation and configuration.

use std::ffi::CStr;

use ash::vk;

use crate::backend::BackendError;

use super::debug;

/// Required Vulkan API version. Render passes and barriers use core 1.0
/// features only, so 1.2 keeps MoltenVK in reach.
const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 2, 0);

/// Validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

const APPLICATION_NAME: &CStr = c"cmdgfx";

/// A created instance with its optional debug messenger.
pub struct InstanceParts {
    pub instance: ash::Instance,
    pub debug_utils: Option<ash::ext::debug_utils::Instance>,
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

/// Create a Vulkan instance with optional validation layers.
pub fn create_instance(
    entry: &ash::Entry,
    validation_enabled: bool,
) -> Result<InstanceParts, BackendError> {
    let validation_available = validation_enabled && check_validation_layer_support(entry);

    if validation_enabled && !validation_available {
        log::warn!("Validation layers requested but not available");
    }

    let app_info = vk::ApplicationInfo::default()
        .application_name(APPLICATION_NAME)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(APPLICATION_NAME)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let mut extensions = vec![ash::khr::surface::NAME.as_ptr()];

    if validation_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    #[cfg(target_os = "windows")]
    {
        extensions.push(ash::khr::win32_surface::NAME.as_ptr());
    }

    #[cfg(target_os = "linux")]
    {
        extensions.push(ash::khr::xlib_surface::NAME.as_ptr());
        extensions.push(ash::khr::xcb_surface::NAME.as_ptr());
        extensions.push(ash::khr::wayland_surface::NAME.as_ptr());
    }

    #[cfg(target_os = "macos")]
    {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        extensions.push(ash::ext::metal_surface::NAME.as_ptr());
    }

    let layer_names: Vec<*const std::ffi::c_char> = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    #[allow(unused_mut)]
    let mut create_flags = vk::InstanceCreateFlags::empty();

    #[cfg(target_os = "macos")]
    {
        create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let create_info = vk::InstanceCreateInfo::default()
        .flags(create_flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        BackendError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })?;

    let (debug_utils, debug_messenger) = if validation_available {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, &instance);
        match debug::create_debug_messenger(&debug_utils) {
            Ok(messenger) => (Some(debug_utils), Some(messenger)),
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        }
    } else {
        (None, None)
    };

    Ok(InstanceParts {
        instance,
        debug_utils,
        debug_messenger,
    })
}

/// Check if the validation layer is available.
fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let available_layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(_) => return false,
    };

    available_layers.iter().any(|layer| {
        layer
            .layer_name_as_c_str()
            .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
    })
}
