//! Vulkan instance and device bring-up.

use std::ffi::CStr;

use ash::vk;

use crate::error::RhiError;

/// Dynamic rendering and host query reset require Vulkan 1.3 / 1.2.
const REQUIRED_API_VERSION: u32 = vk::API_VERSION_1_3;

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Create a headless instance, enabling the validation layer when present.
pub fn create_instance(entry: &ash::Entry) -> Result<ash::Instance, RhiError> {
    let app_info = vk::ApplicationInfo::default()
        .application_name(c"cinder-rhi")
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"cinder-rhi")
        .api_version(REQUIRED_API_VERSION);

    let layer_names: Vec<*const i8> = if validation_layer_available(entry) {
        log::info!("Enabling Vulkan validation layer");
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        Vec::new()
    };

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_layer_names(&layer_names);

    unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        RhiError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })
}

fn validation_layer_available(entry: &ash::Entry) -> bool {
    let Ok(layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };
    layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER_NAME
    })
}

/// Select the best physical device, preferring discrete GPUs.
pub fn select_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        RhiError::InitializationFailed(format!("Failed to enumerate physical devices: {:?}", e))
    })?;

    let mut best_device = None;
    let mut best_score = 0u32;
    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        if properties.api_version < REQUIRED_API_VERSION {
            continue;
        }

        let mut score = match properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            _ => 10,
        };
        score += properties.limits.max_image_dimension2_d / 1024;

        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        log::info!(
            "Found GPU: {:?} (type: {:?}, score: {})",
            device_name,
            properties.device_type,
            score
        );

        if score > best_score {
            best_score = score;
            best_device = Some(device);
        }
    }

    best_device.ok_or_else(|| {
        RhiError::InitializationFailed("No Vulkan 1.3 capable GPU found".to_string())
    })
}

/// Find a queue family supporting both graphics and compute.
pub fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<u32, RhiError> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    for (index, family) in queue_families.iter().enumerate() {
        if family
            .queue_flags
            .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        {
            return Ok(index as u32);
        }
    }
    Err(RhiError::InitializationFailed(
        "No graphics+compute queue family found".to_string(),
    ))
}

/// Create the logical device with dynamic rendering and host query reset.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    graphics_queue_family: u32,
) -> Result<ash::Device, RhiError> {
    let queue_priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(graphics_queue_family)
        .queue_priorities(&queue_priorities)];

    let features = vk::PhysicalDeviceFeatures::default()
        .sampler_anisotropy(true)
        .pipeline_statistics_query(true);

    let mut vulkan_12_features =
        vk::PhysicalDeviceVulkan12Features::default().host_query_reset(true);
    let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_features(&features)
        .push_next(&mut vulkan_12_features)
        .push_next(&mut vulkan_13_features);

    unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
        RhiError::InitializationFailed(format!("Failed to create logical device: {:?}", e))
    })
}
