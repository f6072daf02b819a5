//! Vulkan instance creation and physical device selection.

use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::{c_char, c_void, CStr, CString};
use whisker_core::Version;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance creation parameters.
pub(crate) struct InstanceConfig<'a> {
    pub app_name: &'a str,
    pub app_version: Version,
    pub engine_name: &'a str,
    pub engine_version: Version,
    pub api_version: Version,
    pub validation: bool,
}

fn make_version(version: Version) -> u32 {
    vk::make_api_version(0, version.major, version.minor, version.patch)
}

/// Platform surface extensions; at least one must be available.
fn platform_surface_extensions() -> Vec<&'static CStr> {
    let mut names = Vec::new();
    #[cfg(target_os = "windows")]
    names.push(ash::khr::win32_surface::NAME);
    #[cfg(all(unix, not(target_os = "macos")))]
    names.extend([
        ash::khr::xlib_surface::NAME,
        ash::khr::xcb_surface::NAME,
        ash::khr::wayland_surface::NAME,
    ]);
    #[cfg(target_os = "macos")]
    names.push(ash::ext::metal_surface::NAME);
    names
}

unsafe fn available_names<T>(props: &[T], name: impl Fn(&T) -> &[c_char]) -> Vec<String> {
    props
        .iter()
        .map(|p| CStr::from_ptr(name(p).as_ptr()).to_string_lossy().into_owned())
        .collect()
}

/// Extensions to enable, or every missing required one.
fn resolve_extensions(available: &[String], validation: bool) -> Result<Vec<&'static CStr>> {
    let has = |ext: &CStr| available.iter().any(|a| ext.to_str().ok() == Some(a.as_str()));

    let mut enabled = Vec::new();
    let mut missing = Vec::new();

    if has(ash::khr::surface::NAME) {
        enabled.push(ash::khr::surface::NAME);
    } else {
        missing.push(ash::khr::surface::NAME.to_string_lossy().into_owned());
    }

    let platform: Vec<&CStr> = platform_surface_extensions()
        .into_iter()
        .filter(|ext| has(ext))
        .collect();
    if platform.is_empty() {
        missing.extend(
            platform_surface_extensions()
                .iter()
                .map(|ext| ext.to_string_lossy().into_owned()),
        );
    }
    enabled.extend(platform);

    if !missing.is_empty() {
        return Err(GpuError::NotPresent {
            what: "instance extensions",
            names: missing,
        });
    }

    if validation && has(ash::ext::debug_utils::NAME) {
        enabled.push(ash::ext::debug_utils::NAME);
    }
    #[cfg(target_os = "macos")]
    if has(ash::khr::portability_enumeration::NAME) {
        enabled.push(ash::khr::portability_enumeration::NAME);
    }

    Ok(enabled)
}

/// Create an instance with the surface extensions and, when requested and
/// available, the Khronos validation layer.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub(crate) unsafe fn create_instance(
    entry: &ash::Entry,
    config: &InstanceConfig<'_>,
) -> Result<(ash::Instance, bool)> {
    let app_name = CString::new(config.app_name)
        .map_err(|e| GpuError::InvalidState(format!("Application name: {e}")))?;
    let engine_name = CString::new(config.engine_name)
        .map_err(|e| GpuError::InvalidState(format!("Engine name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(make_version(config.app_version))
        .engine_name(&engine_name)
        .engine_version(make_version(config.engine_version))
        .api_version(make_version(config.api_version));

    let available_extensions = entry.enumerate_instance_extension_properties(None)?;
    let available_extensions =
        available_names(&available_extensions, |p| &p.extension_name[..]);
    let extensions = resolve_extensions(&available_extensions, config.validation)?;
    let extension_names: Vec<*const c_char> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    let mut layers = Vec::new();
    if config.validation {
        let available_layers = entry.enumerate_instance_layer_properties()?;
        let available_layers = available_names(&available_layers, |p| &p.layer_name[..]);
        let wanted = VALIDATION_LAYER.to_string_lossy();
        if available_layers.iter().any(|l| *l == wanted) {
            layers.push(VALIDATION_LAYER);
        } else {
            tracing::warn!("Validation layer {} not available", wanted);
        }
    }
    let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();
    let debug_utils = extensions.contains(&ash::ext::debug_utils::NAME);

    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = entry.create_instance(&create_info, None)?;
    Ok((instance, debug_utils))
}

/// Forward validation messages into `tracing`.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "vulkan", "({:?}) {}", message_type, message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "vulkan", "({:?}) {}", message_type, message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::debug!(target: "vulkan", "({:?}) {}", message_type, message);
    } else {
        tracing::trace!(target: "vulkan", "({:?}) {}", message_type, message);
    }
    vk::FALSE
}

/// Install the validation message forwarder.
///
/// # Safety
/// The instance must have been created with the debug utils extension.
pub(crate) unsafe fn create_debug_messenger(
    entry: &ash::Entry,
    instance: &ash::Instance,
) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = ash::ext::debug_utils::Instance::new(entry, instance);
    let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));
    let messenger = loader.create_debug_utils_messenger(&info, None)?;
    Ok((loader, messenger))
}

/// Device-type preference; higher wins.
pub(crate) fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 100,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 50,
        vk::PhysicalDeviceType::CPU => 25,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 10,
        _ => 0,
    }
}

/// A physical device that can render and present.
pub(crate) struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub queue_family: u32,
}

/// Pick the highest-scoring device that has a graphics queue and the
/// swapchain extension.
///
/// # Safety
/// The instance must be valid.
pub(crate) unsafe fn select_physical_device(instance: &ash::Instance) -> Result<SelectedDevice> {
    let devices = instance.enumerate_physical_devices()?;
    if devices.is_empty() {
        return Err(GpuError::NoSuitableDevice(
            "No suitable devices found".to_string(),
        ));
    }

    let mut candidates: Vec<(u32, SelectedDevice)> = Vec::new();
    let mut had_graphics = false;

    for device in devices {
        let families = instance.get_physical_device_queue_family_properties(device);
        let Some(queue_family) = families
            .iter()
            .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        else {
            continue;
        };
        had_graphics = true;

        let extensions = instance
            .enumerate_device_extension_properties(device)
            .unwrap_or_default();
        let extensions = available_names(&extensions, |p| &p.extension_name[..]);
        let swapchain = ash::khr::swapchain::NAME.to_string_lossy();
        if !extensions.iter().any(|e| *e == swapchain) {
            continue;
        }

        let properties = instance.get_physical_device_properties(device);
        candidates.push((
            device_type_score(properties.device_type),
            SelectedDevice {
                physical_device: device,
                queue_family: queue_family as u32,
            },
        ));
    }

    if !had_graphics {
        return Err(GpuError::NoSuitableDevice(
            "No suitable devices found".to_string(),
        ));
    }

    candidates
        .into_iter()
        .max_by_key(|(score, _)| *score)
        .map(|(_, device)| device)
        .ok_or_else(|| {
            GpuError::NoSuitableDevice(
                "No suitable device had every required extension present".to_string(),
            )
        })
}

/// Create the logical device with one queue from `queue_family`.
///
/// # Safety
/// The instance and physical device must be valid.
pub(crate) unsafe fn create_device(
    instance: &ash::Instance,
    selected: &SelectedDevice,
) -> Result<(ash::Device, vk::Queue)> {
    let queue_priority = 1.0_f32;
    let queue_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(selected.queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority));

    let extension_names = [ash::khr::swapchain::NAME.as_ptr()];
    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(std::slice::from_ref(&queue_info))
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    let device = instance.create_device(selected.physical_device, &create_info, None)?;
    let queue = device.get_device_queue(selected.queue_family, 0);
    Ok((device, queue))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discrete_devices_win() {
        let mut types = [
            vk::PhysicalDeviceType::CPU,
            vk::PhysicalDeviceType::DISCRETE_GPU,
            vk::PhysicalDeviceType::VIRTUAL_GPU,
            vk::PhysicalDeviceType::INTEGRATED_GPU,
        ];
        types.sort_by_key(|t| std::cmp::Reverse(device_type_score(*t)));
        assert_eq!(types[0], vk::PhysicalDeviceType::DISCRETE_GPU);
        assert_eq!(types[1], vk::PhysicalDeviceType::INTEGRATED_GPU);
        assert_eq!(types[3], vk::PhysicalDeviceType::VIRTUAL_GPU);
    }

    #[test]
    fn missing_surface_extensions_are_all_named() {
        let err = resolve_extensions(&[], false).unwrap_err();
        match err {
            GpuError::NotPresent { what, names } => {
                assert_eq!(what, "instance extensions");
                assert!(names.contains(&"VK_KHR_surface".to_string()));
                assert!(names.len() >= 2);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn debug_utils_only_with_validation() {
        let mut available: Vec<String> = platform_surface_extensions()
            .iter()
            .map(|e| e.to_string_lossy().into_owned())
            .collect();
        available.push("VK_KHR_surface".into());
        available.push("VK_EXT_debug_utils".into());

        let without = resolve_extensions(&available, false).unwrap();
        assert!(!without.contains(&ash::ext::debug_utils::NAME));
        let with = resolve_extensions(&available, true).unwrap();
        assert!(with.contains(&ash::ext::debug_utils::NAME));
    }
}
