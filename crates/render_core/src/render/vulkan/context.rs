//! Vulkan context management
//!
//! Instance, surface, physical device selection and logical device creation.
//! Everything here is one-time sequential setup; the context hands the
//! presentation engine a device, its queues and the surface to present to.

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};
use std::collections::HashSet;
use std::ffi::{CStr, CString};
use thiserror::Error;

use crate::core::config::RendererConfig;
use crate::render::vulkan::window::{Window, WindowError};
use crate::render::AssetError;

const VALIDATION_LAYER: &[u8] = b"VK_LAYER_KHRONOS_validation\0";
const ENGINE_NAME: &[u8] = b"render_core\0";

/// Vulkan-specific error types
///
/// Every variant is fatal to the presentation loop. A stale swapchain is not
/// an error; it is reported through `AcquireStatus` and `PresentStatus`.
#[derive(Error, Debug)]
pub enum VulkanError {
    /// A named Vulkan call failed
    #[error("{operation} failed: {result:?}")]
    Call {
        /// What was being attempted
        operation: &'static str,
        /// Result code returned by the driver
        result: vk::Result,
    },

    /// Surface capabilities cannot produce a usable swapchain
    #[error("Surface incompatible: {0}")]
    SurfaceIncompatible(String),

    /// Recording or submitting a frame's command buffer failed
    #[error("Render command error during {operation}: {result:?}")]
    RenderCommand {
        /// Recording or submission step that failed
        operation: &'static str,
        /// Result code returned by the driver
        result: vk::Result,
    },

    /// The logical device was lost; GPU resources are in an undefined state
    #[error("Device lost during {operation}")]
    DeviceLost {
        /// Operation that observed the loss
        operation: &'static str,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Window system failure
    #[error(transparent)]
    Window(#[from] WindowError),

    /// Asset loading failure
    #[error(transparent)]
    Asset(#[from] AssetError),
}

impl VulkanError {
    /// Classify a failed Vulkan call, singling out device loss
    pub fn from_result(operation: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost { operation },
            result => Self::Call { operation, result },
        }
    }

    /// Reclassify a driver failure as a render command error
    ///
    /// Device loss and non-driver errors pass through unchanged.
    #[must_use]
    pub fn into_render_command(self, operation: &'static str) -> Self {
        match self {
            Self::Call { result, .. } => Self::RenderCommand { operation, result },
            other => other,
        }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create a new Vulkan instance, with validation when requested
    pub fn new(window: &Window, config: &RendererConfig) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e:?}")))?;

        log_available_extensions(&entry);

        let app_name = CString::new(config.application_name.as_str())
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid application name: {e}")))?;
        let engine_name = CStr::from_bytes_with_nul(ENGINE_NAME)
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let required_extensions = window.get_required_instance_extensions()?;
        let mut extension_names = required_extensions
            .iter()
            .map(|ext| CString::new(ext.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid extension name: {e}")))?;

        let enable_validation = config.validation_enabled() && validation_layer_available(&entry);
        if config.validation_enabled() && !enable_validation {
            log::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }
        if enable_validation {
            extension_names.push(DebugUtils::name().to_owned());
        }

        let extension_ptrs: Vec<*const std::os::raw::c_char> =
            extension_names.iter().map(|ext| ext.as_ptr()).collect();

        let layer_ptrs: Vec<*const std::os::raw::c_char> = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr().cast()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe {
            entry.create_instance(&create_info, None)
                .map_err(|r| VulkanError::from_result("create instance", r))?
        };

        let debug = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        log::debug!("Vulkan instance created (validation: {})", enable_validation);

        Ok(Self {
            entry,
            instance,
            debug,
        })
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils.create_debug_utils_messenger(&create_info, None)
                .map_err(|r| VulkanError::from_result("create debug messenger", r))
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn log_available_extensions(entry: &Entry) {
    match entry.enumerate_instance_extension_properties(None) {
        Ok(extensions) => {
            log::debug!("{} instance extensions available:", extensions.len());
            for extension in &extensions {
                let name = unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) };
                log::debug!("\t{}", name.to_string_lossy());
            }
        }
        Err(e) => log::warn!("Could not enumerate instance extensions: {:?}", e),
    }
}

fn validation_layer_available(entry: &Entry) -> bool {
    let Ok(layers) = entry.enumerate_instance_layer_properties() else {
        return false;
    };
    layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name.to_bytes_with_nul() == VALIDATION_LAYER
    })
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Window surface with RAII cleanup
pub struct SurfaceHandle {
    loader: Surface,
    surface: vk::SurfaceKHR,
}

impl SurfaceHandle {
    fn new(instance: &VulkanInstance, window: &mut Window) -> VulkanResult<Self> {
        let loader = Surface::new(&instance.entry, &instance.instance);
        let surface = window.create_vulkan_surface(instance.instance.handle())?;
        Ok(Self { loader, surface })
    }

    /// Get the surface handle
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Get the surface extension loader
    pub fn loader(&self) -> &Surface {
        &self.loader
    }
}

impl Drop for SurfaceHandle {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Index of the graphics queue family
    pub graphics_family: u32,
    /// Index of the presentation queue family
    pub present_family: u32,
}

impl PhysicalDeviceInfo {
    /// Select the first GPU that can draw and present to `surface`
    pub fn select_suitable_device(instance: &Instance, surface: &SurfaceHandle) -> VulkanResult<Self> {
        let devices = unsafe {
            instance.enumerate_physical_devices()
                .map_err(|r| VulkanError::from_result("enumerate physical devices", r))?
        };

        for device in devices {
            match Self::evaluate_device(instance, device, surface) {
                Ok(Some(info)) => {
                    log::info!("Selected GPU: {}", unsafe {
                        CStr::from_ptr(info.properties.device_name.as_ptr()).to_string_lossy()
                    });
                    return Ok(info);
                }
                Ok(None) => {}
                Err(e) => log::warn!("Skipping GPU that failed evaluation: {}", e),
            }
        }

        Err(VulkanError::InitializationFailed("No suitable GPU found".to_string()))
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: &SurfaceHandle,
    ) -> VulkanResult<Option<Self>> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut graphics_family = None;
        let mut present_family = None;

        for (index, family) in (0u32..).zip(queue_families.iter()) {
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && graphics_family.is_none() {
                graphics_family = Some(index);
            }

            let present_support = unsafe {
                surface.loader()
                    .get_physical_device_surface_support(device, index, surface.handle())
                    .map_err(|r| VulkanError::from_result("query surface support", r))?
            };
            if present_support && present_family.is_none() {
                present_family = Some(index);
            }

            if graphics_family.is_some() && present_family.is_some() {
                break;
            }
        }

        let (Some(graphics_family), Some(present_family)) = (graphics_family, present_family) else {
            return Ok(None);
        };

        let extensions = unsafe {
            instance.enumerate_device_extension_properties(device)
                .map_err(|r| VulkanError::from_result("enumerate device extensions", r))?
        };
        let has_swapchain = extensions.iter().any(|available| {
            let name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            name == SwapchainLoader::name()
        });
        if !has_swapchain || features.sampler_anisotropy == vk::FALSE {
            return Ok(None);
        }

        let formats = unsafe {
            surface.loader()
                .get_physical_device_surface_formats(device, surface.handle())
                .map_err(|r| VulkanError::from_result("query surface formats", r))?
        };
        let present_modes = unsafe {
            surface.loader()
                .get_physical_device_surface_present_modes(device, surface.handle())
                .map_err(|r| VulkanError::from_result("query present modes", r))?
        };
        if formats.is_empty() || present_modes.is_empty() {
            return Ok(None);
        }

        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

        Ok(Some(Self {
            device,
            properties,
            memory_properties,
            graphics_family,
            present_family,
        }))
    }

    /// Find a memory type allowed by `type_filter` that has all `properties`
    pub fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        let memory = &self.memory_properties;
        (0..memory.memory_type_count)
            .find(|&i| {
                (type_filter & (1 << i)) != 0
                    && memory.memory_types[i as usize].property_flags.contains(properties)
            })
            .ok_or(VulkanError::NoSuitableMemoryType)
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create a new logical device with one queue per unique family
    pub fn new(instance: &Instance, physical_device_info: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let unique_families: HashSet<u32> = [
            physical_device_info.graphics_family,
            physical_device_info.present_family,
        ].into_iter().collect();

        let priorities = [1.0];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let required_extensions = [SwapchainLoader::name().as_ptr()];
        let device_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&device_features);

        let device = unsafe {
            instance.create_device(physical_device_info.device, &create_info, None)
                .map_err(|r| VulkanError::from_result("create logical device", r))?
        };

        let graphics_queue = unsafe { device.get_device_queue(physical_device_info.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(physical_device_info.present_family, 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Main Vulkan context that owns all core Vulkan resources
///
/// Field order is the destruction order: device, then surface, then instance.
pub struct VulkanContext {
    device: LogicalDevice,
    surface: SurfaceHandle,
    physical_device: PhysicalDeviceInfo,
    instance: VulkanInstance,
}

impl VulkanContext {
    /// Create a new Vulkan context for the window
    pub fn new(window: &mut Window, config: &RendererConfig) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(window, config)?;
        let surface = SurfaceHandle::new(&instance, window)?;
        let physical_device = PhysicalDeviceInfo::select_suitable_device(&instance.instance, &surface)?;
        let device = LogicalDevice::new(&instance.instance, &physical_device)?;

        log::debug!(
            "Queue families: graphics={}, present={}",
            physical_device.graphics_family,
            physical_device.present_family
        );

        Ok(Self {
            device,
            surface,
            physical_device,
            instance,
        })
    }

    /// Get a reference to the Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Get the surface
    pub fn surface(&self) -> &SurfaceHandle {
        &self.surface
    }

    /// Get the physical device info
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Get the logical device
    pub fn device(&self) -> &LogicalDevice {
        &self.device
    }

    /// Get the raw Device handle
    pub fn raw_device(&self) -> Device {
        self.device.device.clone()
    }

    /// Get the swapchain loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.device.swapchain_loader
    }

    /// Get the graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Get the present queue
    pub fn present_queue(&self) -> vk::Queue {
        self.device.present_queue
    }

    /// Get the graphics queue family index
    pub fn graphics_queue_family(&self) -> u32 {
        self.physical_device.graphics_family
    }

    /// Block until every queue on the device is idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe {
            self.device.device.device_wait_idle()
                .map_err(|r| VulkanError::from_result("wait for device idle", r))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_loss_is_singled_out() {
        let lost = VulkanError::from_result("submit", vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(lost, VulkanError::DeviceLost { operation: "submit" }));

        let other = VulkanError::from_result("submit", vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert!(matches!(other, VulkanError::Call { result: vk::Result::ERROR_OUT_OF_HOST_MEMORY, .. }));
    }

    #[test]
    fn test_render_command_reclassification() {
        let err = VulkanError::from_result("end command buffer", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
            .into_render_command("record command buffer");
        assert!(matches!(
            err,
            VulkanError::RenderCommand { operation: "record command buffer", result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY }
        ));

        let lost = VulkanError::DeviceLost { operation: "queue submit" }.into_render_command("record");
        assert!(matches!(lost, VulkanError::DeviceLost { operation: "queue submit" }));

        let passthrough = VulkanError::NoSuitableMemoryType.into_render_command("record");
        assert!(matches!(passthrough, VulkanError::NoSuitableMemoryType));
    }

    #[test]
    fn test_error_message_names_operation() {
        let err = VulkanError::RenderCommand {
            operation: "queue submit",
            result: vk::Result::ERROR_OUT_OF_HOST_MEMORY,
        };
        assert!(err.to_string().contains("queue submit"));
    }
}
