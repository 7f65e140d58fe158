//! Vulkan swapchain management
//!
//! Surface capability queries, the selection rules for format, present mode,
//! extent and image count, and the RAII swapchain handle with its image views.
//! Selection is kept pure so it can be checked without a device.

use ash::{vk, Device};
use ash::extensions::khr::Swapchain as SwapchainLoader;

use crate::core::config::PresentModePreference;
use crate::render::vulkan::{SurfaceHandle, VulkanResult, VulkanError};

/// Everything the surface reports about what a swapchain may look like
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    /// Image count, extent and transform limits
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported format/color-space pairs
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported presentation algorithms
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// Query the current surface state for a physical device
    pub fn query(surface: &SurfaceHandle, physical_device: vk::PhysicalDevice) -> VulkanResult<Self> {
        let loader = surface.loader();
        let handle = surface.handle();

        unsafe {
            let capabilities = loader
                .get_physical_device_surface_capabilities(physical_device, handle)
                .map_err(|r| VulkanError::from_result("query surface capabilities", r))?;
            let formats = loader
                .get_physical_device_surface_formats(physical_device, handle)
                .map_err(|r| VulkanError::from_result("query surface formats", r))?;
            let present_modes = loader
                .get_physical_device_surface_present_modes(physical_device, handle)
                .map_err(|r| VulkanError::from_result("query present modes", r))?;

            Ok(Self {
                capabilities,
                formats,
                present_modes,
            })
        }
    }
}

/// Prefer 8-bit BGRA in nonlinear sRGB, otherwise the first reported format
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
}

/// Pick MAILBOX when low latency is preferred and offered, FIFO otherwise
///
/// FIFO is the one mode every conforming implementation supports.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], preference: PresentModePreference) -> vk::PresentModeKHR {
    match preference {
        PresentModePreference::LowLatency => modes
            .iter()
            .copied()
            .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
            .unwrap_or(vk::PresentModeKHR::FIFO),
        PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
    }
}

/// Use the surface's current extent when defined, else clamp the framebuffer size
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, framebuffer_size: (u32, u32)) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let (width, height) = framebuffer_size;
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, clamped to the maximum (0 means unbounded)
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Resolved swapchain parameters for one creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPlan {
    /// Color format and space of the presentable images
    pub surface_format: vk::SurfaceFormatKHR,
    /// Presentation algorithm
    pub present_mode: vk::PresentModeKHR,
    /// Image size in pixels
    pub extent: vk::Extent2D,
    /// Minimum number of images requested from the driver
    pub image_count: u32,
    /// Transform the surface currently applies
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    /// Resolve a plan, failing when the surface cannot yield a usable chain
    pub fn from_support(
        support: &SurfaceSupport,
        framebuffer_size: (u32, u32),
        preference: PresentModePreference,
    ) -> VulkanResult<Self> {
        let surface_format = choose_surface_format(&support.formats)
            .ok_or_else(|| VulkanError::SurfaceIncompatible("surface reports no formats".to_string()))?;

        if support.present_modes.is_empty() {
            return Err(VulkanError::SurfaceIncompatible("surface reports no present modes".to_string()));
        }

        let extent = choose_extent(&support.capabilities, framebuffer_size);
        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::SurfaceIncompatible(format!(
                "surface extent {}x{} is empty",
                extent.width, extent.height
            )));
        }

        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(&support.present_modes, preference),
            extent,
            image_count: choose_image_count(&support.capabilities),
            pre_transform: support.capabilities.current_transform,
        })
    }
}

/// Swapchain handle and its per-image views, with RAII cleanup
pub struct Swapchain {
    device: Device,
    swapchain_loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    plan: SwapchainPlan,
}

impl Swapchain {
    /// Create a swapchain for `surface` following `plan`
    pub fn new(
        device: Device,
        swapchain_loader: SwapchainLoader,
        surface: vk::SurfaceKHR,
        queue_families: [u32; 2],
        plan: &SwapchainPlan,
    ) -> VulkanResult<Self> {
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        // Graphics and present may be separate families
        create_info = if queue_families[0] == queue_families[1] {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_families)
        };

        let swapchain = unsafe {
            swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(|r| VulkanError::from_result("create swapchain", r))?
        };

        // From here on Drop releases whatever has been created
        let mut chain = Self {
            device,
            swapchain_loader,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            plan: *plan,
        };

        chain.images = unsafe {
            chain.swapchain_loader
                .get_swapchain_images(swapchain)
                .map_err(|r| VulkanError::from_result("get swapchain images", r))?
        };

        for &image in &chain.images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(plan.surface_format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe {
                chain.device.create_image_view(&view_info, None)
                    .map_err(|r| VulkanError::from_result("create swapchain image view", r))?
            };
            chain.image_views.push(view);
        }

        Ok(chain)
    }

    /// Acquire the next presentable image, signaling `semaphore` when ready
    ///
    /// Returns the image index and whether the swapchain is suboptimal.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore, timeout: u64) -> ash::prelude::VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, timeout, semaphore, vk::Fence::null())
        }
    }

    /// Queue `image_index` for presentation once `wait_semaphore` signals
    ///
    /// Returns whether the swapchain is suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> ash::prelude::VkResult<bool> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }

    /// Get swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.plan.extent
    }

    /// Get surface format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.plan.surface_format
    }

    /// Get image views
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Number of images the driver actually created
    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &image_view in &self.image_views {
                self.device.destroy_image_view(image_view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min_images: u32, max_images: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_images,
            max_image_count: max_images,
            current_extent: vk::Extent2D { width: 800, height: 600 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        }
    }

    fn support(caps: vk::SurfaceCapabilitiesKHR) -> SurfaceSupport {
        SurfaceSupport {
            capabilities: caps,
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::R8G8B8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    #[test]
    fn test_image_count_is_min_plus_one() {
        assert_eq!(choose_image_count(&capabilities(2, 8)), 3);
    }

    #[test]
    fn test_image_count_clamped_to_max() {
        assert_eq!(choose_image_count(&capabilities(2, 2)), 2);
    }

    #[test]
    fn test_image_count_unbounded_max() {
        assert_eq!(choose_image_count(&capabilities(2, 0)), 3);
    }

    #[test]
    fn test_prefers_bgra_srgb() {
        let chosen = choose_surface_format(&support(capabilities(2, 0)).formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_falls_back_to_first_format() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::R16G16B16A16_SFLOAT,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        }];
        assert_eq!(choose_surface_format(&formats), Some(formats[0]));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn test_present_mode_selection() {
        let both = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        let fifo_only = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];

        assert_eq!(choose_present_mode(&both, PresentModePreference::LowLatency), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&fifo_only, PresentModePreference::LowLatency), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&both, PresentModePreference::Fifo), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_extent_uses_current_extent_when_defined() {
        let extent = choose_extent(&capabilities(2, 0), (1920, 1080));
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_extent_clamps_framebuffer_when_undefined() {
        let mut caps = capabilities(2, 0);
        caps.current_extent = vk::Extent2D { width: u32::MAX, height: u32::MAX };
        caps.min_image_extent = vk::Extent2D { width: 64, height: 64 };
        caps.max_image_extent = vk::Extent2D { width: 1024, height: 768 };

        let extent = choose_extent(&caps, (2000, 10));
        assert_eq!((extent.width, extent.height), (1024, 64));

        let inside = choose_extent(&caps, (800, 600));
        assert_eq!((inside.width, inside.height), (800, 600));
    }

    #[test]
    fn test_plan_for_800x600() {
        let plan = SwapchainPlan::from_support(&support(capabilities(2, 0)), (800, 600), PresentModePreference::LowLatency)
            .unwrap();
        assert_eq!(plan.image_count, 3);
        assert_eq!(plan.extent, vk::Extent2D { width: 800, height: 600 });
        assert_eq!(plan.present_mode, vk::PresentModeKHR::MAILBOX);

        let capped = SwapchainPlan::from_support(&support(capabilities(2, 2)), (800, 600), PresentModePreference::LowLatency)
            .unwrap();
        assert_eq!(capped.image_count, 2);
    }

    #[test]
    fn test_plan_rejects_unusable_surface() {
        let mut no_formats = support(capabilities(2, 0));
        no_formats.formats.clear();
        assert!(matches!(
            SwapchainPlan::from_support(&no_formats, (800, 600), PresentModePreference::Fifo),
            Err(VulkanError::SurfaceIncompatible(_))
        ));

        let mut no_modes = support(capabilities(2, 0));
        no_modes.present_modes.clear();
        assert!(matches!(
            SwapchainPlan::from_support(&no_modes, (800, 600), PresentModePreference::Fifo),
            Err(VulkanError::SurfaceIncompatible(_))
        ));

        let mut empty_extent = support(capabilities(2, 0));
        empty_extent.capabilities.current_extent = vk::Extent2D { width: 0, height: 0 };
        assert!(matches!(
            SwapchainPlan::from_support(&empty_extent, (800, 600), PresentModePreference::Fifo),
            Err(VulkanError::SurfaceIncompatible(_))
        ));
    }
}
