//! Swapchain lifecycle
//!
//! Owns the presentable chain (swapchain, views, depth buffer, framebuffers)
//! and rebuilds it in place when the surface changes. The device-facing
//! steps go through [`ChainFactory`], so the ordering rules here hold for any
//! implementation:
//!
//! - nothing is torn down before the device is idle
//! - nothing is created while the framebuffer has a zero dimension
//! - teardown is complete before creation starts

use ash::vk;

use crate::core::config::PresentModePreference;
use crate::render::vulkan::{
    DepthBuffer, Framebuffer, FramebufferSource, SurfaceSupport, Swapchain, SwapchainPlan,
    VulkanContext, VulkanResult, VulkanError,
};

/// What the rest of the renderer may ask of a built chain
pub trait ChainInfo {
    /// Presentable images in the chain
    fn image_count(&self) -> usize;
    /// Color views, one per image
    fn view_count(&self) -> usize;
    /// Framebuffers, one per image
    fn framebuffer_count(&self) -> usize;
    /// Pixel size of every image
    fn extent(&self) -> vk::Extent2D;
    /// Color format of every image
    fn format(&self) -> vk::SurfaceFormatKHR;
}

/// Device operations needed to build and retire a chain
pub trait ChainFactory {
    /// Chain type produced by [`build`](Self::build)
    type Chain: ChainInfo;

    /// Block until no queued GPU work can still reference the current chain
    fn wait_idle(&self) -> VulkanResult<()>;

    /// Current surface capabilities, formats and present modes
    fn query_support(&self) -> VulkanResult<SurfaceSupport>;

    /// Create a complete chain following `plan`
    fn build(&self, plan: &SwapchainPlan) -> VulkanResult<Self::Chain>;
}

/// Block on window events until both framebuffer dimensions are nonzero
pub fn wait_for_nonzero_framebuffer<W: FramebufferSource>(window: &mut W) -> (u32, u32) {
    let mut size = window.framebuffer_size();
    if size.0 == 0 || size.1 == 0 {
        log::debug!("Framebuffer is {}x{}, waiting for the window to be restored", size.0, size.1);
    }
    while size.0 == 0 || size.1 == 0 {
        window.wait_events();
        size = window.framebuffer_size();
    }
    size
}

/// Owns the current chain and the rules for replacing it
pub struct SwapchainManager<C> {
    chain: Option<C>,
    preference: PresentModePreference,
    generation: u64,
}

impl<C: ChainInfo> SwapchainManager<C> {
    /// Build the first chain for a framebuffer of `framebuffer_size`
    pub fn create<F>(factory: &F, framebuffer_size: (u32, u32), preference: PresentModePreference) -> VulkanResult<Self>
    where
        F: ChainFactory<Chain = C>,
    {
        let mut manager = Self {
            chain: None,
            preference,
            generation: 0,
        };
        manager.build_chain(factory, framebuffer_size)?;
        Ok(manager)
    }

    /// Replace the chain to match the surface's current state
    ///
    /// Waits out a minimized window, then for device idle, then drops the old
    /// chain completely before creating the new one.
    pub fn recreate<F, W>(&mut self, factory: &F, window: &mut W) -> VulkanResult<()>
    where
        F: ChainFactory<Chain = C>,
        W: FramebufferSource,
    {
        let framebuffer_size = wait_for_nonzero_framebuffer(window);
        // Size changes seen up to here are covered by this rebuild
        window.take_resize_request();

        factory.wait_idle()?;
        self.chain = None;

        self.generation += 1;
        self.build_chain(factory, framebuffer_size)
    }

    /// Release the chain once the device is idle
    pub fn destroy<F>(&mut self, factory: &F) -> VulkanResult<()>
    where
        F: ChainFactory<Chain = C>,
    {
        if self.chain.is_some() {
            factory.wait_idle()?;
            self.chain = None;
        }
        Ok(())
    }

    fn build_chain<F>(&mut self, factory: &F, framebuffer_size: (u32, u32)) -> VulkanResult<()>
    where
        F: ChainFactory<Chain = C>,
    {
        let support = factory.query_support()?;
        let plan = SwapchainPlan::from_support(&support, framebuffer_size, self.preference)?;

        log::info!(
            "Swapchain: {:?}/{:?}, {:?}, {}x{}, {} images requested",
            plan.surface_format.format,
            plan.surface_format.color_space,
            plan.present_mode,
            plan.extent.width,
            plan.extent.height,
            plan.image_count
        );

        let chain = factory.build(&plan)?;
        debug_assert_eq!(chain.image_count(), chain.view_count());
        debug_assert_eq!(chain.image_count(), chain.framebuffer_count());

        self.chain = Some(chain);
        Ok(())
    }

    /// The current chain
    pub fn chain(&self) -> VulkanResult<&C> {
        self.chain.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Swapchain is not available".to_string(),
        })
    }

    /// Number of times the chain has been rebuilt
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Everything that depends on the swapchain images
///
/// Field order is the teardown order: framebuffers, depth buffer, then the
/// swapchain (which releases its views before its handle).
pub struct SwapchainState {
    framebuffers: Vec<Framebuffer>,
    depth: DepthBuffer,
    swapchain: Swapchain,
}

impl SwapchainState {
    /// Swapchain handle and image views
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Framebuffer for the image at `image_index`
    pub fn framebuffer(&self, image_index: u32) -> VulkanResult<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .map(Framebuffer::handle)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("Image index {image_index} out of range for {} framebuffers", self.framebuffers.len()),
            })
    }
}

impl ChainInfo for SwapchainState {
    fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    fn view_count(&self) -> usize {
        self.swapchain.image_views().len()
    }

    fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    fn format(&self) -> vk::SurfaceFormatKHR {
        self.swapchain.format()
    }
}

/// Builds [`SwapchainState`] on a live device
pub struct VulkanChainFactory<'a> {
    context: &'a VulkanContext,
    render_pass: vk::RenderPass,
    color_format: vk::Format,
}

impl<'a> VulkanChainFactory<'a> {
    /// Factory for chains compatible with `render_pass`
    ///
    /// `color_format` is the attachment format the render pass was created with.
    pub fn new(context: &'a VulkanContext, render_pass: vk::RenderPass, color_format: vk::Format) -> Self {
        Self {
            context,
            render_pass,
            color_format,
        }
    }
}

impl ChainFactory for VulkanChainFactory<'_> {
    type Chain = SwapchainState;

    fn wait_idle(&self) -> VulkanResult<()> {
        self.context.wait_idle()
    }

    fn query_support(&self) -> VulkanResult<SurfaceSupport> {
        SurfaceSupport::query(self.context.surface(), self.context.physical_device().device)
    }

    fn build(&self, plan: &SwapchainPlan) -> VulkanResult<SwapchainState> {
        if plan.surface_format.format != self.color_format {
            return Err(VulkanError::SurfaceIncompatible(format!(
                "surface format changed from {:?} to {:?}",
                self.color_format, plan.surface_format.format
            )));
        }

        let physical_device = self.context.physical_device();
        let swapchain = Swapchain::new(
            self.context.raw_device(),
            self.context.swapchain_loader().clone(),
            self.context.surface().handle(),
            [physical_device.graphics_family, physical_device.present_family],
            plan,
        )?;

        let depth = DepthBuffer::new(self.context.raw_device(), physical_device, plan.extent)?;

        let framebuffers = swapchain
            .image_views()
            .iter()
            .map(|&view| {
                Framebuffer::new(
                    self.context.raw_device(),
                    self.render_pass,
                    &[view, depth.image_view()],
                    plan.extent,
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        log::debug!("Swapchain built with {} images", swapchain.image_count());

        Ok(SwapchainState {
            framebuffers,
            depth,
            swapchain,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    struct MockChain {
        plan: SwapchainPlan,
        image_count: usize,
        log: Log,
    }

    impl ChainInfo for MockChain {
        fn image_count(&self) -> usize {
            self.image_count
        }

        fn view_count(&self) -> usize {
            self.image_count
        }

        fn framebuffer_count(&self) -> usize {
            self.image_count
        }

        fn extent(&self) -> vk::Extent2D {
            self.plan.extent
        }

        fn format(&self) -> vk::SurfaceFormatKHR {
            self.plan.surface_format
        }
    }

    impl Drop for MockChain {
        fn drop(&mut self) {
            self.log.borrow_mut().push("destroy".to_string());
        }
    }

    struct MockFactory {
        support: SurfaceSupport,
        log: Log,
    }

    impl MockFactory {
        fn new(log: &Log, current_extent: vk::Extent2D, min_images: u32, max_images: u32) -> Self {
            Self {
                support: SurfaceSupport {
                    capabilities: vk::SurfaceCapabilitiesKHR {
                        min_image_count: min_images,
                        max_image_count: max_images,
                        current_extent,
                        min_image_extent: vk::Extent2D { width: 1, height: 1 },
                        max_image_extent: vk::Extent2D { width: 8192, height: 8192 },
                        current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                        ..Default::default()
                    },
                    formats: vec![vk::SurfaceFormatKHR {
                        format: vk::Format::B8G8R8A8_SRGB,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    }],
                    present_modes: vec![vk::PresentModeKHR::FIFO],
                },
                log: Rc::clone(log),
            }
        }
    }

    impl ChainFactory for MockFactory {
        type Chain = MockChain;

        fn wait_idle(&self) -> VulkanResult<()> {
            self.log.borrow_mut().push("wait_idle".to_string());
            Ok(())
        }

        fn query_support(&self) -> VulkanResult<SurfaceSupport> {
            self.log.borrow_mut().push("query".to_string());
            Ok(self.support.clone())
        }

        fn build(&self, plan: &SwapchainPlan) -> VulkanResult<MockChain> {
            self.log.borrow_mut().push(format!("build {}x{}", plan.extent.width, plan.extent.height));
            Ok(MockChain {
                plan: *plan,
                image_count: plan.image_count as usize,
                log: Rc::clone(&self.log),
            })
        }
    }

    /// Window whose size steps through `sizes`, one step per event wait
    struct MockWindow {
        sizes: VecDeque<(u32, u32)>,
        resize_requested: bool,
        log: Log,
    }

    impl MockWindow {
        fn new(sizes: &[(u32, u32)], log: &Log) -> Self {
            Self {
                sizes: sizes.iter().copied().collect(),
                resize_requested: false,
                log: Rc::clone(log),
            }
        }
    }

    impl FramebufferSource for MockWindow {
        fn framebuffer_size(&self) -> (u32, u32) {
            self.sizes.front().copied().unwrap_or((0, 0))
        }

        fn wait_events(&mut self) {
            self.log.borrow_mut().push("wait_events".to_string());
            if self.sizes.len() > 1 {
                self.sizes.pop_front();
                // Restoring the window delivers a framebuffer size event
                self.resize_requested = true;
            }
        }

        fn take_resize_request(&mut self) -> bool {
            std::mem::take(&mut self.resize_requested)
        }
    }

    const UNDEFINED_EXTENT: vk::Extent2D = vk::Extent2D { width: u32::MAX, height: u32::MAX };

    fn new_log() -> Log {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn test_create_requests_min_plus_one_images() {
        let log = new_log();
        let factory = MockFactory::new(&log, vk::Extent2D { width: 800, height: 600 }, 2, 0);
        let manager = SwapchainManager::create(&factory, (800, 600), PresentModePreference::LowLatency).unwrap();

        let chain = manager.chain().unwrap();
        assert_eq!(chain.image_count(), 3);
        assert_eq!(chain.extent(), vk::Extent2D { width: 800, height: 600 });
    }

    #[test]
    fn test_create_clamps_to_max_two_images() {
        let log = new_log();
        let factory = MockFactory::new(&log, vk::Extent2D { width: 800, height: 600 }, 2, 2);
        let manager = SwapchainManager::create(&factory, (800, 600), PresentModePreference::LowLatency).unwrap();
        assert_eq!(manager.chain().unwrap().image_count(), 2);
    }

    #[test]
    fn test_recreate_waits_idle_before_teardown() {
        let log = new_log();
        let factory = MockFactory::new(&log, UNDEFINED_EXTENT, 2, 0);
        let mut manager = SwapchainManager::create(&factory, (800, 600), PresentModePreference::Fifo).unwrap();
        let mut window = MockWindow::new(&[(1024, 768)], &log);

        log.borrow_mut().clear();
        manager.recreate(&factory, &mut window).unwrap();

        assert_eq!(
            *log.borrow(),
            vec!["wait_idle", "destroy", "query", "build 1024x768"]
        );
        assert_eq!(manager.generation(), 1);
    }

    #[test]
    fn test_recreate_is_idempotent_for_unchanged_extent() {
        let log = new_log();
        let factory = MockFactory::new(&log, vk::Extent2D { width: 800, height: 600 }, 2, 0);
        let mut manager = SwapchainManager::create(&factory, (800, 600), PresentModePreference::LowLatency).unwrap();
        let mut window = MockWindow::new(&[(800, 600)], &log);

        let first = {
            let chain = manager.chain().unwrap();
            (chain.image_count(), chain.format(), chain.extent())
        };

        for _ in 0..3 {
            manager.recreate(&factory, &mut window).unwrap();
            let chain = manager.chain().unwrap();
            assert_eq!((chain.image_count(), chain.format(), chain.extent()), first);
        }
    }

    #[test]
    fn test_minimized_window_blocks_creation() {
        for minimized in [(0, 600), (800, 0)] {
            let log = new_log();
            let factory = MockFactory::new(&log, UNDEFINED_EXTENT, 2, 0);
            let mut manager = SwapchainManager::create(&factory, (800, 600), PresentModePreference::Fifo).unwrap();
            let mut window = MockWindow::new(&[minimized, (0, 0), (640, 480)], &log);

            log.borrow_mut().clear();
            manager.recreate(&factory, &mut window).unwrap();

            assert_eq!(
                *log.borrow(),
                vec!["wait_events", "wait_events", "wait_idle", "destroy", "query", "build 640x480"]
            );
            assert_eq!(manager.chain().unwrap().extent(), vk::Extent2D { width: 640, height: 480 });
        }
    }

    #[test]
    fn test_restore_from_minimize_rebuilds_once() {
        let log = new_log();
        let factory = MockFactory::new(&log, UNDEFINED_EXTENT, 2, 0);
        let mut manager = SwapchainManager::create(&factory, (800, 600), PresentModePreference::Fifo).unwrap();
        let mut window = MockWindow::new(&[(0, 0), (800, 600)], &log);

        log.borrow_mut().clear();
        manager.recreate(&factory, &mut window).unwrap();

        // The application loop forwards any pending request on the next frame
        for _ in 0..3 {
            if window.take_resize_request() {
                manager.recreate(&factory, &mut window).unwrap();
            }
        }

        let builds = log.borrow().iter().filter(|entry| entry.starts_with("build")).count();
        assert_eq!(builds, 1);
        assert_eq!(manager.generation(), 1);
    }

    #[test]
    fn test_destroy_waits_idle_first() {
        let log = new_log();
        let factory = MockFactory::new(&log, vk::Extent2D { width: 800, height: 600 }, 2, 0);
        let mut manager = SwapchainManager::create(&factory, (800, 600), PresentModePreference::Fifo).unwrap();

        log.borrow_mut().clear();
        manager.destroy(&factory).unwrap();
        manager.destroy(&factory).unwrap();

        assert_eq!(*log.borrow(), vec!["wait_idle", "destroy"]);
        assert!(manager.chain().is_err());
    }

    #[test]
    fn test_incompatible_surface_fails_creation() {
        let log = new_log();
        let mut factory = MockFactory::new(&log, vk::Extent2D { width: 800, height: 600 }, 2, 0);
        factory.support.formats.clear();

        let result = SwapchainManager::create(&factory, (800, 600), PresentModePreference::Fifo);
        assert!(matches!(result, Err(VulkanError::SurfaceIncompatible(_))));
        assert!(!log.borrow().iter().any(|entry| entry.starts_with("build")));
    }
}
