//! Vulkan renderer
//!
//! [`VulkanRenderer`] owns the context, the swapchain, the frame ring and the
//! model resources, and hands them to the [`PresentationLoop`] once per frame
//! through [`VulkanFrameTarget`].

pub mod command_recorder;
pub mod frame_ring;
pub mod presentation;
pub mod resource_manager;
pub mod swapchain_manager;

pub use command_recorder::{CommandRecorder, DrawCall};
pub use frame_ring::{FrameCursor, FrameRing, FrameSlot};
pub use presentation::{
    AcquireStatus, AcquiredImage, Acquisition, FrameOutcome, FrameTarget, LoopState, PresentStatus,
    PresentationLoop, RecreateCause,
};
pub use resource_manager::ResourceManager;
pub use swapchain_manager::{ChainFactory, ChainInfo, SwapchainManager, SwapchainState, VulkanChainFactory};

use ash::vk;

use crate::core::config::{AssetConfig, RendererConfig};
use crate::render::uniforms::UniformBufferObject;
use crate::render::vulkan::swapchain::choose_surface_format;
use crate::render::vulkan::{
    FramebufferSource, RenderPass, SurfaceSupport, VulkanContext, VulkanResult, VulkanError, Window,
};

/// Default number of frames the CPU may run ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Model viewer renderer
///
/// Field order is the destruction order; `Drop` waits for the device to go
/// idle before any of it is released.
pub struct VulkanRenderer {
    presentation: PresentationLoop,
    ring: FrameRing,
    resources: ResourceManager,
    swapchains: SwapchainManager<SwapchainState>,
    command_recorder: CommandRecorder,
    render_pass: RenderPass,
    color_format: vk::Format,
    pending_uniforms: Option<UniformBufferObject>,
    context: VulkanContext,
}

impl VulkanRenderer {
    /// Create the renderer for `window`
    pub fn new(window: &mut Window, config: &RendererConfig, assets: &AssetConfig) -> VulkanResult<Self> {
        config.validate().map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        log::debug!("Creating VulkanRenderer with {} frames in flight", config.max_frames_in_flight);

        let context = VulkanContext::new(window, config)?;

        let support = SurfaceSupport::query(context.surface(), context.physical_device().device)?;
        let color_format = choose_surface_format(&support.formats)
            .ok_or_else(|| VulkanError::SurfaceIncompatible("surface reports no formats".to_string()))?
            .format;
        let render_pass = RenderPass::new_forward_pass(context.raw_device(), color_format)?;

        let framebuffer_size = swapchain_manager::wait_for_nonzero_framebuffer(window);
        let swapchains = {
            let factory = VulkanChainFactory::new(&context, render_pass.handle(), color_format);
            SwapchainManager::create(&factory, framebuffer_size, config.present_mode)?
        };

        let ring = FrameRing::new(
            context.raw_device(),
            context.graphics_queue_family(),
            config.max_frames_in_flight,
        )?;

        let resources = ResourceManager::new(
            &context,
            ring.command_pool(),
            render_pass.handle(),
            assets,
            config.max_frames_in_flight,
        )?;
        log::debug!("Texture has {} mip levels", resources.texture_mip_levels());

        let command_recorder = CommandRecorder::new(context.raw_device(), config.clear_color);

        log::info!("Vulkan renderer ready");
        Ok(Self {
            presentation: PresentationLoop::new(config.max_frames_in_flight),
            ring,
            resources,
            swapchains,
            command_recorder,
            render_pass,
            color_format,
            pending_uniforms: None,
            context,
        })
    }

    /// Render and present one frame
    ///
    /// A stale swapchain is rebuilt internally (blocking on `window` while it
    /// is minimized); any error returned is fatal.
    pub fn draw_frame<W: FramebufferSource>(&mut self, window: &mut W) -> VulkanResult<FrameOutcome> {
        let mut target = VulkanFrameTarget {
            context: &self.context,
            ring: &self.ring,
            resources: &self.resources,
            swapchains: &mut self.swapchains,
            command_recorder: &self.command_recorder,
            render_pass: self.render_pass.handle(),
            color_format: self.color_format,
            uniforms: self.pending_uniforms.as_ref(),
            window,
        };

        let outcome = self.presentation.run_frame(&mut target)?;
        if let FrameOutcome::Recreated(cause) = outcome {
            log::debug!("Swapchain generation {} after {:?}", self.swapchains.generation(), cause);
        }
        Ok(outcome)
    }

    /// Rebuild the swapchain after the next present
    pub fn request_resize(&mut self) {
        self.presentation.request_resize();
    }

    /// Uniforms written into the active slot's region on the next frame
    pub fn update_uniforms(&mut self, ubo: UniformBufferObject) {
        self.pending_uniforms = Some(ubo);
    }

    /// Current swapchain extent
    pub fn swapchain_extent(&self) -> VulkanResult<vk::Extent2D> {
        Ok(self.swapchains.chain()?.extent())
    }

    /// Width over height of the swapchain images
    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain_extent()
            .map(|extent| extent.width as f32 / extent.height.max(1) as f32)
            .unwrap_or(1.0)
    }

    /// Render pass the framebuffers and pipeline are built for
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle()
    }

    /// Frames actually handed to the display so far
    pub fn frames_presented(&self) -> u64 {
        self.presentation.frames_presented()
    }

    /// Slot the next frame will use, in `[0, frames in flight)`
    pub fn frame_index(&self) -> usize {
        self.presentation.frame_index()
    }

    /// Block until the GPU has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        self.context.wait_idle()
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        log::debug!("Destroying VulkanRenderer");
        if let Err(e) = self.context.wait_idle() {
            log::error!("Failed to wait for device idle during shutdown: {}", e);
        }

        let factory = VulkanChainFactory::new(&self.context, self.render_pass.handle(), self.color_format);
        if let Err(e) = self.swapchains.destroy(&factory) {
            log::error!("Failed to destroy swapchain: {}", e);
        }
    }
}

/// The renderer's device state, borrowed for one frame
pub struct VulkanFrameTarget<'a, W> {
    context: &'a VulkanContext,
    ring: &'a FrameRing,
    resources: &'a ResourceManager,
    swapchains: &'a mut SwapchainManager<SwapchainState>,
    command_recorder: &'a CommandRecorder,
    render_pass: vk::RenderPass,
    color_format: vk::Format,
    uniforms: Option<&'a UniformBufferObject>,
    window: &'a mut W,
}

impl<W: FramebufferSource> FrameTarget for VulkanFrameTarget<'_, W> {
    fn wait_for_slot(&mut self, frame_index: usize) -> VulkanResult<()> {
        self.ring.slot(frame_index)?.in_flight.wait(u64::MAX)
    }

    fn acquire_image(&mut self, frame_index: usize) -> VulkanResult<Acquisition> {
        let slot = self.ring.slot(frame_index)?;
        let chain = self.swapchains.chain()?;

        match chain.swapchain().acquire_next_image(slot.image_available.handle(), u64::MAX) {
            Ok((image_index, suboptimal)) => Ok(Acquisition::Image(AcquiredImage {
                image_index,
                status: if suboptimal { AcquireStatus::Suboptimal } else { AcquireStatus::Success },
            })),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquisition::OutOfDate),
            Err(result) => Err(VulkanError::from_result("acquire next image", result)),
        }
    }

    fn prepare_frame(&mut self, frame_index: usize, _image: &AcquiredImage) -> VulkanResult<()> {
        match self.uniforms {
            Some(ubo) => self.resources.write_uniforms(frame_index, ubo),
            None => Ok(()),
        }
    }

    fn record_commands(&mut self, frame_index: usize, image: &AcquiredImage) -> VulkanResult<()> {
        let slot = self.ring.slot(frame_index)?;
        let chain = self.swapchains.chain()?;

        let draw = self.resources.draw_call(
            chain.framebuffer(image.image_index)?,
            chain.extent(),
            self.render_pass,
            frame_index,
        )?;
        self.command_recorder.record(slot.command_buffer, &draw)
    }

    fn submit(&mut self, frame_index: usize) -> VulkanResult<()> {
        let slot = self.ring.slot(frame_index)?;

        let wait_semaphores = [slot.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [slot.command_buffer];
        let signal_semaphores = [slot.render_finished.handle()];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // Reset only now that work is certain to be submitted
        slot.in_flight.reset()?;

        unsafe {
            self.context.device().device
                .queue_submit(self.context.graphics_queue(), &[submit_info.build()], slot.in_flight.handle())
                .map_err(|r| VulkanError::from_result("queue submit", r))
        }
    }

    fn present(&mut self, frame_index: usize, image: &AcquiredImage) -> VulkanResult<PresentStatus> {
        let slot = self.ring.slot(frame_index)?;
        let chain = self.swapchains.chain()?;

        match chain.swapchain().present(self.context.present_queue(), image.image_index, slot.render_finished.handle()) {
            Ok(false) => Ok(PresentStatus::Success),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(result) => Err(VulkanError::from_result("queue present", result)),
        }
    }

    fn recreate_swapchain(&mut self) -> VulkanResult<()> {
        let factory = VulkanChainFactory::new(self.context, self.render_pass, self.color_format);
        self.swapchains.recreate(&factory, &mut *self.window)?;

        let extent = self.swapchains.chain()?.extent();
        log::debug!("Swapchain recreated at {}x{}", extent.width, extent.height);
        Ok(())
    }
}
