//! Command buffer management
//!
//! `CommandPool` owns the pool every command buffer is allocated from;
//! `CommandEncoder` drives a single buffer through reset, begin and end;
//! `ActiveRenderPass` scopes the commands recorded inside a render pass and
//! ends the pass when dropped.

use ash::{vk, Device};
use crate::render::vulkan::{VulkanResult, VulkanError};

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe {
            device.create_command_pool(&pool_create_info, None)
                .map_err(|r| VulkanError::from_result("create command pool", r))?
        };

        Ok(Self {
            device,
            command_pool,
        })
    }

    /// Allocate primary command buffers
    pub fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe {
            self.device.allocate_command_buffers(&alloc_info)
                .map_err(|r| VulkanError::from_result("allocate command buffers", r))
        }
    }

    /// Record commands with `record`, submit them to `queue` and wait for completion
    ///
    /// Used for setup work such as staging uploads and layout transitions.
    pub fn execute_one_time<F>(&self, queue: vk::Queue, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&CommandEncoder) -> VulkanResult<()>,
    {
        let command_buffer = self.allocate_command_buffers(1)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "Driver returned no command buffer".to_string(),
            })?;

        let result = self.record_and_wait(queue, command_buffer, record);

        unsafe {
            self.device.free_command_buffers(self.command_pool, &[command_buffer]);
        }

        result
    }

    fn record_and_wait<F>(&self, queue: vk::Queue, command_buffer: vk::CommandBuffer, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&CommandEncoder) -> VulkanResult<()>,
    {
        let encoder = CommandEncoder::new(self.device.clone(), command_buffer);
        encoder.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        record(&encoder)?;
        encoder.end()?;

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

        unsafe {
            self.device.queue_submit(queue, &[submit_info.build()], vk::Fence::null())
                .map_err(|r| VulkanError::from_result("submit one-time commands", r))?;
            self.device.queue_wait_idle(queue)
                .map_err(|r| VulkanError::from_result("wait for one-time commands", r))
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            // Destroying the pool frees every buffer allocated from it
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Records into one command buffer it does not own
pub struct CommandEncoder {
    device: Device,
    command_buffer: vk::CommandBuffer,
}

impl CommandEncoder {
    /// Wrap a command buffer allocated from a [`CommandPool`]
    pub fn new(device: Device, command_buffer: vk::CommandBuffer) -> Self {
        Self {
            device,
            command_buffer,
        }
    }

    /// Return the buffer to the initial state, discarding earlier recordings
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device.reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(|r| VulkanError::from_result("reset command buffer", r))
        }
    }

    /// Begin recording
    pub fn begin(&self, flags: vk::CommandBufferUsageFlags) -> VulkanResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);

        unsafe {
            self.device.begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(|r| VulkanError::from_result("begin command buffer", r))
        }
    }

    /// Finish recording
    pub fn end(&self) -> VulkanResult<()> {
        unsafe {
            self.device.end_command_buffer(self.command_buffer)
                .map_err(|r| VulkanError::from_result("end command buffer", r))
        }
    }

    /// Begin a render pass with inline subpass contents
    pub fn begin_render_pass(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    ) -> ActiveRenderPass<'_> {
        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);

        unsafe {
            self.device.cmd_begin_render_pass(
                self.command_buffer,
                &render_pass_begin,
                vk::SubpassContents::INLINE,
            );
        }

        ActiveRenderPass { encoder: self }
    }

    /// Record an image memory barrier between two pipeline stages
    pub fn pipeline_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier,
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(barrier),
            );
        }
    }

    /// Copy a whole region between two buffers
    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            self.device.cmd_copy_buffer(self.command_buffer, src, dst, &[region]);
        }
    }

    /// Copy a tightly packed buffer into mip level 0 of an image
    pub fn copy_buffer_to_image(&self, src: vk::Buffer, image: vk::Image, extent: vk::Extent2D) {
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        };
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                self.command_buffer,
                src,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    /// Blit between two mip levels of the same image with linear filtering
    pub fn blit_image(&self, image: vk::Image, region: &vk::ImageBlit) {
        unsafe {
            self.device.cmd_blit_image(
                self.command_buffer,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(region),
                vk::Filter::LINEAR,
            );
        }
    }
}

/// Commands recorded inside a render pass; the pass ends on drop
pub struct ActiveRenderPass<'a> {
    encoder: &'a CommandEncoder,
}

impl<'a> ActiveRenderPass<'a> {
    /// Set viewport
    pub fn set_viewport(&mut self, viewport: &vk::Viewport) {
        unsafe {
            self.encoder.device.cmd_set_viewport(
                self.encoder.command_buffer,
                0,
                std::slice::from_ref(viewport),
            );
        }
    }

    /// Set scissor
    pub fn set_scissor(&mut self, scissor: &vk::Rect2D) {
        unsafe {
            self.encoder.device.cmd_set_scissor(
                self.encoder.command_buffer,
                0,
                std::slice::from_ref(scissor),
            );
        }
    }

    /// Bind graphics pipeline
    pub fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.encoder.device.cmd_bind_pipeline(
                self.encoder.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
    }

    /// Bind vertex buffers
    pub fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        unsafe {
            self.encoder.device.cmd_bind_vertex_buffers(self.encoder.command_buffer, first_binding, buffers, offsets);
        }
    }

    /// Bind index buffer
    pub fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe {
            self.encoder.device.cmd_bind_index_buffer(self.encoder.command_buffer, buffer, offset, index_type);
        }
    }

    /// Bind descriptor sets to the graphics bind point
    pub fn bind_descriptor_sets(&mut self, layout: vk::PipelineLayout, first_set: u32, sets: &[vk::DescriptorSet]) {
        unsafe {
            self.encoder.device.cmd_bind_descriptor_sets(
                self.encoder.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                first_set,
                sets,
                &[],
            );
        }
    }

    /// Draw indexed
    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32, first_instance: u32) {
        unsafe {
            self.encoder.device.cmd_draw_indexed(
                self.encoder.command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }
}

impl<'a> Drop for ActiveRenderPass<'a> {
    fn drop(&mut self) {
        unsafe {
            self.encoder.device.cmd_end_render_pass(self.encoder.command_buffer);
        }
    }
}
