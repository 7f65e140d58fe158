//! Command recording for one frame
//!
//! Encodes the single model draw into a frame slot's command buffer.

use ash::{vk, Device};
use crate::render::vulkan::{CommandEncoder, VulkanResult};

/// Handles for one draw into one swapchain image
#[derive(Debug, Clone, Copy)]
pub struct DrawCall {
    /// Forward render pass
    pub render_pass: vk::RenderPass,
    /// Framebuffer of the acquired image
    pub framebuffer: vk::Framebuffer,
    /// Current swapchain extent
    pub extent: vk::Extent2D,
    /// Model pipeline
    pub pipeline: vk::Pipeline,
    /// Layout the descriptor set is bound against
    pub pipeline_layout: vk::PipelineLayout,
    /// Frame slot's descriptor set
    pub descriptor_set: vk::DescriptorSet,
    /// Vertex buffer at binding 0
    pub vertex_buffer: vk::Buffer,
    /// 32-bit index buffer
    pub index_buffer: vk::Buffer,
    /// Number of indices to draw
    pub index_count: u32,
}

/// Viewport covering the whole extent with the full depth range
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Scissor covering the whole extent
pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Records the per-frame draw
pub struct CommandRecorder {
    device: Device,
    clear_values: [vk::ClearValue; 2],
}

impl CommandRecorder {
    /// Recorder clearing color to `clear_color` and depth to 1.0
    pub fn new(device: Device, clear_color: [f32; 4]) -> Self {
        Self {
            device,
            clear_values: [
                vk::ClearValue {
                    color: vk::ClearColorValue { float32: clear_color },
                },
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
                },
            ],
        }
    }

    /// Reset `command_buffer` and record `draw` into it
    pub fn record(&self, command_buffer: vk::CommandBuffer, draw: &DrawCall) -> VulkanResult<()> {
        let encoder = CommandEncoder::new(self.device.clone(), command_buffer);
        encoder.reset()?;
        encoder.begin(vk::CommandBufferUsageFlags::empty())?;

        {
            let mut pass = encoder.begin_render_pass(
                draw.render_pass,
                draw.framebuffer,
                full_scissor(draw.extent),
                &self.clear_values,
            );

            pass.bind_pipeline(draw.pipeline);
            pass.set_viewport(&full_viewport(draw.extent));
            pass.set_scissor(&full_scissor(draw.extent));
            pass.bind_vertex_buffers(0, &[draw.vertex_buffer], &[0]);
            pass.bind_index_buffer(draw.index_buffer, 0, vk::IndexType::UINT32);
            pass.bind_descriptor_sets(draw.pipeline_layout, 0, &[draw.descriptor_set]);
            pass.draw_indexed(draw.index_count, 1, 0, 0, 0);
        }

        encoder.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_viewport_covers_extent() {
        let viewport = full_viewport(vk::Extent2D { width: 800, height: 600 });
        assert_relative_eq!(viewport.width, 800.0);
        assert_relative_eq!(viewport.height, 600.0);
        assert_relative_eq!(viewport.min_depth, 0.0);
        assert_relative_eq!(viewport.max_depth, 1.0);
    }

    #[test]
    fn test_scissor_covers_extent() {
        let extent = vk::Extent2D { width: 1280, height: 720 };
        let scissor = full_scissor(extent);
        assert_eq!(scissor.offset.x, 0);
        assert_eq!(scissor.offset.y, 0);
        assert_eq!(scissor.extent, extent);
    }
}
