//! Resource management for the Vulkan renderer
//!
//! Loads the model, texture and shaders once at startup and owns the buffers,
//! descriptors and pipeline the per-frame draw refers to. None of these depend
//! on the swapchain, so they survive recreation untouched.

use ash::vk;

use crate::core::config::AssetConfig;
use crate::render::mesh::Mesh;
use crate::render::uniforms::{FrameUniforms, UniformBufferObject};
use crate::render::vulkan::renderer::command_recorder::DrawCall;
use crate::render::vulkan::{
    Buffer, CommandPool, FrameDescriptors, GraphicsPipeline, ShaderModule, Texture, VulkanContext, VulkanResult,
};

/// GPU resources referenced by every frame
///
/// Field order is the destruction order.
pub struct ResourceManager {
    pipeline: GraphicsPipeline,
    descriptors: FrameDescriptors,
    uniforms: FrameUniforms,
    texture: Texture,
    index_buffer: Buffer,
    vertex_buffer: Buffer,
    index_count: u32,
}

impl ResourceManager {
    /// Load assets and build the pipeline for `render_pass`
    ///
    /// Uploads go through `command_pool` on the graphics queue and complete
    /// before this returns.
    pub fn new(
        context: &VulkanContext,
        command_pool: &CommandPool,
        render_pass: vk::RenderPass,
        assets: &AssetConfig,
        frame_count: usize,
    ) -> VulkanResult<Self> {
        log::debug!("Creating ResourceManager...");

        let device = context.raw_device();
        let physical_device = context.physical_device();

        let mesh = Mesh::load_or_quad(assets.model_path.as_deref())?;
        let vertex_buffer = Buffer::device_local_with_data(
            device.clone(),
            physical_device,
            command_pool,
            context.graphics_queue(),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&mesh.vertices),
        )?;
        let index_buffer = Buffer::device_local_with_data(
            device.clone(),
            physical_device,
            command_pool,
            context.graphics_queue(),
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(&mesh.indices),
        )?;

        let texture = Texture::load(context, command_pool, assets.texture_path.as_deref())?;
        let uniforms = FrameUniforms::new(device.clone(), physical_device, frame_count)?;
        let descriptors = FrameDescriptors::new(
            device.clone(),
            uniforms.buffer(),
            uniforms.region_size(),
            frame_count,
            &texture,
        )?;

        let vertex_shader = ShaderModule::from_file(device.clone(), &assets.vertex_shader_path)?;
        let fragment_shader = ShaderModule::from_file(device.clone(), &assets.fragment_shader_path)?;
        let pipeline = GraphicsPipeline::new(
            device,
            render_pass,
            &vertex_shader,
            &fragment_shader,
            descriptors.layout(),
        )?;

        Ok(Self {
            pipeline,
            descriptors,
            uniforms,
            texture,
            index_buffer,
            vertex_buffer,
            index_count: mesh.index_count(),
        })
    }

    /// Write the uniform region of `frame_index`
    ///
    /// Only valid after that slot's fence has been waited on.
    pub fn write_uniforms(&self, frame_index: usize, ubo: &UniformBufferObject) -> VulkanResult<()> {
        self.uniforms.write(frame_index, ubo)
    }

    /// Everything needed to draw the model into `framebuffer`
    pub fn draw_call(
        &self,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        render_pass: vk::RenderPass,
        frame_index: usize,
    ) -> VulkanResult<DrawCall> {
        Ok(DrawCall {
            render_pass,
            framebuffer,
            extent,
            pipeline: self.pipeline.handle(),
            pipeline_layout: self.pipeline.layout(),
            descriptor_set: self.descriptors.set(frame_index)?,
            vertex_buffer: self.vertex_buffer.handle(),
            index_buffer: self.index_buffer.handle(),
            index_count: self.index_count,
        })
    }

    /// Mip levels of the loaded texture
    pub fn texture_mip_levels(&self) -> u32 {
        self.texture.mip_levels()
    }
}
