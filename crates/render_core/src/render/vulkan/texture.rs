//! Sampled, mip-mapped textures
//!
//! Pixels are uploaded into mip level 0 through a staging buffer, then each
//! further level is produced by a linear blit from the one above it.

use ash::{vk, Device};
use image::RgbaImage;
use std::path::Path;

use crate::render::vulkan::{Buffer, CommandEncoder, CommandPool, VulkanContext, VulkanResult, VulkanError};
use crate::render::AssetError;

const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Number of mip levels for a `width` x `height` image, down to 1x1
pub fn mip_levels(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Size of the next smaller mip level
fn half_extent(size: i32) -> i32 {
    if size > 1 { size / 2 } else { 1 }
}

/// Load an image file as RGBA8
pub fn load_rgba(path: &str) -> Result<RgbaImage, AssetError> {
    let decoded = image::open(Path::new(path)).map_err(|source| AssetError::Image {
        path: path.to_string(),
        source,
    })?;
    Ok(decoded.to_rgba8())
}

/// Checkerboard used when no texture is configured
pub fn checkerboard(size: u32, cells: u32) -> RgbaImage {
    let cell = (size / cells.max(1)).max(1);
    RgbaImage::from_fn(size, size, |x, y| {
        if ((x / cell) + (y / cell)) % 2 == 0 {
            image::Rgba([230, 230, 230, 255])
        } else {
            image::Rgba([60, 60, 60, 255])
        }
    })
}

/// Texture image, view and sampler with RAII cleanup
pub struct Texture {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    image_view: vk::ImageView,
    sampler: vk::Sampler,
    mip_levels: u32,
}

impl Texture {
    /// Upload `pixels` and generate the full mip chain
    pub fn from_rgba(
        context: &VulkanContext,
        command_pool: &CommandPool,
        pixels: &RgbaImage,
    ) -> VulkanResult<Self> {
        let (width, height) = pixels.dimensions();
        let mip_levels = mip_levels(width, height);
        let device = context.raw_device();
        let physical_device = context.physical_device();

        let format_properties = unsafe {
            context.instance().get_physical_device_format_properties(physical_device.device, TEXTURE_FORMAT)
        };
        if !format_properties.optimal_tiling_features.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR) {
            return Err(VulkanError::InitializationFailed(
                "Texture format does not support linear blitting".to_string(),
            ));
        }

        let staging = Buffer::host_visible(
            device.clone(),
            physical_device,
            pixels.as_raw().len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )?;
        staging.write_bytes(0, pixels.as_raw())?;

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D { width, height, depth: 1 })
            .mip_levels(mip_levels)
            .array_layers(1)
            .format(TEXTURE_FORMAT)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(
                vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::SAMPLED
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe {
            device.create_image(&image_info, None)
                .map_err(|r| VulkanError::from_result("create texture image", r))?
        };

        // Drop releases partial state from here on
        let mut texture = Self {
            device,
            image,
            memory: vk::DeviceMemory::null(),
            image_view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            mip_levels,
        };

        let requirements = unsafe { texture.device.get_image_memory_requirements(image) };
        let memory_type_index = physical_device.find_memory_type(
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        unsafe {
            texture.memory = texture.device.allocate_memory(&alloc_info, None)
                .map_err(|r| VulkanError::from_result("allocate texture memory", r))?;
            texture.device.bind_image_memory(image, texture.memory, 0)
                .map_err(|r| VulkanError::from_result("bind texture memory", r))?;
        }

        command_pool.execute_one_time(context.graphics_queue(), |encoder| {
            encoder.pipeline_barrier(
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                &layout_barrier(
                    image,
                    0,
                    mip_levels,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::AccessFlags::empty(),
                    vk::AccessFlags::TRANSFER_WRITE,
                ),
            );
            encoder.copy_buffer_to_image(staging.handle(), image, vk::Extent2D { width, height });
            record_mip_chain(encoder, image, width, height, mip_levels);
            Ok(())
        })?;

        texture.image_view = texture.create_view()?;
        texture.sampler = texture.create_sampler(physical_device.properties.limits.max_sampler_anisotropy)?;

        log::debug!("Texture {}x{} uploaded with {} mip levels", width, height, mip_levels);
        Ok(texture)
    }

    /// Load a texture from disk, or a checkerboard when `path` is `None`
    pub fn load(context: &VulkanContext, command_pool: &CommandPool, path: Option<&str>) -> VulkanResult<Self> {
        let pixels = match path {
            Some(path) => load_rgba(path)?,
            None => checkerboard(256, 8),
        };
        Self::from_rgba(context, command_pool, &pixels)
    }

    fn create_view(&self) -> VulkanResult<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: self.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe {
            self.device.create_image_view(&view_info, None)
                .map_err(|r| VulkanError::from_result("create texture view", r))
        }
    }

    fn create_sampler(&self, max_anisotropy: f32) -> VulkanResult<vk::Sampler> {
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(max_anisotropy)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(self.mip_levels as f32)
            .mip_lod_bias(0.0);

        unsafe {
            self.device.create_sampler(&sampler_info, None)
                .map_err(|r| VulkanError::from_result("create texture sampler", r))
        }
    }

    /// Get the image view
    pub fn image_view(&self) -> vk::ImageView {
        self.image_view
    }

    /// Get the sampler
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Number of mip levels in the image
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
            self.device.destroy_image_view(self.image_view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Blit every level from its parent, leaving all levels shader-readable
fn record_mip_chain(encoder: &CommandEncoder, image: vk::Image, width: u32, height: u32, mip_levels: u32) {
    let mut mip_width = i32::try_from(width).unwrap_or(i32::MAX);
    let mut mip_height = i32::try_from(height).unwrap_or(i32::MAX);

    for level in 1..mip_levels {
        encoder.pipeline_barrier(
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
            &layout_barrier(
                image,
                level - 1,
                1,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::TRANSFER_READ,
            ),
        );

        let next_width = half_extent(mip_width);
        let next_height = half_extent(mip_height);

        let blit = vk::ImageBlit {
            src_subresource: color_layers(level - 1),
            src_offsets: [
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D { x: mip_width, y: mip_height, z: 1 },
            ],
            dst_subresource: color_layers(level),
            dst_offsets: [
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D { x: next_width, y: next_height, z: 1 },
            ],
        };
        encoder.blit_image(image, &blit);

        encoder.pipeline_barrier(
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            &layout_barrier(
                image,
                level - 1,
                1,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::AccessFlags::TRANSFER_READ,
                vk::AccessFlags::SHADER_READ,
            ),
        );

        mip_width = next_width;
        mip_height = next_height;
    }

    // The last level was only ever a blit destination
    encoder.pipeline_barrier(
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::FRAGMENT_SHADER,
        &layout_barrier(
            image,
            mip_levels - 1,
            1,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
        ),
    );
}

fn color_layers(mip_level: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn layout_barrier(
    image: vk::Image,
    base_mip_level: u32,
    level_count: u32,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access_mask: vk::AccessFlags,
    dst_access_mask: vk::AccessFlags,
) -> vk::ImageMemoryBarrier {
    vk::ImageMemoryBarrier::builder()
        .image(image)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .src_access_mask(src_access_mask)
        .dst_access_mask(dst_access_mask)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level,
            level_count,
            base_array_layer: 0,
            layer_count: 1,
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_levels_follow_largest_side() {
        assert_eq!(mip_levels(1, 1), 1);
        assert_eq!(mip_levels(2, 1), 2);
        assert_eq!(mip_levels(256, 256), 9);
        assert_eq!(mip_levels(1024, 512), 11);
        assert_eq!(mip_levels(1000, 3), 10);
    }

    #[test]
    fn test_half_extent_stops_at_one() {
        assert_eq!(half_extent(5), 2);
        assert_eq!(half_extent(2), 1);
        assert_eq!(half_extent(1), 1);
    }

    #[test]
    fn test_checkerboard_alternates() {
        let board = checkerboard(16, 4);
        assert_eq!(board.dimensions(), (16, 16));
        assert_ne!(board.get_pixel(0, 0), board.get_pixel(4, 0));
        assert_eq!(board.get_pixel(0, 0), board.get_pixel(4, 4));
    }

    #[test]
    fn test_missing_texture_file_is_reported() {
        let result = load_rgba("does/not/exist.png");
        assert!(matches!(result, Err(AssetError::Image { .. })));
    }
}
