//! Descriptor sets for per-frame shader resources
//!
//! Binding 0 is the frame's uniform region (vertex stage), binding 1 the
//! model texture (fragment stage). Each frame slot gets its own set so a
//! slot never reads a uniform region another slot is writing.

use ash::{vk, Device};
use crate::render::vulkan::{Texture, VulkanResult, VulkanError};

/// Descriptor layout, pool and one set per frame slot
pub struct FrameDescriptors {
    device: Device,
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
}

impl FrameDescriptors {
    /// Create the layout and write one set per region of `uniform_buffer`
    pub fn new(
        device: Device,
        uniform_buffer: vk::Buffer,
        region_size: vk::DeviceSize,
        frame_count: usize,
        texture: &Texture,
    ) -> VulkanResult<Self> {
        let bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::VERTEX)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
        ];

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout = unsafe {
            device.create_descriptor_set_layout(&layout_info, None)
                .map_err(|r| VulkanError::from_result("create descriptor set layout", r))?
        };

        let mut descriptors = Self {
            device,
            layout,
            pool: vk::DescriptorPool::null(),
            sets: Vec::new(),
        };

        let set_count = u32::try_from(frame_count).map_err(|_| VulkanError::InvalidOperation {
            reason: format!("{frame_count} descriptor sets requested"),
        })?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: set_count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: set_count,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(set_count);

        descriptors.pool = unsafe {
            descriptors.device.create_descriptor_pool(&pool_info, None)
                .map_err(|r| VulkanError::from_result("create descriptor pool", r))?
        };

        let layouts = vec![layout; frame_count];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(descriptors.pool)
            .set_layouts(&layouts);

        descriptors.sets = unsafe {
            descriptors.device.allocate_descriptor_sets(&alloc_info)
                .map_err(|r| VulkanError::from_result("allocate descriptor sets", r))?
        };

        for (frame, &set) in descriptors.sets.iter().enumerate() {
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer: uniform_buffer,
                offset: region_size * frame as vk::DeviceSize,
                range: region_size,
            }];
            let image_info = [vk::DescriptorImageInfo {
                sampler: texture.sampler(),
                image_view: texture.image_view(),
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }];

            let writes = [
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&buffer_info)
                    .build(),
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(1)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&image_info)
                    .build(),
            ];

            unsafe {
                descriptors.device.update_descriptor_sets(&writes, &[]);
            }
        }

        Ok(descriptors)
    }

    /// Layout shared by every set, needed by the pipeline layout
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Set for `frame_index`
    pub fn set(&self, frame_index: usize) -> VulkanResult<vk::DescriptorSet> {
        set_for_frame(&self.sets, frame_index)
    }
}

fn set_for_frame(sets: &[vk::DescriptorSet], frame_index: usize) -> VulkanResult<vk::DescriptorSet> {
    sets.get(frame_index).copied().ok_or_else(|| VulkanError::InvalidOperation {
        reason: format!("Frame index {frame_index} out of range for {} descriptor sets", sets.len()),
    })
}

impl Drop for FrameDescriptors {
    fn drop(&mut self) {
        unsafe {
            // Sets are freed with the pool
            self.device.destroy_descriptor_pool(self.pool, None);
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_set_lookup_by_frame() {
        let sets = [vk::DescriptorSet::from_raw(1), vk::DescriptorSet::from_raw(2)];
        assert_eq!(set_for_frame(&sets, 1).unwrap(), sets[1]);
        assert!(matches!(
            set_for_frame(&sets, 2),
            Err(VulkanError::InvalidOperation { .. })
        ));
    }
}
