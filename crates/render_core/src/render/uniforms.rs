//! Per-frame uniform data
//!
//! One uniform region per frame slot lives in a single host-visible buffer.
//! A region may only be written by the slot that owns it, after that slot's
//! fence has been waited on.

use ash::{vk, Device};
use bytemuck::{Pod, Zeroable};
use nalgebra::{Matrix4, Point3, Vector3};

use crate::render::vulkan::{Buffer, PhysicalDeviceInfo, VulkanResult, VulkanError};

/// Model, view and projection matrices in column-major order
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    /// Model to world
    pub model: [[f32; 4]; 4],
    /// World to camera
    pub view: [[f32; 4]; 4],
    /// Camera to Vulkan clip space
    pub proj: [[f32; 4]; 4],
}

/// Maps GL clip space (Y up, depth -1..1) onto Vulkan's (Y down, depth 0..1)
#[rustfmt::skip]
fn vulkan_clip_correction() -> Matrix4<f32> {
    Matrix4::new(
        1.0,  0.0, 0.0, 0.0,
        0.0, -1.0, 0.0, 0.0,
        0.0,  0.0, 0.5, 0.5,
        0.0,  0.0, 0.0, 1.0,
    )
}

impl UniformBufferObject {
    /// Build from nalgebra matrices, converting the projection for Vulkan
    pub fn new(model: Matrix4<f32>, view: Matrix4<f32>, gl_projection: Matrix4<f32>) -> Self {
        Self {
            model: model.into(),
            view: view.into(),
            proj: (vulkan_clip_correction() * gl_projection).into(),
        }
    }

    /// Model spinning about Z at 90 degrees per second, seen from above at 45 degrees
    pub fn spinning(elapsed_seconds: f32, aspect_ratio: f32) -> Self {
        let model = Matrix4::from_axis_angle(&Vector3::z_axis(), elapsed_seconds * std::f32::consts::FRAC_PI_2);
        let view = Matrix4::look_at_rh(
            &Point3::new(2.0, 2.0, 2.0),
            &Point3::origin(),
            &Vector3::z(),
        );
        let projection = Matrix4::new_perspective(aspect_ratio, std::f32::consts::FRAC_PI_4, 0.1, 10.0);
        Self::new(model, view, projection)
    }
}

/// Round `size` up to a multiple of `alignment` (a power of two, or 0)
pub fn aligned_region_size(size: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment == 0 {
        size
    } else {
        (size + alignment - 1) & !(alignment - 1)
    }
}

/// Host-visible buffer split into one uniform region per frame slot
pub struct FrameUniforms {
    buffer: Buffer,
    region_size: vk::DeviceSize,
    frame_count: usize,
}

impl FrameUniforms {
    /// Allocate `frame_count` aligned regions
    pub fn new(device: Device, physical_device: &PhysicalDeviceInfo, frame_count: usize) -> VulkanResult<Self> {
        let region_size = aligned_region_size(
            std::mem::size_of::<UniformBufferObject>() as vk::DeviceSize,
            physical_device.properties.limits.min_uniform_buffer_offset_alignment,
        );

        let buffer = Buffer::host_visible(
            device,
            physical_device,
            region_size * frame_count as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
        )?;

        Ok(Self {
            buffer,
            region_size,
            frame_count,
        })
    }

    /// Overwrite the region belonging to `frame_index`
    pub fn write(&self, frame_index: usize, ubo: &UniformBufferObject) -> VulkanResult<()> {
        if frame_index >= self.frame_count {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Frame index {frame_index} out of range for {} uniform regions", self.frame_count),
            });
        }
        let offset = self.region_size * frame_index as vk::DeviceSize;
        self.buffer.write_bytes(offset, bytemuck::bytes_of(ubo))
    }

    /// Underlying buffer handle
    pub fn buffer(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Stride between two frames' regions
    pub fn region_size(&self) -> vk::DeviceSize {
        self.region_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector4;

    #[test]
    fn test_region_alignment() {
        assert_eq!(aligned_region_size(192, 256), 256);
        assert_eq!(aligned_region_size(256, 256), 256);
        assert_eq!(aligned_region_size(192, 64), 192);
        assert_eq!(aligned_region_size(100, 0), 100);
    }

    #[test]
    fn test_ubo_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<UniformBufferObject>(), 192);
    }

    #[test]
    fn test_projection_flips_y_and_maps_depth_to_unit_range() {
        let ubo = UniformBufferObject::new(
            Matrix4::identity(),
            Matrix4::identity(),
            Matrix4::new_perspective(1.0, std::f32::consts::FRAC_PI_2, 1.0, 10.0),
        );
        let proj = Matrix4::from(ubo.proj);

        let up = proj * Vector4::new(0.0, 1.0, -2.0, 1.0);
        assert!(up.y / up.w < 0.0);

        let near = proj * Vector4::new(0.0, 0.0, -1.0, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);

        let far = proj * Vector4::new(0.0, 0.0, -10.0, 1.0);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_spinning_model_rotates_quarter_turn_per_second() {
        let ubo = UniformBufferObject::spinning(1.0, 4.0 / 3.0);
        let model = Matrix4::from(ubo.model);
        let x = model * Vector4::new(1.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(x.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(x.y, 1.0, epsilon = 1e-5);
    }
}
