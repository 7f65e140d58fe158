//! Buffer management for vertex, index, uniform and staging data
//!
//! Buffers own their memory. Device-local buffers are filled through a
//! temporary host-visible staging buffer and a one-time transfer.

use ash::{vk, Device};
use crate::render::vulkan::{CommandPool, PhysicalDeviceInfo, VulkanResult, VulkanError};

/// Buffer wrapper with memory management
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Create a new buffer with its own memory allocation
    pub fn new(
        device: Device,
        physical_device: &PhysicalDeviceInfo,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device.create_buffer(&buffer_info, None)
                .map_err(|r| VulkanError::from_result("create buffer", r))?
        };

        let mut owned = Self {
            device,
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
        };

        let mem_requirements = unsafe { owned.device.get_buffer_memory_requirements(buffer) };
        let memory_type_index = physical_device.find_memory_type(mem_requirements.memory_type_bits, properties)?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);

        unsafe {
            owned.memory = owned.device.allocate_memory(&alloc_info, None)
                .map_err(|r| VulkanError::from_result("allocate buffer memory", r))?;
            owned.device.bind_buffer_memory(buffer, owned.memory, 0)
                .map_err(|r| VulkanError::from_result("bind buffer memory", r))?;
        }

        Ok(owned)
    }

    /// Host-visible, coherent buffer
    pub fn host_visible(
        device: Device,
        physical_device: &PhysicalDeviceInfo,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<Self> {
        Self::new(
            device,
            physical_device,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Device-local buffer filled with `bytes` through a staging copy
    ///
    /// Blocks until the transfer has finished on `queue`.
    pub fn device_local_with_data(
        device: Device,
        physical_device: &PhysicalDeviceInfo,
        command_pool: &CommandPool,
        queue: vk::Queue,
        usage: vk::BufferUsageFlags,
        bytes: &[u8],
    ) -> VulkanResult<Self> {
        let size = bytes.len() as vk::DeviceSize;

        let staging = Self::host_visible(device.clone(), physical_device, size, vk::BufferUsageFlags::TRANSFER_SRC)?;
        staging.write_bytes(0, bytes)?;

        let buffer = Self::new(
            device,
            physical_device,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        command_pool.execute_one_time(queue, |encoder| {
            encoder.copy_buffer(staging.handle(), buffer.handle(), size);
            Ok(())
        })?;

        Ok(buffer)
    }

    /// Copy `bytes` into the buffer at `offset`
    ///
    /// The buffer must be host-visible and coherent, and the range must not be
    /// read by GPU work that is still in flight.
    pub fn write_bytes(&self, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        let len = bytes.len() as vk::DeviceSize;
        if offset + len > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Write of {len} bytes at {offset} overflows buffer of {}", self.size),
            });
        }

        unsafe {
            let dst = self.device
                .map_memory(self.memory, offset, len, vk::MemoryMapFlags::empty())
                .map_err(|r| VulkanError::from_result("map buffer memory", r))?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.cast::<u8>(), bytes.len());
            self.device.unmap_memory(self.memory);
        }

        Ok(())
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}
