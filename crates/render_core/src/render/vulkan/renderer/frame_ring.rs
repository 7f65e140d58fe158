//! Frame synchronization ring
//!
//! A fixed number of frame slots, each owning the semaphores, fence and
//! command buffer for one frame in flight. The cursor selects the active slot.

use ash::{vk, Device};
use crate::render::vulkan::{CommandPool, Fence, Semaphore, VulkanResult, VulkanError};

/// Synchronization and recording state for one in-flight frame
///
/// `in_flight` is signaled exactly when the GPU has finished the last work
/// submitted from `command_buffer`; it is created signaled so the first wait
/// returns immediately.
pub struct FrameSlot {
    /// Signaled by image acquisition, waited on by the graphics submission
    pub image_available: Semaphore,
    /// Signaled by the graphics submission, waited on by presentation
    pub render_finished: Semaphore,
    /// Signaled when this slot's submission has completed on the GPU
    pub in_flight: Fence,
    /// Reset and re-recorded every time the slot comes around
    pub command_buffer: vk::CommandBuffer,
}

impl FrameSlot {
    fn new(device: &Device, command_buffer: vk::CommandBuffer) -> VulkanResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device.clone(), true)?,
            command_buffer,
        })
    }
}

/// Owns every frame slot and the single pool their command buffers come from
///
/// Command buffers are allocated once here and only ever reset afterwards.
/// Recording happens on one thread, so one pool serves all slots.
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    // Dropped after the slots; frees every command buffer with it
    command_pool: CommandPool,
}

impl FrameRing {
    /// Create `frame_count` slots whose buffers submit to `queue_family_index`
    pub fn new(device: Device, queue_family_index: u32, frame_count: usize) -> VulkanResult<Self> {
        if frame_count == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "A frame ring needs at least one slot".to_string(),
            });
        }

        let command_pool = CommandPool::new(device.clone(), queue_family_index)?;
        let buffer_count = u32::try_from(frame_count).map_err(|_| VulkanError::InvalidOperation {
            reason: format!("{frame_count} frame slots requested"),
        })?;
        let command_buffers = command_pool.allocate_command_buffers(buffer_count)?;

        let slots = command_buffers
            .into_iter()
            .map(|command_buffer| FrameSlot::new(&device, command_buffer))
            .collect::<VulkanResult<Vec<_>>>()?;

        log::debug!("Frame ring created with {} slots", slots.len());

        Ok(Self {
            slots,
            command_pool,
        })
    }

    /// Slot at `frame_index`, as given by a [`FrameCursor`]
    pub fn slot(&self, frame_index: usize) -> VulkanResult<&FrameSlot> {
        self.slots.get(frame_index).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("Frame index {frame_index} out of range for {} slots", self.slots.len()),
        })
    }

    /// Number of slots in the ring
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false; a ring has at least one slot
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Pool the slots' command buffers were allocated from
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }
}

/// Index of the active frame slot, cycling through `[0, frame_count)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCursor {
    index: usize,
    frame_count: usize,
}

impl FrameCursor {
    /// Cursor at slot 0 of a ring with `frame_count` slots
    pub fn new(frame_count: usize) -> Self {
        Self {
            index: 0,
            frame_count: frame_count.max(1),
        }
    }

    /// Current slot index, also the per-frame uniform index
    pub fn index(self) -> usize {
        self.index
    }

    /// Move to the next slot, wrapping around
    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.frame_count;
    }

    /// Number of slots the cursor cycles through
    pub fn frame_count(self) -> usize {
        self.frame_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_wraps() {
        let mut cursor = FrameCursor::new(2);
        assert_eq!(cursor.index(), 0);
        cursor.advance();
        assert_eq!(cursor.index(), 1);
        cursor.advance();
        assert_eq!(cursor.index(), 0);
    }

    #[test]
    fn test_cursor_stays_in_range() {
        let mut cursor = FrameCursor::new(3);
        for _ in 0..100 {
            cursor.advance();
            assert!(cursor.index() < cursor.frame_count());
        }
        assert_eq!(cursor.index(), 100 % 3);
    }

    #[test]
    fn test_single_slot_cursor() {
        let mut cursor = FrameCursor::new(1);
        cursor.advance();
        assert_eq!(cursor.index(), 0);
        assert_eq!(FrameCursor::new(0).frame_count(), 1);
    }
}
