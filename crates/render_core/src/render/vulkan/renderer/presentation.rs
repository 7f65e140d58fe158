//! Presentation loop
//!
//! Drives one frame per call: wait for the slot's fence, acquire an image,
//! update per-frame data, record, submit, present, advance. A stale swapchain
//! (out of date or suboptimal) is handled here by recreating it and never
//! reaches the caller as an error; every other failure ends the loop.
//!
//! The device is reached only through [`FrameTarget`], which keeps the state
//! machine independent of Vulkan handles.

use crate::render::vulkan::renderer::frame_ring::FrameCursor;
use crate::render::vulkan::VulkanResult;

/// Where the loop is within the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Between frames
    Idle,
    /// Waiting for the slot's fence and a swapchain image
    Acquiring,
    /// Writing per-frame data and recording the command buffer
    Recording,
    /// Handing the command buffer to the graphics queue
    Submitting,
    /// Queueing the image for display
    Presenting,
    /// Rebuilding the swapchain
    Recreating,
}

/// How the swapchain reported an acquired image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    /// Image matches the surface exactly
    Success,
    /// Image is usable but no longer matches the surface exactly
    Suboptimal,
}

/// A swapchain image acquired for the current frame only
///
/// Never kept across frames; after recreation the same index may name a
/// different image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    /// Index into the swapchain's images and framebuffers
    pub image_index: u32,
    /// Acquire result
    pub status: AcquireStatus,
}

/// Result of asking the swapchain for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// An image is ready once the slot's image-available semaphore signals
    Image(AcquiredImage),
    /// The swapchain no longer matches the surface and cannot be used
    OutOfDate,
}

/// Result of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    /// Presented and still matching the surface
    Success,
    /// Presented, but the swapchain should be rebuilt
    Suboptimal,
    /// Not presented; the swapchain must be rebuilt
    OutOfDate,
}

/// Why the swapchain was rebuilt during a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateCause {
    /// Acquire reported out of date; nothing was drawn
    AcquireOutOfDate,
    /// Present reported out of date
    PresentOutOfDate,
    /// Present reported suboptimal
    PresentSuboptimal,
    /// The window reported a new framebuffer size
    ResizeRequested,
}

/// What a call to [`PresentationLoop::run_frame`] achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was presented and the swapchain is current
    Presented,
    /// The swapchain was rebuilt
    Recreated(RecreateCause),
}

/// Device operations one frame is made of
///
/// `frame_index` is the active slot in `[0, frames in flight)`.
pub trait FrameTarget {
    /// Block until the slot's previous submission has finished, without timeout
    fn wait_for_slot(&mut self, frame_index: usize) -> VulkanResult<()>;

    /// Acquire the next image, signaling the slot's image-available semaphore
    fn acquire_image(&mut self, frame_index: usize) -> VulkanResult<Acquisition>;

    /// Write per-frame data owned by the slot, such as its uniform region
    fn prepare_frame(&mut self, frame_index: usize, image: &AcquiredImage) -> VulkanResult<()>;

    /// Reset the slot's command buffer and record the draw for `image`
    fn record_commands(&mut self, frame_index: usize, image: &AcquiredImage) -> VulkanResult<()>;

    /// Reset the slot's fence and submit its command buffer
    fn submit(&mut self, frame_index: usize) -> VulkanResult<()>;

    /// Present `image` once the slot's render-finished semaphore signals
    fn present(&mut self, frame_index: usize, image: &AcquiredImage) -> VulkanResult<PresentStatus>;

    /// Rebuild the swapchain for the current surface
    fn recreate_swapchain(&mut self) -> VulkanResult<()>;
}

/// Frame state machine: cursor, resize flag and current state
#[derive(Debug)]
pub struct PresentationLoop {
    cursor: FrameCursor,
    resize_requested: bool,
    state: LoopState,
    frames_presented: u64,
}

impl PresentationLoop {
    /// Loop cycling through `frame_count` slots
    pub fn new(frame_count: usize) -> Self {
        Self {
            cursor: FrameCursor::new(frame_count),
            resize_requested: false,
            state: LoopState::Idle,
            frames_presented: 0,
        }
    }

    /// Rebuild the swapchain after the next present
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    /// Whether a resize is pending
    pub fn resize_requested(&self) -> bool {
        self.resize_requested
    }

    /// Slot the next frame will use
    pub fn frame_index(&self) -> usize {
        self.cursor.index()
    }

    /// Current state
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Frames presented so far
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Run one frame against `target`
    ///
    /// Recording and submission failures come back as render command errors;
    /// a failure anywhere leaves the loop unusable.
    pub fn run_frame<T: FrameTarget>(&mut self, target: &mut T) -> VulkanResult<FrameOutcome> {
        let frame_index = self.cursor.index();

        self.state = LoopState::Acquiring;
        target.wait_for_slot(frame_index)?;

        let image = match target.acquire_image(frame_index)? {
            Acquisition::Image(image) => image,
            // The fence was not reset, so the same slot is reusable as is
            Acquisition::OutOfDate => return self.recreate(target, RecreateCause::AcquireOutOfDate),
        };

        if image.status == AcquireStatus::Suboptimal {
            log::trace!("Acquired suboptimal image {}", image.image_index);
        }

        self.state = LoopState::Recording;
        target.prepare_frame(frame_index, &image)?;
        target
            .record_commands(frame_index, &image)
            .map_err(|e| e.into_render_command("record command buffer"))?;

        self.state = LoopState::Submitting;
        target
            .submit(frame_index)
            .map_err(|e| e.into_render_command("submit command buffer"))?;

        self.state = LoopState::Presenting;
        let status = target.present(frame_index, &image)?;

        // The slot's work is queued either way, so the next frame moves on
        self.cursor.advance();

        let cause = match status {
            PresentStatus::OutOfDate => Some(RecreateCause::PresentOutOfDate),
            PresentStatus::Suboptimal => Some(RecreateCause::PresentSuboptimal),
            PresentStatus::Success if self.resize_requested => Some(RecreateCause::ResizeRequested),
            PresentStatus::Success => None,
        };

        if status != PresentStatus::OutOfDate {
            self.frames_presented += 1;
        }

        match cause {
            Some(cause) => self.recreate(target, cause),
            None => {
                self.state = LoopState::Idle;
                Ok(FrameOutcome::Presented)
            }
        }
    }

    fn recreate<T: FrameTarget>(&mut self, target: &mut T, cause: RecreateCause) -> VulkanResult<FrameOutcome> {
        log::debug!("Recreating swapchain: {:?}", cause);

        self.state = LoopState::Recreating;
        target.recreate_swapchain()?;
        self.resize_requested = false;

        self.state = LoopState::Idle;
        Ok(FrameOutcome::Recreated(cause))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::VulkanError;
    use ash::vk;
    use std::collections::VecDeque;

    /// Scripted device: records calls and simulates per-slot fences
    struct MockTarget {
        calls: Vec<String>,
        acquire_results: VecDeque<Acquisition>,
        present_results: VecDeque<VulkanResult<PresentStatus>>,
        record_error: Option<vk::Result>,
        submit_error: Option<vk::Result>,
        fence_signaled: Vec<bool>,
        max_unfenced: usize,
        next_image: u32,
    }

    impl MockTarget {
        fn new(frame_count: usize) -> Self {
            Self {
                calls: Vec::new(),
                acquire_results: VecDeque::new(),
                present_results: VecDeque::new(),
                record_error: None,
                submit_error: None,
                fence_signaled: vec![true; frame_count],
                max_unfenced: 0,
                next_image: 0,
            }
        }

        fn count(&self, prefix: &str) -> usize {
            self.calls.iter().filter(|call| call.starts_with(prefix)).count()
        }
    }

    impl FrameTarget for MockTarget {
        fn wait_for_slot(&mut self, frame_index: usize) -> VulkanResult<()> {
            self.calls.push(format!("wait {frame_index}"));
            // The GPU finishes the slot's work before the wait returns
            self.fence_signaled[frame_index] = true;
            Ok(())
        }

        fn acquire_image(&mut self, frame_index: usize) -> VulkanResult<Acquisition> {
            self.calls.push(format!("acquire {frame_index}"));
            Ok(self.acquire_results.pop_front().unwrap_or_else(|| {
                let image_index = self.next_image;
                self.next_image = (self.next_image + 1) % 3;
                Acquisition::Image(AcquiredImage {
                    image_index,
                    status: AcquireStatus::Success,
                })
            }))
        }

        fn prepare_frame(&mut self, frame_index: usize, _image: &AcquiredImage) -> VulkanResult<()> {
            assert!(self.fence_signaled[frame_index], "uniforms written while slot {frame_index} in flight");
            self.calls.push(format!("prepare {frame_index}"));
            Ok(())
        }

        fn record_commands(&mut self, frame_index: usize, image: &AcquiredImage) -> VulkanResult<()> {
            assert!(self.fence_signaled[frame_index], "slot {frame_index} re-recorded while in flight");
            self.calls.push(format!("record {frame_index} image {}", image.image_index));
            match self.record_error {
                Some(result) => Err(VulkanError::from_result("end command buffer", result)),
                None => Ok(()),
            }
        }

        fn submit(&mut self, frame_index: usize) -> VulkanResult<()> {
            self.calls.push(format!("submit {frame_index}"));
            if let Some(result) = self.submit_error {
                return Err(VulkanError::from_result("queue submit", result));
            }
            self.fence_signaled[frame_index] = false;
            let unfenced = self.fence_signaled.iter().filter(|signaled| !**signaled).count();
            self.max_unfenced = self.max_unfenced.max(unfenced);
            Ok(())
        }

        fn present(&mut self, frame_index: usize, image: &AcquiredImage) -> VulkanResult<PresentStatus> {
            self.calls.push(format!("present {frame_index} image {}", image.image_index));
            self.present_results.pop_front().unwrap_or(Ok(PresentStatus::Success))
        }

        fn recreate_swapchain(&mut self) -> VulkanResult<()> {
            self.calls.push("recreate".to_string());
            Ok(())
        }
    }

    #[test]
    fn test_frame_order() {
        let mut presentation = PresentationLoop::new(2);
        let mut target = MockTarget::new(2);

        let outcome = presentation.run_frame(&mut target).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented);
        assert_eq!(
            target.calls,
            vec!["wait 0", "acquire 0", "prepare 0", "record 0 image 0", "submit 0", "present 0 image 0"]
        );
        assert_eq!(presentation.frame_index(), 1);
        assert_eq!(presentation.state(), LoopState::Idle);
    }

    #[test]
    fn test_out_of_date_acquire_recreates_without_drawing() {
        let mut presentation = PresentationLoop::new(2);
        let mut target = MockTarget::new(2);
        target.acquire_results.push_back(Acquisition::OutOfDate);

        let outcome = presentation.run_frame(&mut target).unwrap();

        assert_eq!(outcome, FrameOutcome::Recreated(RecreateCause::AcquireOutOfDate));
        assert_eq!(target.calls, vec!["wait 0", "acquire 0", "recreate"]);
        assert_eq!(target.count("record"), 0);
        assert_eq!(target.count("submit"), 0);
        // Same slot is retried
        assert_eq!(presentation.frame_index(), 0);
        assert_eq!(presentation.frames_presented(), 0);

        presentation.run_frame(&mut target).unwrap();
        assert_eq!(target.calls[3], "wait 0");
        assert_eq!(target.count("submit 0"), 1);
        assert_eq!(presentation.frames_presented(), 1);
    }

    #[test]
    fn test_suboptimal_acquire_without_resize_draws_normally() {
        let mut presentation = PresentationLoop::new(2);
        let mut target = MockTarget::new(2);
        target.acquire_results.push_back(Acquisition::Image(AcquiredImage {
            image_index: 2,
            status: AcquireStatus::Suboptimal,
        }));

        let outcome = presentation.run_frame(&mut target).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented);
        assert_eq!(target.count("recreate"), 0);
        assert_eq!(target.count("present 0 image 2"), 1);
    }

    #[test]
    fn test_suboptimal_acquire_with_resize_recreates_after_present() {
        let mut presentation = PresentationLoop::new(2);
        let mut target = MockTarget::new(2);
        target.acquire_results.push_back(Acquisition::Image(AcquiredImage {
            image_index: 1,
            status: AcquireStatus::Suboptimal,
        }));
        presentation.request_resize();

        let outcome = presentation.run_frame(&mut target).unwrap();

        assert_eq!(outcome, FrameOutcome::Recreated(RecreateCause::ResizeRequested));
        assert_eq!(target.calls.last().map(String::as_str), Some("recreate"));
        assert_eq!(target.count("present"), 1);
        assert!(!presentation.resize_requested());
    }

    #[test]
    fn test_stale_present_recreates() {
        for (status, cause) in [
            (PresentStatus::OutOfDate, RecreateCause::PresentOutOfDate),
            (PresentStatus::Suboptimal, RecreateCause::PresentSuboptimal),
        ] {
            let mut presentation = PresentationLoop::new(2);
            let mut target = MockTarget::new(2);
            target.present_results.push_back(Ok(status));

            let outcome = presentation.run_frame(&mut target).unwrap();

            assert_eq!(outcome, FrameOutcome::Recreated(cause));
            assert_eq!(target.count("recreate"), 1);
            // Submitted work is in flight on slot 0, so the next frame uses slot 1
            assert_eq!(presentation.frame_index(), 1);
            let presented = u64::from(status == PresentStatus::Suboptimal);
            assert_eq!(presentation.frames_presented(), presented);
        }
    }

    #[test]
    fn test_resize_flag_cleared_by_acquire_recreate() {
        let mut presentation = PresentationLoop::new(2);
        let mut target = MockTarget::new(2);
        target.acquire_results.push_back(Acquisition::OutOfDate);
        presentation.request_resize();

        presentation.run_frame(&mut target).unwrap();
        assert!(!presentation.resize_requested());

        assert_eq!(presentation.run_frame(&mut target).unwrap(), FrameOutcome::Presented);
        assert_eq!(target.count("recreate"), 1);
    }

    #[test]
    fn test_cursor_advances_once_per_presented_frame() {
        let mut presentation = PresentationLoop::new(2);
        let mut target = MockTarget::new(2);
        let mut expected = 0;

        for frame in 0..10 {
            if frame % 3 == 0 {
                target.acquire_results.push_back(Acquisition::OutOfDate);
            }
            let outcome = presentation.run_frame(&mut target).unwrap();
            if outcome == FrameOutcome::Presented {
                expected = (expected + 1) % 2;
            }
            assert_eq!(presentation.frame_index(), expected);
        }
        assert_eq!(presentation.frames_presented(), 6);
    }

    #[test]
    fn test_in_flight_work_is_bounded() {
        for frame_count in 1..=4 {
            let mut presentation = PresentationLoop::new(frame_count);
            let mut target = MockTarget::new(frame_count);

            for _ in 0..20 {
                presentation.run_frame(&mut target).unwrap();
            }

            assert!(target.max_unfenced <= frame_count);
            assert_eq!(target.max_unfenced, frame_count);
        }
    }

    #[test]
    fn test_record_failure_is_fatal() {
        let mut presentation = PresentationLoop::new(2);
        let mut target = MockTarget::new(2);
        target.record_error = Some(vk::Result::ERROR_OUT_OF_HOST_MEMORY);

        let err = presentation.run_frame(&mut target).unwrap_err();

        assert!(matches!(err, VulkanError::RenderCommand { operation: "record command buffer", .. }));
        assert_eq!(target.count("submit"), 0);
        assert_eq!(target.count("recreate"), 0);
    }

    #[test]
    fn test_submit_failure_is_fatal() {
        let mut presentation = PresentationLoop::new(2);
        let mut target = MockTarget::new(2);
        target.submit_error = Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);

        let err = presentation.run_frame(&mut target).unwrap_err();

        assert!(matches!(
            err,
            VulkanError::RenderCommand { operation: "submit command buffer", result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY }
        ));
        assert_eq!(target.count("present"), 0);
    }

    #[test]
    fn test_device_lost_is_not_recovered() {
        let mut presentation = PresentationLoop::new(2);
        let mut target = MockTarget::new(2);
        target.submit_error = Some(vk::Result::ERROR_DEVICE_LOST);

        let err = presentation.run_frame(&mut target).unwrap_err();
        assert!(matches!(err, VulkanError::DeviceLost { .. }));
        assert_eq!(target.count("recreate"), 0);
    }

    #[test]
    fn test_present_failure_is_fatal() {
        let mut presentation = PresentationLoop::new(2);
        let mut target = MockTarget::new(2);
        target.present_results.push_back(Err(VulkanError::from_result(
            "queue present",
            vk::Result::ERROR_SURFACE_LOST_KHR,
        )));

        let err = presentation.run_frame(&mut target).unwrap_err();
        assert!(matches!(err, VulkanError::Call { result: vk::Result::ERROR_SURFACE_LOST_KHR, .. }));
        assert_eq!(target.count("recreate"), 0);
    }

    #[test]
    fn test_unsignaled_fence_blocks_slot_reuse() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::{Arc, Condvar, Mutex};
        use std::thread;
        use std::time::Duration;

        /// Fence wait that blocks until the test releases it
        struct GatedTarget {
            gate: Arc<(Mutex<bool>, Condvar)>,
            recorded: Arc<AtomicUsize>,
        }

        impl FrameTarget for GatedTarget {
            fn wait_for_slot(&mut self, _frame_index: usize) -> VulkanResult<()> {
                let (lock, signal) = &*self.gate;
                let mut signaled = lock.lock().unwrap();
                while !*signaled {
                    signaled = signal.wait(signaled).unwrap();
                }
                Ok(())
            }

            fn acquire_image(&mut self, _frame_index: usize) -> VulkanResult<Acquisition> {
                Ok(Acquisition::Image(AcquiredImage { image_index: 0, status: AcquireStatus::Success }))
            }

            fn prepare_frame(&mut self, _frame_index: usize, _image: &AcquiredImage) -> VulkanResult<()> {
                Ok(())
            }

            fn record_commands(&mut self, _frame_index: usize, _image: &AcquiredImage) -> VulkanResult<()> {
                self.recorded.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }

            fn submit(&mut self, _frame_index: usize) -> VulkanResult<()> {
                Ok(())
            }

            fn present(&mut self, _frame_index: usize, _image: &AcquiredImage) -> VulkanResult<PresentStatus> {
                Ok(PresentStatus::Success)
            }

            fn recreate_swapchain(&mut self) -> VulkanResult<()> {
                Ok(())
            }
        }

        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let recorded = Arc::new(AtomicUsize::new(0));
        let mut target = GatedTarget {
            gate: Arc::clone(&gate),
            recorded: Arc::clone(&recorded),
        };

        let worker = thread::spawn(move || {
            let mut presentation = PresentationLoop::new(2);
            presentation.run_frame(&mut target)
        });

        thread::sleep(Duration::from_millis(100));
        assert_eq!(recorded.load(Ordering::SeqCst), 0);
        assert!(!worker.is_finished());

        {
            let (lock, signal) = &*gate;
            *lock.lock().unwrap() = true;
            signal.notify_all();
        }

        let outcome = worker.join().unwrap().unwrap();
        assert_eq!(outcome, FrameOutcome::Presented);
        assert_eq!(recorded.load(Ordering::SeqCst), 1);
    }
}
