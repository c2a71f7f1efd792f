//! Frame pacing and presentation control flow.
//!
//! [`FrameLoop`] drives the wait, acquire, reset, record, submit, present
//! cycle over `frames_in_flight` slots. Every device call goes through a
//! [`PresentationBackend`], so the loop itself holds no Vulkan state.
//!
//! Slot `i` is only reset or recorded after its fence has been waited on in
//! the same tick, which keeps the CPU from touching a command buffer or a
//! per-slot uniform buffer while the GPU may still read it.

use ash::vk;

/// Result of asking the swapchain for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired; `suboptimal` is a hint to recreate soon.
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface; no image was acquired.
    OutOfDate,
}

/// Result of presenting an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// What one [`FrameLoop::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A frame was submitted and presented.
    Presented { slot: usize, image_index: u32 },
    /// Acquire failed or a resize was pending; the swapchain was recreated
    /// and nothing was drawn.
    Recreated,
    /// The framebuffer has zero area; recreation is deferred.
    Minimized,
}

/// Device-facing half of the frame loop.
///
/// Any error is fatal to the loop; transient swapchain states are reported
/// through [`AcquireOutcome`] and [`PresentOutcome`] instead.
pub trait PresentationBackend {
    type Error;

    /// Block until `slot`'s previous submission has completed.
    fn wait_for_slot(&mut self, slot: usize) -> Result<(), Self::Error>;

    /// Acquire the next image, signaling `slot`'s image-available semaphore.
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome, Self::Error>;

    /// Replace `slot`'s image-available semaphore after an aborted acquire.
    fn recreate_image_available(&mut self, slot: usize) -> Result<(), Self::Error>;

    /// Reset `slot`'s fence and command buffer.
    fn reset_slot(&mut self, slot: usize) -> Result<(), Self::Error>;

    /// Record `slot`'s command buffer targeting swapchain image `image_index`.
    fn record(&mut self, slot: usize, image_index: u32) -> Result<(), Self::Error>;

    /// Submit `slot`'s command buffer, signaling its fence.
    fn submit(&mut self, slot: usize, image_index: u32) -> Result<(), Self::Error>;

    /// Present `image_index` once `slot`'s rendering has finished.
    fn present(
        &mut self,
        slot: usize,
        image_index: u32,
    ) -> Result<PresentOutcome, Self::Error>;

    /// Current framebuffer size of the window.
    fn framebuffer_extent(&self) -> vk::Extent2D;

    /// Wait for the device, then rebuild the swapchain and its dependents.
    fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> Result<(), Self::Error>;
}

/// Frame slot rotation and swapchain recovery.
#[derive(Debug)]
pub struct FrameLoop {
    frames_in_flight: usize,
    current_slot: usize,
    frame_number: u64,
    resize_requested: bool,
    recreate_pending: bool,
}

impl FrameLoop {
    /// Create a loop over `frames_in_flight` slots.
    ///
    /// # Panics
    /// Panics when `frames_in_flight` is zero.
    pub fn new(frames_in_flight: usize) -> Self {
        assert!(frames_in_flight >= 1, "frames in flight must be at least 1");
        Self {
            frames_in_flight,
            current_slot: 0,
            frame_number: 0,
            resize_requested: false,
            recreate_pending: false,
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Slot the next tick will use.
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Number of frames presented so far.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Flag that the window was resized.
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    /// Whether a resize or deferred recreation is outstanding.
    pub fn needs_recreation(&self) -> bool {
        self.resize_requested || self.recreate_pending
    }

    /// Rebuild the swapchain, unless the framebuffer has zero area.
    ///
    /// Returns `false` when recreation was deferred.
    fn recreate<B>(&mut self, backend: &mut B) -> Result<bool, B::Error>
    where
        B: PresentationBackend + ?Sized,
    {
        let extent = backend.framebuffer_extent();
        if extent.width == 0 || extent.height == 0 {
            if !self.recreate_pending {
                tracing::debug!("Framebuffer is empty, deferring swapchain recreation");
            }
            self.recreate_pending = true;
            return Ok(false);
        }

        backend.recreate_swapchain(extent)?;
        self.resize_requested = false;
        self.recreate_pending = false;
        Ok(true)
    }

    /// Run one frame.
    pub fn tick<B>(&mut self, backend: &mut B) -> Result<TickOutcome, B::Error>
    where
        B: PresentationBackend + ?Sized,
    {
        if self.recreate_pending {
            if !self.recreate(backend)? {
                return Ok(TickOutcome::Minimized);
            }
            return Ok(TickOutcome::Recreated);
        }

        let slot = self.current_slot;
        backend.wait_for_slot(slot)?;

        let acquired = backend.acquire_image(slot)?;
        let image_index = match acquired {
            AcquireOutcome::Acquired { image_index, .. } if !self.resize_requested => image_index,
            outcome => {
                if outcome == AcquireOutcome::OutOfDate {
                    tracing::warn!("Swapchain is out of date");
                }
                backend.recreate_image_available(slot)?;
                return Ok(if self.recreate(backend)? {
                    TickOutcome::Recreated
                } else {
                    TickOutcome::Minimized
                });
            }
        };

        backend.reset_slot(slot)?;
        backend.record(slot, image_index)?;
        backend.submit(slot, image_index)?;

        let presented = backend.present(slot, image_index)?;
        let suboptimal = matches!(
            acquired,
            AcquireOutcome::Acquired {
                suboptimal: true,
                ..
            }
        );
        if presented != PresentOutcome::Presented || suboptimal || self.resize_requested {
            if presented == PresentOutcome::OutOfDate {
                tracing::warn!("Swapchain is out of date");
            }
            self.recreate(backend)?;
        }

        self.current_slot = (self.current_slot + 1) % self.frames_in_flight;
        self.frame_number += 1;
        Ok(TickOutcome::Presented { slot, image_index })
    }
}
