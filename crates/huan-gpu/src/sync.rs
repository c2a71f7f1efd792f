//! Fences and semaphores for frame slots.

use crate::error::Result;
use ash::vk;
use huan_core::constants::INFINITE_TIMEOUT;

/// Create a binary semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let semaphore = unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? };
    Ok(semaphore)
}

/// Create a fence, optionally already signaled.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let create_info = vk::FenceCreateInfo::default().flags(if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    });
    let fence = unsafe { device.create_fence(&create_info, None)? };
    Ok(fence)
}

/// Synchronization objects of one frame slot.
///
/// The fence starts signaled so the first wait on a fresh slot returns
/// immediately.
pub struct FrameSync {
    /// Waited on by the submission before it writes the swapchain image.
    pub image_available: vk::Semaphore,
    /// Signaled by the submission; present waits on it.
    pub render_finished: vk::Semaphore,
    /// Signaled when the slot's submission has completed on the GPU.
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let in_flight = unsafe { create_fence(device, true)? };
        let image_available = match unsafe { create_semaphore(device) } {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe { device.destroy_fence(in_flight, None) };
                return Err(e);
            }
        };
        let render_finished = match unsafe { create_semaphore(device) } {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe {
                    device.destroy_semaphore(image_available, None);
                    device.destroy_fence(in_flight, None);
                }
                return Err(e);
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    /// Block until the slot's previous submission has completed.
    ///
    /// # Safety
    /// The device must be valid.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn wait(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.wait_for_fences(&[self.in_flight], true, INFINITE_TIMEOUT)? };
        Ok(())
    }

    /// Unsignal the fence before the slot is submitted again.
    ///
    /// # Safety
    /// The fence must not be pending.
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.reset_fences(&[self.in_flight])? };
        Ok(())
    }

    /// Replace the image-available semaphore.
    ///
    /// A failed acquire can leave a signal pending on the old one.
    ///
    /// # Safety
    /// No queued work may wait on the semaphore.
    pub unsafe fn recreate_image_available(&mut self, device: &ash::Device) -> Result<()> {
        let fresh = unsafe { create_semaphore(device)? };
        let stale = std::mem::replace(&mut self.image_available, fresh);
        unsafe { device.destroy_semaphore(stale, None) };
        tracing::debug!("Image-available semaphore recreated");
        Ok(())
    }

    /// # Safety
    /// The objects must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight, None);
        }
    }
}
