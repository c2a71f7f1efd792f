//! Vulkan side of the frame loop.

use ash::vk;
use huan_core::constants::INFINITE_TIMEOUT;
use huan_gpu::command::{begin_command_buffer, end_command_buffer, submit_command_buffers};
use huan_gpu::{
    AcquireOutcome, CommandRecorder, DeferredDeletionQueue, PresentOutcome, PresentationBackend,
};

use crate::app::HuanApp;
use crate::context::AppContext;
use crate::frame::FrameContext;

/// Drives one tick of [`huan_gpu::FrameLoop`] against the window's swapchain.
pub(crate) struct FramePresenter<'a, A: HuanApp> {
    pub ctx: &'a mut AppContext,
    pub app: &'a mut A,
    pub deletion_queue: &'a mut DeferredDeletionQueue,
    pub dt: f32,
    pub frame_number: u64,
}

impl<A: HuanApp> PresentationBackend for FramePresenter<'_, A> {
    type Error = anyhow::Error;

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn wait_for_slot(&mut self, slot: usize) -> anyhow::Result<()> {
        // SAFETY: the fence belongs to this device
        unsafe { self.ctx.frames[slot].sync.wait(self.ctx.gpu.device())? };
        self.deletion_queue.process(slot);
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> anyhow::Result<AcquireOutcome> {
        let semaphore = self.ctx.frames[slot].sync.image_available;
        // SAFETY: swapchain and semaphore are valid
        let outcome = unsafe {
            self.ctx.swapchain().acquire_next_image(
                self.ctx.swapchain_loader(),
                semaphore,
                INFINITE_TIMEOUT,
            )?
        };
        Ok(outcome)
    }

    fn recreate_image_available(&mut self, slot: usize) -> anyhow::Result<()> {
        // No queued work may still reference the old semaphore
        self.ctx.gpu.wait_idle()?;
        // SAFETY: the device is idle
        unsafe {
            self.ctx.frames[slot]
                .sync
                .recreate_image_available(self.ctx.gpu.device())?;
        }
        Ok(())
    }

    fn reset_slot(&mut self, slot: usize) -> anyhow::Result<()> {
        let device = self.ctx.gpu.device();
        let frame = &self.ctx.frames[slot];
        // SAFETY: the slot's fence was waited on this tick
        unsafe {
            frame.sync.reset(device)?;
            device.reset_command_buffer(
                frame.command_buffer,
                vk::CommandBufferResetFlags::empty(),
            )?;
        }
        Ok(())
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn record(&mut self, slot: usize, image_index: u32) -> anyhow::Result<()> {
        let ctx: &AppContext = self.ctx;
        let device = ctx.gpu.device();
        let frame = &ctx.frames[slot];
        let cmd = frame.command_buffer;

        // SAFETY: the command buffer was reset this tick
        unsafe {
            begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        }

        let swapchain_image = ctx
            .swapchain()
            .images()
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Swapchain image {image_index} out of range"))?;

        let mut frame_ctx = FrameContext::new(
            CommandRecorder::new(device, cmd),
            &frame.uniforms,
            self.deletion_queue,
            slot,
            image_index,
            swapchain_image,
            ctx.extent(),
            self.dt,
            self.frame_number,
        );
        self.app.render(ctx, &mut frame_ctx)?;

        // SAFETY: recording was begun above
        unsafe { end_command_buffer(device, cmd)? };
        Ok(())
    }

    fn submit(&mut self, slot: usize, _image_index: u32) -> anyhow::Result<()> {
        let frame = &self.ctx.frames[slot];
        let wait_semaphores = [frame.sync.image_available];
        let wait_stages = [A::WAIT_STAGE];
        let signal_semaphores = [frame.sync.render_finished];
        let command_buffers = [frame.command_buffer];

        // SAFETY: all handles belong to this device
        unsafe {
            submit_command_buffers(
                self.ctx.gpu.device(),
                self.ctx.gpu.graphics_queue(),
                &command_buffers,
                &wait_semaphores,
                &wait_stages,
                &signal_semaphores,
                frame.sync.in_flight,
            )?;
        }
        Ok(())
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn present(&mut self, slot: usize, image_index: u32) -> anyhow::Result<PresentOutcome> {
        let render_finished = self.ctx.frames[slot].sync.render_finished;
        // SAFETY: swapchain and queue are valid
        let outcome = unsafe {
            self.ctx.swapchain().present(
                self.ctx.swapchain_loader(),
                self.ctx.gpu.present_queue(),
                image_index,
                &[render_finished],
            )?
        };
        Ok(outcome)
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        self.ctx.framebuffer_extent()
    }

    fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> anyhow::Result<()> {
        self.ctx.recreate_swapchain(extent)?;
        let extent = self.ctx.extent();
        self.app.on_resize(self.ctx, extent.width, extent.height)?;
        Ok(())
    }
}
