//! `HuanApp` trait definition.

use crate::context::AppContext;
use crate::frame::FrameContext;
use ash::vk;
use winit::event::WindowEvent;

/// Trait for Huan applications.
///
/// The framework owns the window, the GPU context, the swapchain and the
/// frame loop. An application only records its per-frame commands.
pub trait HuanApp: Sized {
    /// Stage at which a frame's commands first touch the swapchain image.
    ///
    /// Submissions wait on the image-available semaphore at this stage, so
    /// the first barrier on the swapchain image must start here.
    const WAIT_STAGE: vk::PipelineStageFlags = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;

    /// Size in bytes of each frame slot's uniform buffer.
    const UNIFORM_BUFFER_SIZE: u64 = 256;

    /// Initialize the application.
    ///
    /// Called once after the window, GPU context and swapchain exist.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// Called every frame before the frame loop ticks. `dt` is in seconds.
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Record a frame.
    ///
    /// Called after the frame slot's fence has been waited on, with the
    /// slot's command buffer open. The slot's uniform buffer is free to
    /// overwrite. The swapchain image is in `UNDEFINED` layout and must end
    /// in `PRESENT_SRC_KHR`.
    fn render(&mut self, ctx: &AppContext, frame: &mut FrameContext<'_>) -> anyhow::Result<()>;

    /// Handle window resize.
    ///
    /// Called after the swapchain and depth buffer were recreated.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle window events.
    ///
    /// Return `true` if the event was handled and should not be processed
    /// further.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Release resources before shutdown.
    ///
    /// The GPU is idle when this is called.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
