//! Application context.

use std::sync::Arc;

use ash::vk;
use huan_core::AppSettings;
use huan_gpu::swapchain::Swapchain;
use huan_gpu::{CommandPool, GpuContext, GpuContextBuilder, OneShotSubmitter, SurfaceContext};
use winit::window::Window;

use crate::depth::DepthResources;
use crate::frame::FrameSlot;

/// Application context shared across all app methods.
///
/// Fields are declared in teardown order; [`AppContext::teardown`] releases
/// them explicitly with a log line per step.
pub struct AppContext {
    /// The window handle.
    pub window: Arc<Window>,
    /// Settings read at startup.
    pub settings: AppSettings,
    pub(crate) frames: Vec<FrameSlot>,
    pub(crate) command_pool: CommandPool,
    depth: Option<DepthResources>,
    /// One-shot submitter for uploads and layout transitions.
    pub submitter: OneShotSubmitter,
    swapchain: Swapchain,
    surface: SurfaceContext,
    /// GPU context with device, queues and allocator.
    pub gpu: GpuContext,
}

impl AppContext {
    /// Create the GPU context, swapchain and frame slots for `window`.
    ///
    /// On failure everything created so far is released before the GPU
    /// context drops.
    pub(crate) fn new(
        window: Arc<Window>,
        settings: AppSettings,
        uniform_buffer_size: u64,
    ) -> anyhow::Result<Self> {
        let (gpu, surface) =
            GpuContextBuilder::from_settings(&settings).build_for_window(window.as_ref())?;

        let size = window.inner_size();
        let framebuffer = vk::Extent2D {
            width: size.width.max(1),
            height: size.height.max(1),
        };

        // SAFETY: the surface was created together with this context
        let created = unsafe {
            surface.create_swapchain(&gpu, framebuffer, settings.vsync, vk::SwapchainKHR::null())
        };
        let mut swapchain = unwind_on_error(created.map_err(Into::into), || {
            // SAFETY: no swapchain was created from the surface
            unsafe { surface.destroy() };
        })?;

        let resources = FrameResources::new(&gpu, &settings, swapchain.extent(), uniform_buffer_size);
        let FrameResources {
            submitter,
            depth,
            command_pool,
            frames,
        } = unwind_on_error(resources, || {
            if let Err(e) = gpu.wait_idle() {
                tracing::error!("Failed to wait idle: {e}");
            }
            // SAFETY: the device is idle and the surface outlives the swapchain
            unsafe {
                swapchain.destroy(gpu.device(), surface.swapchain_loader());
                surface.destroy();
            }
        })?;
        tracing::info!(frames_in_flight = frames.len(), "Frame slots created");

        Ok(Self {
            window,
            settings,
            frames,
            command_pool,
            depth,
            submitter,
            swapchain,
            surface,
            gpu,
        })
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub(crate) fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        self.surface.swapchain_loader()
    }

    /// Depth buffer, when enabled in the settings.
    pub fn depth(&self) -> Option<&DepthResources> {
        self.depth.as_ref()
    }

    /// Get the current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Get the swapchain width.
    pub fn width(&self) -> u32 {
        self.swapchain.extent().width
    }

    /// Get the swapchain height.
    pub fn height(&self) -> u32 {
        self.swapchain.extent().height
    }

    /// Get the aspect ratio (width / height).
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.swapchain.extent();
        extent.width as f32 / extent.height as f32
    }

    /// Get the number of frames in flight.
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Current framebuffer size of the window.
    pub fn framebuffer_extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    /// Rebuild the swapchain and depth buffer for `framebuffer`.
    ///
    /// Waits for the device to go idle first.
    pub(crate) fn recreate_swapchain(&mut self, framebuffer: vk::Extent2D) -> anyhow::Result<()> {
        self.gpu.wait_idle()?;

        let had_depth = self.depth.take().is_some();

        // SAFETY: the device is idle
        unsafe {
            self.surface.recreate_swapchain(
                &self.gpu,
                &mut self.swapchain,
                framebuffer,
                self.settings.vsync,
            )?;
        }

        if had_depth {
            self.depth = Some(DepthResources::new(
                &self.gpu,
                &self.submitter,
                self.swapchain.extent(),
            )?);
        }

        let extent = self.swapchain.extent();
        tracing::info!("Swapchain recreated: {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Release everything in reverse creation order.
    pub(crate) fn teardown(self) {
        let Self {
            window: _window,
            settings: _,
            frames,
            command_pool,
            depth,
            submitter,
            mut swapchain,
            surface,
            gpu,
        } = self;

        if let Err(e) = gpu.wait_idle() {
            tracing::error!("Failed to wait idle: {e}");
        }

        let device = gpu.device();
        for frame in frames {
            // SAFETY: the device is idle
            unsafe { frame.destroy(device) };
        }
        tracing::info!("Frame data destroyed");

        // SAFETY: every command buffer of the pool has completed
        unsafe { command_pool.destroy(device) };
        drop(submitter);
        tracing::info!("Command pools destroyed");

        drop(depth);
        tracing::info!("Depth resources destroyed");

        // SAFETY: the device is idle and the surface outlives the swapchain
        unsafe {
            swapchain.destroy(device, surface.swapchain_loader());
            tracing::info!("Swapchain destroyed");
            surface.destroy();
            tracing::info!("Surface destroyed");
        }

        drop(gpu);
        tracing::info!("GPU context destroyed");
    }
}

/// Device objects created after the swapchain.
struct FrameResources {
    submitter: OneShotSubmitter,
    depth: Option<DepthResources>,
    command_pool: CommandPool,
    frames: Vec<FrameSlot>,
}

impl FrameResources {
    /// Create the submitter, depth buffer, command pool and frame slots.
    ///
    /// The pool and slots created before a failing step are destroyed.
    fn new(
        gpu: &GpuContext,
        settings: &AppSettings,
        extent: vk::Extent2D,
        uniform_buffer_size: u64,
    ) -> anyhow::Result<Self> {
        let submitter = gpu.immediate_submitter()?;
        let depth = if settings.depth_buffer {
            Some(DepthResources::new(gpu, &submitter, extent)?)
        } else {
            None
        };

        // SAFETY: device is valid
        let command_pool = unsafe {
            CommandPool::new(
                gpu.device(),
                gpu.graphics_queue_family(),
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )?
        };

        let mut frames = Vec::with_capacity(settings.max_frames_in_flight);
        for index in 0..settings.max_frames_in_flight {
            // SAFETY: the pool was created from this device
            let slot = unsafe { FrameSlot::new(gpu, &command_pool, index, uniform_buffer_size) };
            match slot {
                Ok(slot) => frames.push(slot),
                Err(e) => {
                    // SAFETY: nothing has been submitted from the pool yet
                    unsafe {
                        for frame in frames {
                            frame.destroy(gpu.device());
                        }
                        command_pool.destroy(gpu.device());
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self {
            submitter,
            depth,
            command_pool,
            frames,
        })
    }
}

/// Run `cleanup` when `result` is an error, then hand the result back.
fn unwind_on_error<T>(result: anyhow::Result<T>, cleanup: impl FnOnce()) -> anyhow::Result<T> {
    if result.is_err() {
        cleanup();
    }
    result
}
