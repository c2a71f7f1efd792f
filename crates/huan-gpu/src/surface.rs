//! Surface management for windowed rendering.
//!
//! The surface is created before the logical device so queue family
//! selection can check present support against it.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::swapchain::{
    replace_swapchain, SurfaceCapabilities, Swapchain, SwapchainDesc, SwapchainLifecycle,
};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// Create a surface for a window.
///
/// # Safety
/// The instance must have been created with the extensions
/// `ash_window::enumerate_required_extensions` reports for this window.
pub(crate) unsafe fn create_surface<W>(
    entry: &ash::Entry,
    instance: &ash::Instance,
    window: &W,
) -> Result<(vk::SurfaceKHR, ash::khr::surface::Instance)>
where
    W: HasDisplayHandle + HasWindowHandle + ?Sized,
{
    let display = window
        .display_handle()
        .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
    let window_handle = window
        .window_handle()
        .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

    let surface = ash_window::create_surface(
        entry,
        instance,
        display.as_raw(),
        window_handle.as_raw(),
        None,
    )
    .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

    Ok((surface, ash::khr::surface::Instance::new(entry, instance)))
}

/// Surface and swapchain loaders for one window.
pub struct SurfaceContext {
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
}

impl SurfaceContext {
    pub(crate) fn new(
        surface: vk::SurfaceKHR,
        surface_loader: ash::khr::surface::Instance,
        swapchain_loader: ash::khr::swapchain::Device,
    ) -> Self {
        Self {
            surface,
            surface_loader,
            swapchain_loader,
        }
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Query surface capabilities.
    pub fn capabilities(&self, gpu: &GpuContext) -> Result<SurfaceCapabilities> {
        let physical_device = gpu.physical_device();
        unsafe {
            let capabilities = self
                .surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)?;
            let formats = self
                .surface_loader
                .get_physical_device_surface_formats(physical_device, self.surface)?;
            let present_modes = self
                .surface_loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)?;

            Ok(SurfaceCapabilities {
                capabilities,
                formats,
                present_modes,
            })
        }
    }

    /// Create a swapchain for this surface.
    ///
    /// # Safety
    /// The GPU context must be the one this surface was created with.
    pub unsafe fn create_swapchain(
        &self,
        gpu: &GpuContext,
        framebuffer: vk::Extent2D,
        vsync: bool,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Swapchain> {
        let support = self.capabilities(gpu)?;
        let queue_families = [gpu.graphics_queue_family(), gpu.present_queue_family()];

        Swapchain::new(
            gpu.device(),
            &self.swapchain_loader,
            &support,
            &SwapchainDesc {
                surface: self.surface,
                framebuffer,
                vsync,
                queue_families: &queue_families,
                old_swapchain,
            },
        )
    }

    /// Replace `swapchain` with one sized for `framebuffer`.
    ///
    /// The old swapchain is handed to the driver for reuse, then destroyed.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn recreate_swapchain(
        &self,
        gpu: &GpuContext,
        swapchain: &mut Swapchain,
        framebuffer: vk::Extent2D,
        vsync: bool,
    ) -> Result<()> {
        let mut lifecycle = SurfaceSwapchains {
            surface: self,
            gpu,
            framebuffer,
            vsync,
        };
        replace_swapchain(&mut lifecycle, swapchain)
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// Every swapchain created from this surface must already be destroyed.
    pub unsafe fn destroy(&self) {
        self.surface_loader.destroy_surface(self.surface, None);
    }
}

/// Vulkan swapchains of one surface, sized for a fixed framebuffer.
///
/// Only built inside [`SurfaceContext::recreate_swapchain`], whose caller
/// guarantees the device is idle.
struct SurfaceSwapchains<'a> {
    surface: &'a SurfaceContext,
    gpu: &'a GpuContext,
    framebuffer: vk::Extent2D,
    vsync: bool,
}

impl SwapchainLifecycle for SurfaceSwapchains<'_> {
    type Swapchain = Swapchain;

    fn handle(swapchain: &Swapchain) -> vk::SwapchainKHR {
        swapchain.handle()
    }

    fn create(&mut self, old_swapchain: vk::SwapchainKHR) -> Result<Swapchain> {
        unsafe {
            self.surface
                .create_swapchain(self.gpu, self.framebuffer, self.vsync, old_swapchain)
        }
    }

    fn destroy(&mut self, mut swapchain: Swapchain) {
        unsafe { swapchain.destroy(self.gpu.device(), &self.surface.swapchain_loader) };
    }
}

/// Whether `family` can present to `surface`.
///
/// # Safety
/// All handles must be valid.
pub(crate) unsafe fn supports_present(
    surface_loader: &ash::khr::surface::Instance,
    physical_device: vk::PhysicalDevice,
    family: u32,
    surface: vk::SurfaceKHR,
) -> bool {
    surface_loader
        .get_physical_device_surface_support(physical_device, family, surface)
        .unwrap_or(false)
}
