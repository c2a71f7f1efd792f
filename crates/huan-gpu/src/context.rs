//! GPU context management.
//!
//! [`GpuContext`] is the single aggregate that every other component receives
//! explicitly: device, queues, queue families, and the shared allocator.

use crate::allocator::{GpuAllocator, ResourceAllocator, SharedAllocator};
use crate::capabilities::GpuCapabilities;
use crate::command::OneShotSubmitter;
use crate::error::{GpuError, Result};
use crate::format::find_depth_format;
use crate::instance::{create_instance, select_physical_device};
use crate::surface::{create_surface, supports_present, SurfaceContext};
use ash::vk;
use hashbrown::HashSet;
use huan_core::AppSettings;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{c_char, CStr};
use std::sync::Arc;

/// Queue family indices chosen for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
    pub transfer: u32,
}

/// Pick graphics, present, and transfer families.
///
/// Graphics is the first family with `GRAPHICS`. Present prefers the
/// graphics family and falls back to any family `supports_present` accepts;
/// headless callers pass `None` and get the graphics family. Transfer prefers
/// a dedicated transfer-only family and falls back to graphics.
pub fn choose_queue_families(
    families: &[vk::QueueFamilyProperties],
    supports_present: Option<&dyn Fn(u32) -> bool>,
) -> Result<QueueFamilyIndices> {
    let indexed = || families.iter().enumerate().map(|(i, f)| (i as u32, f.queue_flags));

    let graphics = indexed()
        .find(|(_, flags)| flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|(i, _)| i)
        .ok_or(GpuError::MissingQueueFamily("graphics"))?;

    let present = match supports_present {
        None => graphics,
        Some(supports) if supports(graphics) => graphics,
        Some(supports) => indexed()
            .map(|(i, _)| i)
            .find(|&i| supports(i))
            .ok_or(GpuError::MissingQueueFamily("present"))?,
    };

    let transfer = indexed()
        .find(|(_, flags)| {
            flags.contains(vk::QueueFlags::TRANSFER)
                && !flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .map_or(graphics, |(i, _)| i);

    Ok(QueueFamilyIndices {
        graphics,
        present,
        transfer,
    })
}

/// Main GPU context holding Vulkan resources.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    capabilities: GpuCapabilities,
    allocator: Arc<Mutex<GpuAllocator>>,

    queue_families: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    transfer_queue: vk::Queue,
}

impl GpuContext {
    /// Get the Vulkan entry point.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Shared handle to the device, for objects that outlive a borrow.
    pub fn device_arc(&self) -> Arc<ash::Device> {
        Arc::clone(&self.device)
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn transfer_queue(&self) -> vk::Queue {
        self.transfer_queue
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.queue_families.graphics
    }

    pub fn present_queue_family(&self) -> u32 {
        self.queue_families.present
    }

    pub fn transfer_queue_family(&self) -> u32 {
        self.queue_families.transfer
    }

    /// Allocator shared by every resource created from this context.
    pub fn allocator(&self) -> SharedAllocator {
        self.allocator.clone()
    }

    /// Memory heaps and types of the physical device.
    pub fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        *self.allocator.lock().memory_properties()
    }

    /// Number of allocations currently owned by resources.
    pub fn live_allocations(&self) -> usize {
        self.allocator.lock().allocation_count()
    }

    /// Properties of `format` on this device.
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    /// First supported depth attachment format.
    pub fn depth_format(&self) -> Result<vk::Format> {
        find_depth_format(|format| self.format_properties(format))
    }

    /// One-shot submitter on the graphics queue.
    ///
    /// Staging copies and layout transitions go through the graphics queue so
    /// resources never change queue family ownership.
    pub fn immediate_submitter(&self) -> Result<OneShotSubmitter> {
        unsafe {
            OneShotSubmitter::new(
                self.device_arc(),
                self.queue_families.graphics,
                self.graphics_queue,
            )
        }
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Failed to wait for device idle during teardown: {e}");
            }

            // Frees every VkDeviceMemory block before the device goes away
            self.allocator.lock().shutdown();
            tracing::debug!("Allocator shut down");

            self.device.destroy_device(None);
            tracing::debug!("Device destroyed");
            self.instance.destroy_instance(None);
            tracing::debug!("Instance destroyed");
        }
    }
}

/// Window handles a surface can be created from.
trait WindowHandles: HasDisplayHandle + HasWindowHandle {}

impl<T: HasDisplayHandle + HasWindowHandle> WindowHandles for T {}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Huan".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder using the title and validation toggle of `settings`.
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self::new()
            .app_name(settings.title.clone())
            .validation(settings.validation)
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build a context without a surface.
    pub fn build(self) -> Result<GpuContext> {
        self.create(&[], None).map(|(context, _)| context)
    }

    /// Build a context able to present to `window`.
    pub fn build_for_window<W>(self, window: &W) -> Result<(GpuContext, SurfaceContext)>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let extensions = ash_window::enumerate_required_extensions(display.as_raw())?;

        let (context, surface) = self.create(extensions, Some(window))?;
        let surface = surface.ok_or_else(|| {
            GpuError::InvalidState("Surface missing from windowed context".to_string())
        })?;
        Ok((context, surface))
    }

    fn create(
        self,
        surface_extensions: &[*const c_char],
        window: Option<&dyn WindowHandles>,
    ) -> Result<(GpuContext, Option<SurfaceContext>)> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Loading(e.to_string()))?;

        let instance = unsafe {
            create_instance(
                &entry,
                &self.app_name,
                self.enable_validation,
                surface_extensions,
            )
        }?;

        let surface = match window {
            Some(window) => match unsafe { create_surface(&entry, &instance, window) } {
                Ok(surface) => Some(surface),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            },
            None => None,
        };

        match unsafe { init_device(&instance, surface.as_ref()) } {
            Ok(device) => Ok(device.into_context(entry, instance, surface)),
            Err(e) => {
                unsafe {
                    if let Some((surface, loader)) = surface {
                        loader.destroy_surface(surface, None);
                    }
                    instance.destroy_instance(None);
                }
                Err(e)
            }
        }
    }
}

/// Device-level objects created after the instance.
struct DeviceParts {
    physical_device: vk::PhysicalDevice,
    capabilities: GpuCapabilities,
    device: Arc<ash::Device>,
    allocator: GpuAllocator,
    queue_families: QueueFamilyIndices,
}

impl DeviceParts {
    fn into_context(
        self,
        entry: ash::Entry,
        instance: ash::Instance,
        surface: Option<(vk::SurfaceKHR, ash::khr::surface::Instance)>,
    ) -> (GpuContext, Option<SurfaceContext>) {
        let families = self.queue_families;
        let (graphics_queue, present_queue, transfer_queue) = unsafe {
            (
                self.device.get_device_queue(families.graphics, 0),
                self.device.get_device_queue(families.present, 0),
                self.device.get_device_queue(families.transfer, 0),
            )
        };

        let surface = surface.map(|(surface, surface_loader)| {
            let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &self.device);
            SurfaceContext::new(surface, surface_loader, swapchain_loader)
        });

        let context = GpuContext {
            entry,
            instance,
            physical_device: self.physical_device,
            device: self.device,
            capabilities: self.capabilities,
            allocator: Arc::new(Mutex::new(self.allocator)),
            queue_families: families,
            graphics_queue,
            present_queue,
            transfer_queue,
        };
        (context, surface)
    }
}

/// Select a physical device, create the logical device and the allocator.
///
/// # Safety
/// The instance and surface must be valid.
unsafe fn init_device(
    instance: &ash::Instance,
    surface: Option<&(vk::SurfaceKHR, ash::khr::surface::Instance)>,
) -> Result<DeviceParts> {
    let families_for = |physical_device: vk::PhysicalDevice| {
        let properties = instance.get_physical_device_queue_family_properties(physical_device);
        match surface {
            Some((surface, loader)) => {
                let present =
                    |family| supports_present(loader, physical_device, family, *surface);
                choose_queue_families(&properties, Some(&present))
            }
            None => choose_queue_families(&properties, None),
        }
    };

    let (physical_device, capabilities) =
        select_physical_device(instance, |device, capabilities| {
            (surface.is_none() || capabilities.supports_swapchain)
                && families_for(device).is_ok()
        })?;
    let queue_families = families_for(physical_device)?;

    tracing::info!("Selected GPU: {}", capabilities.summary());
    tracing::debug!(?queue_families, "Queue families");

    let extensions: Vec<&CStr> = if surface.is_some() {
        vec![ash::khr::swapchain::NAME]
    } else {
        vec![]
    };
    let device = Arc::new(create_device(
        instance,
        physical_device,
        &queue_families,
        &extensions,
    )?);

    let allocator = match GpuAllocator::new(instance, device.clone(), physical_device) {
        Ok(allocator) => allocator,
        Err(e) => {
            device.destroy_device(None);
            return Err(e);
        }
    };

    Ok(DeviceParts {
        physical_device,
        capabilities,
        device,
        allocator,
        queue_families,
    })
}

/// Create the logical device with one queue per unique family.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: &QueueFamilyIndices,
    extensions: &[&CStr],
) -> Result<ash::Device> {
    let unique_families: HashSet<u32> = [
        queue_families.graphics,
        queue_families.present,
        queue_families.transfer,
    ]
    .into_iter()
    .collect();

    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names: Vec<*const c_char> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    // Separate depth layouts allow DEPTH_ATTACHMENT_OPTIMAL
    let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default()
        .buffer_device_address(true)
        .separate_depth_stencil_layouts(true);
    let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut vulkan_1_2_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = instance.create_device(physical_device, &device_create_info, None)?;
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn headless_uses_graphics_for_present() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        let indices = choose_queue_families(&families, None).unwrap();
        assert_eq!(
            indices,
            QueueFamilyIndices {
                graphics: 0,
                present: 0,
                transfer: 0
            }
        );
    }

    #[test]
    fn prefers_dedicated_transfer_family() {
        let families = [
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = choose_queue_families(&families, None).unwrap();
        assert_eq!(indices.graphics, 1);
        assert_eq!(indices.transfer, 2);
    }

    #[test]
    fn present_falls_back_to_another_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let only_second = |i: u32| i == 1;
        let indices = choose_queue_families(&families, Some(&only_second)).unwrap();
        assert_eq!(indices.graphics, 0);
        assert_eq!(indices.present, 1);
    }

    #[test]
    fn missing_families_are_errors() {
        let compute_only = [family(vk::QueueFlags::COMPUTE)];
        assert!(matches!(
            choose_queue_families(&compute_only, None),
            Err(GpuError::MissingQueueFamily("graphics"))
        ));

        let graphics = [family(vk::QueueFlags::GRAPHICS)];
        let never = |_: u32| false;
        assert!(matches!(
            choose_queue_families(&graphics, Some(&never)),
            Err(GpuError::MissingQueueFamily("present"))
        ));
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn headless_context_creation() {
        let context = GpuContextBuilder::new().validation(false).build().unwrap();
        assert!(context.capabilities().meets_requirements());
        assert!(context.depth_format().is_ok());
        assert_eq!(context.live_allocations(), 0);
    }
}
