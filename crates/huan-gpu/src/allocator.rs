//! GPU memory allocation facade.
//!
//! Every buffer, image, image view and sampler is created and destroyed through a
//! [`ResourceAllocator`]. The Vulkan implementation is [`GpuAllocator`],
//! which wraps `gpu-allocator` and keeps the backing allocations in a table
//! keyed by [`AllocationId`].

use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::Arc;

/// Opaque token naming one allocation inside an allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationId(pub(crate) u64);

impl AllocationId {
    /// Raw id value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// What the allocator reports about a fresh allocation.
///
/// Captured once at creation and never recomputed.
#[derive(Debug, Clone, Copy)]
pub struct AllocationInfo {
    /// Size of the backing allocation in bytes.
    pub size: u64,
    /// Host writes are visible to the device without a flush.
    pub is_coherent: bool,
    /// Memory stays mapped for the whole lifetime of the allocation.
    pub is_persistent: bool,
    /// Mapped pointer when persistent.
    pub mapped: Option<NonNull<u8>>,
}

/// Allocator shared by every resource wrapper.
pub type SharedAllocator = Arc<Mutex<dyn ResourceAllocator + Send>>;

/// Single point of contact with GPU memory.
pub trait ResourceAllocator {
    /// Create a buffer and bind freshly allocated memory to it.
    fn create_buffer(
        &mut self,
        create_info: &vk::BufferCreateInfo<'_>,
        location: MemoryLocation,
        name: &str,
    ) -> Result<(vk::Buffer, AllocationId, AllocationInfo)>;

    /// Create an image and bind freshly allocated memory to it.
    ///
    /// # Panics
    /// Panics when mip levels or array layers are zero, or usage is empty.
    fn create_image(
        &mut self,
        create_info: &vk::ImageCreateInfo<'_>,
        location: MemoryLocation,
        name: &str,
    ) -> Result<(vk::Image, AllocationId, AllocationInfo)>;

    /// Release a buffer handle together with its allocation.
    fn destroy_buffer(&mut self, buffer: vk::Buffer, allocation: AllocationId) -> Result<()>;

    /// Release an image handle together with its allocation.
    fn destroy_image(&mut self, image: vk::Image, allocation: AllocationId) -> Result<()>;

    /// Map an allocation for host access.
    fn map(&mut self, allocation: AllocationId) -> Result<NonNull<u8>>;

    /// Undo a previous [`map`](Self::map).
    fn unmap(&mut self, allocation: AllocationId);

    /// Make host writes in `offset..offset + size` visible to the device.
    fn flush(&mut self, allocation: AllocationId, offset: u64, size: u64) -> Result<()>;

    /// Make device writes in `offset..offset + size` visible to the host.
    fn invalidate(&mut self, allocation: AllocationId, offset: u64, size: u64) -> Result<()>;

    /// GPU virtual address of a buffer created with `SHADER_DEVICE_ADDRESS`.
    fn buffer_device_address(&self, buffer: vk::Buffer) -> vk::DeviceAddress;

    /// Create a view over an image owned by this allocator.
    fn create_image_view(&mut self, create_info: &vk::ImageViewCreateInfo<'_>)
        -> Result<vk::ImageView>;

    /// Destroy a view created by [`create_image_view`](Self::create_image_view).
    fn destroy_image_view(&mut self, view: vk::ImageView);

    /// Create a sampler.
    fn create_sampler(&mut self, create_info: &vk::SamplerCreateInfo<'_>) -> Result<vk::Sampler>;

    /// Destroy a sampler created by [`create_sampler`](Self::create_sampler).
    fn destroy_sampler(&mut self, sampler: vk::Sampler);

    /// Memory types and heaps of the physical device.
    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties;
}

/// Assert the programming-error preconditions of image creation.
pub fn assert_image_create_info(create_info: &vk::ImageCreateInfo<'_>) {
    assert!(create_info.mip_levels >= 1, "image mip levels must be at least 1");
    assert!(create_info.array_layers >= 1, "image array layers must be at least 1");
    assert!(!create_info.usage.is_empty(), "image usage must not be empty");
}

/// Find the first memory type allowed by `type_filter` whose flags contain `required`.
pub fn find_memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    memory_properties
        .memory_types
        .iter()
        .take(memory_properties.memory_type_count as usize)
        .enumerate()
        .find(|(i, memory_type)| {
            type_filter & (1 << i) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(i, _)| i as u32)
        .ok_or(GpuError::NoSuitableMemoryType {
            type_filter,
            required,
        })
}

/// Round a flush range outward to `atom_size`, clamped to the allocation end.
///
/// A range starting past the end collapses to an empty one.
///
/// `base` is the allocation's offset inside its device memory block.
/// Returns `(offset, size)` relative to the memory block.
pub fn aligned_flush_range(
    base: u64,
    allocation_size: u64,
    offset: u64,
    size: u64,
    atom_size: u64,
) -> (u64, u64) {
    let atom = atom_size.max(1);
    let limit = base.saturating_add(allocation_size);
    let start = base.saturating_add(offset).min(limit);
    let end = base.saturating_add(offset.saturating_add(size)).min(limit);
    let aligned_start = start - start % atom;
    let aligned_end = end.div_ceil(atom) * atom;
    (aligned_start, aligned_end - aligned_start)
}

/// Vulkan memory allocator backed by `gpu-allocator`.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    non_coherent_atom_size: u64,
    allocations: HashMap<u64, Allocation>,
    next_id: u64,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: cfg!(debug_assertions),
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;

        let memory_properties = instance.get_physical_device_memory_properties(physical_device);
        let properties = instance.get_physical_device_properties(physical_device);

        Ok(Self {
            allocator: Some(allocator),
            device,
            memory_properties,
            non_coherent_atom_size: properties.limits.non_coherent_atom_size,
            allocations: HashMap::new(),
            next_id: 1,
        })
    }

    fn inner(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator not initialized".to_string()))
    }

    fn insert(&mut self, allocation: Allocation) -> (AllocationId, AllocationInfo) {
        let info = AllocationInfo {
            size: allocation.size(),
            is_coherent: allocation
                .memory_properties()
                .contains(vk::MemoryPropertyFlags::HOST_COHERENT),
            is_persistent: allocation.mapped_ptr().is_some(),
            mapped: allocation.mapped_ptr().map(|p| p.cast::<u8>()),
        };
        let id = self.next_id;
        self.next_id += 1;
        self.allocations.insert(id, allocation);
        (AllocationId(id), info)
    }

    fn allocate(
        &mut self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        let allocation = self.inner()?.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        Ok(allocation)
    }

    fn free(&mut self, allocation: AllocationId) -> Result<()> {
        let allocation = self
            .allocations
            .remove(&allocation.0)
            .ok_or(GpuError::UnknownAllocation(allocation.0))?;
        self.inner()?.free(allocation)?;
        Ok(())
    }

    /// Atom-aligned range for a flush or invalidate; `None` when it is empty.
    fn mapped_range(
        &self,
        allocation: AllocationId,
        offset: u64,
        size: u64,
    ) -> Result<Option<vk::MappedMemoryRange<'static>>> {
        let allocation = self
            .allocations
            .get(&allocation.0)
            .ok_or(GpuError::UnknownAllocation(allocation.0))?;

        let (offset, size) = aligned_flush_range(
            allocation.offset(),
            allocation.size(),
            offset,
            size,
            self.non_coherent_atom_size,
        );
        if size == 0 {
            return Ok(None);
        }
        Ok(Some(
            vk::MappedMemoryRange::default()
                .memory(unsafe { allocation.memory() })
                .offset(offset)
                .size(size),
        ))
    }

    /// Number of live allocations.
    pub fn allocation_count(&self) -> usize {
        self.allocations.len()
    }

    /// Shutdown the allocator, freeing all GPU memory.
    ///
    /// This must be called before the Vulkan device is destroyed.
    pub fn shutdown(&mut self) {
        if !self.allocations.is_empty() {
            tracing::warn!(
                "{} allocations still alive at allocator shutdown",
                self.allocations.len()
            );
        }
        if let Some(mut allocator) = self.allocator.take() {
            for (_, allocation) in self.allocations.drain() {
                if let Err(e) = allocator.free(allocation) {
                    tracing::error!("Failed to free leaked allocation: {e}");
                }
            }
        }
    }
}

impl ResourceAllocator for GpuAllocator {
    fn create_buffer(
        &mut self,
        create_info: &vk::BufferCreateInfo<'_>,
        location: MemoryLocation,
        name: &str,
    ) -> Result<(vk::Buffer, AllocationId, AllocationInfo)> {
        let buffer = unsafe { self.device.create_buffer(create_info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocate(name, requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.inner()?.free(allocation)?;
            return Err(e.into());
        }

        let (id, info) = self.insert(allocation);
        tracing::trace!(name, size = create_info.size, ?location, "Created buffer");
        Ok((buffer, id, info))
    }

    fn create_image(
        &mut self,
        create_info: &vk::ImageCreateInfo<'_>,
        location: MemoryLocation,
        name: &str,
    ) -> Result<(vk::Image, AllocationId, AllocationInfo)> {
        assert_image_create_info(create_info);

        let image = unsafe { self.device.create_image(create_info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let linear = create_info.tiling == vk::ImageTiling::LINEAR;

        let allocation = match self.allocate(name, requirements, location, linear) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            unsafe { self.device.destroy_image(image, None) };
            self.inner()?.free(allocation)?;
            return Err(e.into());
        }

        let (id, info) = self.insert(allocation);
        tracing::trace!(name, extent = ?create_info.extent, format = ?create_info.format, "Created image");
        Ok((image, id, info))
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer, allocation: AllocationId) -> Result<()> {
        self.free(allocation)?;
        unsafe { self.device.destroy_buffer(buffer, None) };
        Ok(())
    }

    fn destroy_image(&mut self, image: vk::Image, allocation: AllocationId) -> Result<()> {
        self.free(allocation)?;
        unsafe { self.device.destroy_image(image, None) };
        Ok(())
    }

    fn map(&mut self, allocation: AllocationId) -> Result<NonNull<u8>> {
        let allocation = self
            .allocations
            .get(&allocation.0)
            .ok_or(GpuError::UnknownAllocation(allocation.0))?;
        // gpu-allocator maps every host-visible block for its whole lifetime.
        allocation
            .mapped_ptr()
            .map(|p| p.cast::<u8>())
            .ok_or(GpuError::NotHostVisible)
    }

    fn unmap(&mut self, _allocation: AllocationId) {}

    fn flush(&mut self, allocation: AllocationId, offset: u64, size: u64) -> Result<()> {
        if let Some(range) = self.mapped_range(allocation, offset, size)? {
            unsafe { self.device.flush_mapped_memory_ranges(&[range])? };
        }
        Ok(())
    }

    fn invalidate(&mut self, allocation: AllocationId, offset: u64, size: u64) -> Result<()> {
        if let Some(range) = self.mapped_range(allocation, offset, size)? {
            unsafe { self.device.invalidate_mapped_memory_ranges(&[range])? };
        }
        Ok(())
    }

    fn buffer_device_address(&self, buffer: vk::Buffer) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
        unsafe { self.device.get_buffer_device_address(&info) }
    }

    fn create_image_view(
        &mut self,
        create_info: &vk::ImageViewCreateInfo<'_>,
    ) -> Result<vk::ImageView> {
        let view = unsafe { self.device.create_image_view(create_info, None)? };
        Ok(view)
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_sampler(&mut self, create_info: &vk::SamplerCreateInfo<'_>) -> Result<vk::Sampler> {
        let sampler = unsafe { self.device.create_sampler(create_info, None)? };
        Ok(sampler)
    }

    fn destroy_sampler(&mut self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) };
    }

    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
