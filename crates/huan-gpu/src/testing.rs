//! In-memory stand-ins for the allocator and the one-shot submitter.

use crate::allocator::{
    assert_image_create_info, AllocationId, AllocationInfo, ResourceAllocator, SharedAllocator,
};
use crate::command::{ImmediateSubmitter, TransferRecorder};
use crate::error::{GpuError, Result};
use crate::format::texel_size;
use crate::swapchain::{calculate_extent, select_image_count, SwapchainLifecycle};
use ash::vk::{self, Handle};
use gpu_allocator::MemoryLocation;
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::ptr::NonNull;
use std::sync::Arc;

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct MockStats {
    pub maps: usize,
    pub unmaps: usize,
    pub flushes: usize,
    pub invalidates: usize,
    pub buffers_destroyed: usize,
    pub images_destroyed: usize,
    pub views_destroyed: usize,
    pub samplers_destroyed: usize,
}

struct MockAllocation {
    bytes: Vec<u8>,
    host_visible: bool,
}

struct MockImage {
    allocation: u64,
    layout: vk::ImageLayout,
}

pub(crate) struct MockMemory {
    persistent: bool,
    coherent: bool,
    next_id: u64,
    allocations: HashMap<u64, MockAllocation>,
    buffers: HashMap<u64, u64>,
    images: HashMap<u64, MockImage>,
    views: HashSet<u64>,
    samplers: HashSet<u64>,
    stats: MockStats,
    events: Vec<&'static str>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl MockMemory {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn allocate(&mut self, size: u64, location: MemoryLocation) -> (AllocationId, AllocationInfo) {
        let host_visible = location != MemoryLocation::GpuOnly;
        let id = self.next();
        let mut bytes = vec![0u8; size as usize];
        let mapped = if host_visible && self.persistent {
            NonNull::new(bytes.as_mut_ptr())
        } else {
            None
        };
        self.allocations.insert(
            id,
            MockAllocation {
                bytes,
                host_visible,
            },
        );
        let info = AllocationInfo {
            size,
            is_coherent: host_visible && self.coherent,
            is_persistent: mapped.is_some(),
            mapped,
        };
        (AllocationId(id), info)
    }

    fn release(&mut self, allocation: AllocationId) -> Result<()> {
        self.allocations
            .remove(&allocation.0)
            .map(|_| ())
            .ok_or(GpuError::UnknownAllocation(allocation.0))
    }

    fn bytes(&self, allocation: u64) -> &[u8] {
        &self.allocations[&allocation].bytes
    }

    fn bytes_mut(&mut self, allocation: u64) -> &mut [u8] {
        &mut self
            .allocations
            .get_mut(&allocation)
            .expect("unknown mock allocation")
            .bytes
    }

    fn buffer_allocation(&self, buffer: vk::Buffer) -> u64 {
        *self
            .buffers
            .get(&buffer.as_raw())
            .expect("unknown mock buffer")
    }

    fn image_mut(&mut self, image: vk::Image) -> &mut MockImage {
        self.images
            .get_mut(&image.as_raw())
            .expect("unknown mock image")
    }
}

impl ResourceAllocator for MockMemory {
    fn create_buffer(
        &mut self,
        create_info: &vk::BufferCreateInfo<'_>,
        location: MemoryLocation,
        _name: &str,
    ) -> Result<(vk::Buffer, AllocationId, AllocationInfo)> {
        let (id, info) = self.allocate(create_info.size, location);
        let buffer = vk::Buffer::from_raw(self.next());
        self.buffers.insert(buffer.as_raw(), id.0);
        self.events.push("create_buffer");
        Ok((buffer, id, info))
    }

    fn create_image(
        &mut self,
        create_info: &vk::ImageCreateInfo<'_>,
        location: MemoryLocation,
        _name: &str,
    ) -> Result<(vk::Image, AllocationId, AllocationInfo)> {
        assert_image_create_info(create_info);

        let extent = create_info.extent;
        let size = u64::from(extent.width)
            * u64::from(extent.height)
            * u64::from(extent.depth)
            * u64::from(create_info.array_layers)
            * texel_size(create_info.format).unwrap_or(4);
        let (id, info) = self.allocate(size.max(1), location);
        let image = vk::Image::from_raw(self.next());
        self.images.insert(
            image.as_raw(),
            MockImage {
                allocation: id.0,
                layout: create_info.initial_layout,
            },
        );
        self.events.push("create_image");
        Ok((image, id, info))
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer, allocation: AllocationId) -> Result<()> {
        self.release(allocation)?;
        self.buffers.remove(&buffer.as_raw());
        self.stats.buffers_destroyed += 1;
        self.events.push("destroy_buffer");
        Ok(())
    }

    fn destroy_image(&mut self, image: vk::Image, allocation: AllocationId) -> Result<()> {
        self.release(allocation)?;
        self.images.remove(&image.as_raw());
        self.stats.images_destroyed += 1;
        self.events.push("destroy_image");
        Ok(())
    }

    fn map(&mut self, allocation: AllocationId) -> Result<NonNull<u8>> {
        let entry = self
            .allocations
            .get_mut(&allocation.0)
            .ok_or(GpuError::UnknownAllocation(allocation.0))?;
        if !entry.host_visible {
            return Err(GpuError::NotHostVisible);
        }
        let ptr = NonNull::new(entry.bytes.as_mut_ptr()).ok_or(GpuError::NotHostVisible)?;
        self.stats.maps += 1;
        self.events.push("map");
        Ok(ptr)
    }

    fn unmap(&mut self, _allocation: AllocationId) {
        self.stats.unmaps += 1;
        self.events.push("unmap");
    }

    fn flush(&mut self, _allocation: AllocationId, _offset: u64, _size: u64) -> Result<()> {
        self.stats.flushes += 1;
        self.events.push("flush");
        Ok(())
    }

    fn invalidate(&mut self, _allocation: AllocationId, _offset: u64, _size: u64) -> Result<()> {
        self.stats.invalidates += 1;
        self.events.push("invalidate");
        Ok(())
    }

    fn buffer_device_address(&self, buffer: vk::Buffer) -> vk::DeviceAddress {
        0x1000_0000 + buffer.as_raw()
    }

    fn create_image_view(
        &mut self,
        _create_info: &vk::ImageViewCreateInfo<'_>,
    ) -> Result<vk::ImageView> {
        let view = vk::ImageView::from_raw(self.next());
        self.views.insert(view.as_raw());
        self.events.push("create_image_view");
        Ok(view)
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        self.views.remove(&view.as_raw());
        self.stats.views_destroyed += 1;
        self.events.push("destroy_image_view");
    }

    fn create_sampler(&mut self, _create_info: &vk::SamplerCreateInfo<'_>) -> Result<vk::Sampler> {
        let sampler = vk::Sampler::from_raw(self.next());
        self.samplers.insert(sampler.as_raw());
        self.events.push("create_sampler");
        Ok(sampler)
    }

    fn destroy_sampler(&mut self, sampler: vk::Sampler) {
        assert!(
            self.samplers.remove(&sampler.as_raw()),
            "unknown mock sampler"
        );
        self.stats.samplers_destroyed += 1;
        self.events.push("destroy_sampler");
    }

    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }
}

/// Test handle onto a shared [`MockMemory`].
#[derive(Clone)]
pub(crate) struct MockAllocator {
    memory: Arc<Mutex<MockMemory>>,
}

impl MockAllocator {
    /// Persistent, coherent host memory by default.
    pub fn new() -> Self {
        Self {
            memory: Arc::new(Mutex::new(MockMemory {
                persistent: true,
                coherent: true,
                next_id: 0,
                allocations: HashMap::new(),
                buffers: HashMap::new(),
                images: HashMap::new(),
                views: HashSet::new(),
                samplers: HashSet::new(),
                stats: MockStats::default(),
                events: Vec::new(),
                memory_properties: vk::PhysicalDeviceMemoryProperties::default(),
            })),
        }
    }

    pub fn persistent(self, persistent: bool) -> Self {
        self.memory.lock().persistent = persistent;
        self
    }

    pub fn coherent(self, coherent: bool) -> Self {
        self.memory.lock().coherent = coherent;
        self
    }

    pub fn shared(&self) -> SharedAllocator {
        self.memory.clone()
    }

    pub fn stats(&self) -> MockStats {
        self.memory.lock().stats
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.memory.lock().events.clone()
    }

    pub fn live_allocations(&self) -> usize {
        self.memory.lock().allocations.len()
    }

    pub fn live_views(&self) -> usize {
        self.memory.lock().views.len()
    }

    pub fn live_samplers(&self) -> usize {
        self.memory.lock().samplers.len()
    }

    pub fn image_layout(&self, image: vk::Image) -> Option<vk::ImageLayout> {
        self.memory
            .lock()
            .images
            .get(&image.as_raw())
            .map(|i| i.layout)
    }

    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        let memory = self.memory.lock();
        let allocation = memory.buffers.get(&buffer.as_raw())?;
        Some(memory.bytes(*allocation).to_vec())
    }
}

enum MockCommand {
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        regions: Vec<vk::BufferImageCopy>,
    },
    CopyImageToBuffer {
        src: vk::Image,
        layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: Vec<vk::BufferImageCopy>,
    },
    Barrier {
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
}

impl MockCommand {
    fn label(&self) -> String {
        match self {
            Self::CopyBuffer { .. } => "copy_buffer".to_string(),
            Self::CopyBufferToImage { .. } => "copy_buffer_to_image".to_string(),
            Self::CopyImageToBuffer { .. } => "copy_image_to_buffer".to_string(),
            Self::Barrier { old, new, .. } => format!("barrier {old:?} -> {new:?}"),
        }
    }

    fn apply(&self, memory: &mut MockMemory) {
        match self {
            Self::CopyBuffer { src, dst, regions } => {
                let src = memory.buffer_allocation(*src);
                let dst = memory.buffer_allocation(*dst);
                for region in regions {
                    let from = region.src_offset as usize;
                    let to = region.dst_offset as usize;
                    let len = region.size as usize;
                    let bytes = memory.bytes(src)[from..from + len].to_vec();
                    memory.bytes_mut(dst)[to..to + len].copy_from_slice(&bytes);
                }
            }
            Self::CopyBufferToImage {
                src,
                dst,
                layout,
                regions,
            } => {
                let image = memory.image_mut(*dst);
                assert_eq!(image.layout, *layout, "copy into image in wrong layout");
                let image = image.allocation;
                let src = memory.buffer_allocation(*src);
                for region in regions {
                    let from = region.buffer_offset as usize;
                    let bytes = memory.bytes(src)[from..].to_vec();
                    let target = memory.bytes_mut(image);
                    let len = bytes.len().min(target.len());
                    target[..len].copy_from_slice(&bytes[..len]);
                }
            }
            Self::CopyImageToBuffer {
                src,
                layout,
                dst,
                regions,
            } => {
                let image = memory.image_mut(*src);
                assert_eq!(image.layout, *layout, "copy from image in wrong layout");
                let image = image.allocation;
                let dst = memory.buffer_allocation(*dst);
                for region in regions {
                    let to = region.buffer_offset as usize;
                    let bytes = memory.bytes(image).to_vec();
                    let target = &mut memory.bytes_mut(dst)[to..];
                    let len = bytes.len().min(target.len());
                    target[..len].copy_from_slice(&bytes[..len]);
                }
            }
            Self::Barrier { image, old, new } => {
                let image = memory.image_mut(*image);
                assert!(
                    *old == vk::ImageLayout::UNDEFINED || *old == image.layout,
                    "barrier from {old:?} but image is in {:?}",
                    image.layout
                );
                image.layout = *new;
            }
        }
    }
}

#[derive(Default)]
struct MockRecorder {
    commands: Vec<MockCommand>,
}

impl TransferRecorder for MockRecorder {
    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.commands.push(MockCommand::CopyBuffer {
            src,
            dst,
            regions: regions.to_vec(),
        });
    }

    fn copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.commands.push(MockCommand::CopyBufferToImage {
            src,
            dst,
            layout: dst_layout,
            regions: regions.to_vec(),
        });
    }

    fn copy_image_to_buffer(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        self.commands.push(MockCommand::CopyImageToBuffer {
            src,
            layout: src_layout,
            dst,
            regions: regions.to_vec(),
        });
    }

    fn pipeline_barrier(
        &mut self,
        _src_stage: vk::PipelineStageFlags,
        _dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        for barrier in image_barriers {
            self.commands.push(MockCommand::Barrier {
                image: barrier.image,
                old: barrier.old_layout,
                new: barrier.new_layout,
            });
        }
    }
}

/// Executes recorded transfers against [`MockMemory`] synchronously.
pub(crate) struct MockSubmitter {
    memory: Arc<Mutex<MockMemory>>,
    submissions: Cell<usize>,
    commands: RefCell<Vec<String>>,
}

impl MockSubmitter {
    pub fn new(allocator: &MockAllocator) -> Self {
        Self {
            memory: allocator.memory.clone(),
            submissions: Cell::new(0),
            commands: RefCell::new(Vec::new()),
        }
    }

    pub fn submissions(&self) -> usize {
        self.submissions.get()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }
}

impl ImmediateSubmitter for MockSubmitter {
    fn execute(
        &self,
        record: &mut dyn FnMut(&mut dyn TransferRecorder) -> Result<()>,
    ) -> Result<()> {
        let mut recorder = MockRecorder::default();
        record(&mut recorder)?;

        let mut memory = self.memory.lock();
        for command in &recorder.commands {
            command.apply(&mut memory);
            self.commands.borrow_mut().push(command.label());
        }
        self.submissions.set(self.submissions.get() + 1);
        Ok(())
    }
}

/// Swapchain standing in for the Vulkan one.
#[derive(Debug)]
pub(crate) struct MockSwapchain {
    pub handle: vk::SwapchainKHR,
    pub extent: vk::Extent2D,
    pub views: usize,
}

/// Swapchain lifecycle that records every creation and destruction.
///
/// Extents and image counts come from the real selection helpers.
pub(crate) struct MockSwapchains {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub framebuffer: vk::Extent2D,
    pub fail_next: bool,
    /// `old_swapchain` passed to each successful creation.
    pub created_from: Vec<vk::SwapchainKHR>,
    pub destroyed: Vec<vk::SwapchainKHR>,
    live: HashSet<u64>,
    live_views: usize,
    next_handle: u64,
}

impl MockSwapchains {
    pub fn new(capabilities: vk::SurfaceCapabilitiesKHR) -> Self {
        Self {
            capabilities,
            framebuffer: vk::Extent2D {
                width: 800,
                height: 600,
            },
            fail_next: false,
            created_from: Vec::new(),
            destroyed: Vec::new(),
            live: HashSet::new(),
            live_views: 0,
            next_handle: 0,
        }
    }

    pub fn live(&self) -> usize {
        self.live.len()
    }

    pub fn live_views(&self) -> usize {
        self.live_views
    }
}

impl SwapchainLifecycle for MockSwapchains {
    type Swapchain = MockSwapchain;

    fn handle(swapchain: &MockSwapchain) -> vk::SwapchainKHR {
        swapchain.handle
    }

    fn create(&mut self, old_swapchain: vk::SwapchainKHR) -> Result<MockSwapchain> {
        if std::mem::take(&mut self.fail_next) {
            return Err(GpuError::SwapchainCreation("surface lost".to_string()));
        }
        assert!(
            old_swapchain == vk::SwapchainKHR::null() || self.live.contains(&old_swapchain.as_raw()),
            "old swapchain {old_swapchain:?} is not alive"
        );

        self.next_handle += 1;
        let handle = vk::SwapchainKHR::from_raw(self.next_handle);
        let views = select_image_count(&self.capabilities) as usize;
        self.live.insert(handle.as_raw());
        self.live_views += views;
        self.created_from.push(old_swapchain);
        Ok(MockSwapchain {
            handle,
            extent: calculate_extent(
                &self.capabilities,
                self.framebuffer.width,
                self.framebuffer.height,
            ),
            views,
        })
    }

    fn destroy(&mut self, swapchain: MockSwapchain) {
        assert!(
            self.live.remove(&swapchain.handle.as_raw()),
            "swapchain {:?} destroyed twice",
            swapchain.handle
        );
        self.live_views -= swapchain.views;
        self.destroyed.push(swapchain.handle);
    }
}
