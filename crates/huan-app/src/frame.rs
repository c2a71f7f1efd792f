//! Per-frame state.

use ash::vk;
use huan_gpu::{
    Buffer, BufferBuilder, CommandPool, CommandRecorder, DeferredDeletionQueue, FrameSync,
    GpuContext, MemoryLocation, Retired,
};

/// Resources owned by one frame slot.
///
/// The CPU only touches them after the slot's fence has been waited on.
pub(crate) struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub sync: FrameSync,
    /// Persistently mapped, rewritten every time the slot is recorded.
    pub uniforms: Buffer,
}

impl FrameSlot {
    /// Create the slot's command buffer, sync objects and uniform buffer.
    ///
    /// # Safety
    /// The pool must belong to `gpu`'s device.
    pub unsafe fn new(
        gpu: &GpuContext,
        pool: &CommandPool,
        index: usize,
        uniform_size: u64,
    ) -> anyhow::Result<Self> {
        let name = format!("frame {index} uniforms");
        let uniforms = BufferBuilder::new(uniform_size)
            .usage(vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC)
            .location(MemoryLocation::CpuToGpu)
            .name(&name)
            .build(&gpu.allocator())?;

        let command_buffer = unsafe { pool.allocate_command_buffers(gpu.device(), 1)? }[0];
        let sync = unsafe { FrameSync::new(gpu.device())? };

        Ok(Self {
            command_buffer,
            sync,
            uniforms,
        })
    }

    /// Destroy the sync objects and release the uniform buffer.
    ///
    /// The command buffer is freed with its pool.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(self, device: &ash::Device) {
        unsafe { self.sync.destroy(device) };
    }
}

/// Context for the frame being recorded.
pub struct FrameContext<'a> {
    recorder: CommandRecorder<'a>,
    uniforms: &'a Buffer,
    retired: &'a mut DeferredDeletionQueue,
    /// Frame slot being recorded.
    pub slot: usize,
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    /// The acquired swapchain image.
    pub swapchain_image: vk::Image,
    /// Size of the swapchain images.
    pub extent: vk::Extent2D,
    /// Delta time since last frame in seconds.
    pub dt: f32,
    /// Number of frames presented before this one.
    pub frame_number: u64,
}

impl<'a> FrameContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        recorder: CommandRecorder<'a>,
        uniforms: &'a Buffer,
        retired: &'a mut DeferredDeletionQueue,
        slot: usize,
        image_index: u32,
        swapchain_image: vk::Image,
        extent: vk::Extent2D,
        dt: f32,
        frame_number: u64,
    ) -> Self {
        Self {
            recorder,
            uniforms,
            retired,
            slot,
            image_index,
            swapchain_image,
            extent,
            dt,
            frame_number,
        }
    }

    /// Recorder over the slot's open command buffer.
    pub fn recorder(&mut self) -> &mut CommandRecorder<'a> {
        &mut self.recorder
    }

    /// The slot's uniform buffer; no submission is reading it.
    pub fn uniforms(&self) -> &Buffer {
        self.uniforms
    }

    /// Keep `resource` alive until this slot's submission has completed.
    pub fn retire(&mut self, resource: impl Into<Retired>) {
        self.retired.queue(self.slot, resource);
    }

    /// Whole color range of a swapchain image.
    pub fn swapchain_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .level_count(1)
            .layer_count(1)
    }
}
