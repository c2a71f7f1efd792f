//! Command buffer management and one-shot submission.

use crate::error::Result;
use ash::vk;
use std::sync::Arc;

/// Command pool for allocating command buffers.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a new command pool.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(
        device: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = device.create_command_pool(&create_info, None)?;

        Ok(Self { pool, queue_family })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate primary command buffers.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_command_buffers(
        &self,
        device: &ash::Device,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = device.allocate_command_buffers(&alloc_info)?;
        Ok(buffers)
    }

    /// Destroy the command pool.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// Begin recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    device.begin_command_buffer(cmd, &begin_info)?;
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    device.end_command_buffer(cmd)?;
    Ok(())
}

/// Submit command buffers to a queue.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn submit_command_buffers(
    device: &ash::Device,
    queue: vk::Queue,
    command_buffers: &[vk::CommandBuffer],
    wait_semaphores: &[vk::Semaphore],
    wait_stages: &[vk::PipelineStageFlags],
    signal_semaphores: &[vk::Semaphore],
    fence: vk::Fence,
) -> Result<()> {
    let submit_info = vk::SubmitInfo::default()
        .command_buffers(command_buffers)
        .wait_semaphores(wait_semaphores)
        .wait_dst_stage_mask(wait_stages)
        .signal_semaphores(signal_semaphores);

    device.queue_submit(queue, &[submit_info], fence)?;
    Ok(())
}

/// Transfer and barrier commands recorded into an open command buffer.
pub trait TransferRecorder {
    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]);

    fn copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );

    fn copy_image_to_buffer(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    );

    fn pipeline_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    );
}

/// Runs recorded work to completion before returning.
pub trait ImmediateSubmitter {
    /// Record with `record`, submit, and block until the queue is idle.
    ///
    /// Nothing is submitted when `record` fails.
    fn execute(
        &self,
        record: &mut dyn FnMut(&mut dyn TransferRecorder) -> Result<()>,
    ) -> Result<()>;
}

/// [`TransferRecorder`] over a Vulkan command buffer.
pub struct CommandRecorder<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
}

impl<'a> CommandRecorder<'a> {
    /// Wrap a command buffer that is in the recording state.
    pub fn new(device: &'a ash::Device, cmd: vk::CommandBuffer) -> Self {
        Self { device, cmd }
    }

    /// The wrapped command buffer.
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.cmd
    }

    /// Clear a color image in `TRANSFER_DST_OPTIMAL` layout.
    pub fn clear_color_image(
        &mut self,
        image: vk::Image,
        color: [f32; 4],
        range: vk::ImageSubresourceRange,
    ) {
        let clear = vk::ClearColorValue { float32: color };
        unsafe {
            self.device.cmd_clear_color_image(
                self.cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear,
                &[range],
            );
        }
    }
}

impl TransferRecorder for CommandRecorder<'_> {
    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe { self.device.cmd_copy_buffer(self.cmd, src, dst, regions) };
    }

    fn copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(self.cmd, src, dst, dst_layout, regions);
        }
    }

    fn copy_image_to_buffer(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device
                .cmd_copy_image_to_buffer(self.cmd, src, src_layout, dst, regions);
        }
    }

    fn pipeline_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                image_barriers,
            );
        }
    }
}

/// One-shot submitter bound to a single queue.
///
/// Each [`execute`](ImmediateSubmitter::execute) allocates a command buffer,
/// records into it, submits, waits for the queue to go idle, and frees it.
pub struct OneShotSubmitter {
    device: Arc<ash::Device>,
    pool: CommandPool,
    queue: vk::Queue,
}

impl OneShotSubmitter {
    /// Create a submitter with its own transient command pool.
    ///
    /// # Safety
    /// The device must be valid and `queue` must belong to `queue_family`.
    pub unsafe fn new(device: Arc<ash::Device>, queue_family: u32, queue: vk::Queue) -> Result<Self> {
        let pool = CommandPool::new(&device, queue_family, vk::CommandPoolCreateFlags::TRANSIENT)?;
        Ok(Self {
            device,
            pool,
            queue,
        })
    }

    /// Queue family the submitter records for.
    pub fn queue_family(&self) -> u32 {
        self.pool.queue_family()
    }

    unsafe fn record_and_submit(
        &self,
        cmd: vk::CommandBuffer,
        record: &mut dyn FnMut(&mut dyn TransferRecorder) -> Result<()>,
    ) -> Result<()> {
        begin_command_buffer(&self.device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        let mut recorder = CommandRecorder::new(&self.device, cmd);
        record(&mut recorder)?;
        end_command_buffer(&self.device, cmd)?;

        let cmd_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buffers);
        self.device
            .queue_submit(self.queue, &[submit_info], vk::Fence::null())?;
        self.device.queue_wait_idle(self.queue)?;
        Ok(())
    }
}

impl ImmediateSubmitter for OneShotSubmitter {
    fn execute(
        &self,
        record: &mut dyn FnMut(&mut dyn TransferRecorder) -> Result<()>,
    ) -> Result<()> {
        unsafe {
            let buffers = self.pool.allocate_command_buffers(&self.device, 1)?;
            let result = self.record_and_submit(buffers[0], record);
            self.device.free_command_buffers(self.pool.handle(), &buffers);
            result
        }
    }
}

impl Drop for OneShotSubmitter {
    fn drop(&mut self) {
        unsafe { self.pool.destroy(&self.device) };
    }
}
