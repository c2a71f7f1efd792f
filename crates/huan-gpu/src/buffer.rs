//! GPU buffers.

use crate::allocator::SharedAllocator;
use crate::error::Result;
use crate::resource::Allocated;
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::ops::{Deref, DerefMut};

/// A buffer that owns its memory.
#[derive(Debug)]
pub struct Buffer {
    inner: Allocated<vk::Buffer>,
    size: u64,
    usage: vk::BufferUsageFlags,
}

impl Buffer {
    /// Requested size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Usage flags the buffer was created with.
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// GPU virtual address of the buffer.
    ///
    /// Only meaningful for buffers created with `SHADER_DEVICE_ADDRESS`.
    pub fn device_address(&self) -> vk::DeviceAddress {
        debug_assert!(
            self.usage
                .contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS),
            "buffer was created without SHADER_DEVICE_ADDRESS"
        );
        self.inner
            .allocator()
            .lock()
            .buffer_device_address(self.inner.handle())
    }
}

impl Deref for Buffer {
    type Target = Allocated<vk::Buffer>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

/// Builder for [`Buffer`].
#[derive(Debug, Clone)]
pub struct BufferBuilder<'a> {
    size: u64,
    usage: vk::BufferUsageFlags,
    flags: vk::BufferCreateFlags,
    location: MemoryLocation,
    queue_family_indices: Vec<u32>,
    name: &'a str,
}

impl<'a> BufferBuilder<'a> {
    /// Start describing a buffer of `size` bytes.
    pub fn new(size: u64) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::empty(),
            flags: vk::BufferCreateFlags::empty(),
            location: MemoryLocation::GpuOnly,
            queue_family_indices: Vec::new(),
            name: "buffer",
        }
    }

    /// Replace the usage flags.
    pub fn usage(mut self, usage: vk::BufferUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    /// Add usage flags to the current set.
    pub fn add_usage(mut self, usage: vk::BufferUsageFlags) -> Self {
        self.usage |= usage;
        self
    }

    /// Set buffer create flags.
    pub fn flags(mut self, flags: vk::BufferCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the memory placement preference.
    pub fn location(mut self, location: MemoryLocation) -> Self {
        self.location = location;
        self
    }

    /// Share the buffer between queue families.
    ///
    /// Families are deduplicated; one family means exclusive sharing.
    pub fn queue_families(mut self, families: &[u32]) -> Self {
        let mut unique = families.to_vec();
        unique.sort_unstable();
        unique.dedup();
        self.queue_family_indices = unique;
        self
    }

    /// Debug name used by the allocator.
    pub fn name(mut self, name: &'a str) -> Self {
        self.name = name;
        self
    }

    /// Create the buffer.
    ///
    /// # Panics
    /// Panics when the size is zero or no usage flag is set.
    pub fn build(&self, allocator: &SharedAllocator) -> Result<Buffer> {
        assert!(self.size > 0, "buffer size must be non-zero");
        assert!(!self.usage.is_empty(), "buffer usage must not be empty");

        let (sharing_mode, families): (_, &[u32]) = if self.queue_family_indices.len() > 1 {
            (vk::SharingMode::CONCURRENT, self.queue_family_indices.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[])
        };
        let create_info = vk::BufferCreateInfo::default()
            .size(self.size)
            .usage(self.usage)
            .flags(self.flags)
            .sharing_mode(sharing_mode)
            .queue_family_indices(families);

        let (handle, allocation, info) =
            allocator
                .lock()
                .create_buffer(&create_info, self.location, self.name)?;

        Ok(Buffer {
            inner: Allocated::new(handle, allocation, info, allocator.clone(), self.size),
            size: self.size,
            usage: self.usage,
        })
    }
}
