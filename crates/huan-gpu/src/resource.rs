//! Ownership of one GPU object plus its backing allocation.
//!
//! [`Allocated`] is the shared core of [`Buffer`](crate::buffer::Buffer) and
//! [`Image`](crate::image::Image). It owns the `(handle, allocation)` pair and
//! releases both together when dropped, unmapping first if needed.

use crate::allocator::{AllocationId, AllocationInfo, ResourceAllocator, SharedAllocator};
use crate::error::{GpuError, Result};
use ash::vk;
use std::ptr::NonNull;

/// A Vulkan handle whose lifetime is tied to an allocation.
pub trait AllocatedHandle: vk::Handle + Copy + std::fmt::Debug {
    /// Release the handle and its allocation.
    fn destroy<A>(self, allocator: &mut A, allocation: AllocationId) -> Result<()>
    where
        A: ResourceAllocator + ?Sized;
}

impl AllocatedHandle for vk::Buffer {
    fn destroy<A>(self, allocator: &mut A, allocation: AllocationId) -> Result<()>
    where
        A: ResourceAllocator + ?Sized,
    {
        allocator.destroy_buffer(self, allocation)
    }
}

impl AllocatedHandle for vk::Image {
    fn destroy<A>(self, allocator: &mut A, allocation: AllocationId) -> Result<()>
    where
        A: ResourceAllocator + ?Sized,
    {
        allocator.destroy_image(self, allocation)
    }
}

/// Exclusive owner of a handle and its allocation.
pub struct Allocated<H: AllocatedHandle> {
    handle: H,
    allocation: AllocationId,
    allocator: SharedAllocator,
    mapped: Option<NonNull<u8>>,
    size: u64,
    is_coherent: bool,
    is_persistent: bool,
}

impl<H: AllocatedHandle> Allocated<H> {
    /// Take ownership of a freshly created `(handle, allocation)` pair.
    ///
    /// `size` is the number of bytes host updates may address.
    pub(crate) fn new(
        handle: H,
        allocation: AllocationId,
        info: AllocationInfo,
        allocator: SharedAllocator,
        size: u64,
    ) -> Self {
        Self {
            handle,
            allocation,
            allocator,
            mapped: if info.is_persistent { info.mapped } else { None },
            size,
            is_coherent: info.is_coherent,
            is_persistent: info.is_persistent,
        }
    }

    /// Raw handle, for binding into command buffers.
    pub fn handle(&self) -> H {
        self.handle
    }

    /// Allocation token.
    pub fn allocation(&self) -> AllocationId {
        self.allocation
    }

    /// Allocator this resource was created from.
    pub fn allocator(&self) -> &SharedAllocator {
        &self.allocator
    }

    /// Host writes need no explicit flush.
    pub fn is_coherent(&self) -> bool {
        self.is_coherent
    }

    /// Memory stays mapped for the resource's whole lifetime.
    pub fn is_persistent(&self) -> bool {
        self.is_persistent
    }

    /// Whether a mapped pointer is currently cached.
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Cached mapped pointer, if any.
    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.mapped
    }

    /// Map the memory for host access.
    ///
    /// Returns the cached pointer when already mapped or persistent.
    pub fn map(&mut self) -> Result<NonNull<u8>> {
        if let Some(ptr) = self.mapped {
            return Ok(ptr);
        }
        let ptr = self.allocator.lock().map(self.allocation)?;
        self.mapped = Some(ptr);
        Ok(ptr)
    }

    /// Unmap the memory. No-op when persistent or not mapped.
    pub fn unmap(&mut self) {
        if self.is_persistent || self.mapped.is_none() {
            return;
        }
        self.allocator.lock().unmap(self.allocation);
        self.mapped = None;
    }

    /// Flush host writes in the given range. No-op on coherent memory.
    ///
    /// `size` may be `vk::WHOLE_SIZE` to flush up to the end.
    pub fn flush(&self, offset: u64, size: u64) -> Result<()> {
        self.check_memory_range(offset, size)?;
        if self.is_coherent {
            return Ok(());
        }
        self.allocator.lock().flush(self.allocation, offset, size)
    }

    /// Make device writes visible before a host read. No-op on coherent memory.
    ///
    /// `size` may be `vk::WHOLE_SIZE` to invalidate up to the end.
    pub fn invalidate(&self, offset: u64, size: u64) -> Result<()> {
        self.check_memory_range(offset, size)?;
        if self.is_coherent {
            return Ok(());
        }
        self.allocator.lock().invalidate(self.allocation, offset, size)
    }

    fn check_memory_range(&self, offset: u64, size: u64) -> Result<()> {
        if size == vk::WHOLE_SIZE {
            self.check_range(offset, 0)
        } else {
            self.check_range(offset, size)
        }
    }

    fn check_range(&self, offset: u64, len: u64) -> Result<()> {
        let end = offset
            .checked_add(len)
            .ok_or(GpuError::OutOfBounds {
                offset,
                end: u64::MAX,
                size: self.size,
            })?;
        if end > self.size {
            return Err(GpuError::OutOfBounds {
                offset,
                end,
                size: self.size,
            });
        }
        Ok(())
    }

    /// Copy `data` into already mapped memory at `offset`, then flush.
    pub fn update_directly(&self, data: &[u8], offset: u64) -> Result<()> {
        let ptr = self.mapped.ok_or(GpuError::NotMapped)?;
        self.check_range(offset, data.len() as u64)?;
        if data.is_empty() {
            return Ok(());
        }

        // SAFETY: the range was checked against the mapped size above.
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                ptr.as_ptr().add(offset as usize),
                data.len(),
            );
        }

        self.flush(offset, data.len() as u64)
    }

    /// Write a plain-old-data value into already mapped memory.
    pub fn update_pod<T: bytemuck::Pod>(&self, value: &T, offset: u64) -> Result<()> {
        self.update_directly(bytemuck::bytes_of(value), offset)
    }

    /// Copy `data` at `offset`, mapping around the write when needed.
    ///
    /// Leaves the mapping state as it found it. Mapping is not free, so avoid
    /// this in per-frame paths on non-persistent memory.
    pub fn update_with_mapping(&mut self, data: &[u8], offset: u64) -> Result<()> {
        if self.is_persistent {
            return self.update_directly(data, offset);
        }

        let was_mapped = self.is_mapped();
        self.map()?;
        let result = self.update_directly(data, offset);
        if !was_mapped {
            self.unmap();
        }
        result
    }

    /// Read `len` bytes at `offset` from already mapped memory.
    pub fn read_directly(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let ptr = self.mapped.ok_or(GpuError::NotMapped)?;
        self.check_range(offset, len as u64)?;
        if len == 0 {
            return Ok(Vec::new());
        }
        self.invalidate(offset, len as u64)?;

        let mut out = vec![0u8; len];
        // SAFETY: the range was checked against the mapped size above.
        unsafe {
            std::ptr::copy_nonoverlapping(
                ptr.as_ptr().add(offset as usize),
                out.as_mut_ptr(),
                len,
            );
        }
        Ok(out)
    }

    /// Read `len` bytes at `offset`, mapping around the read when needed.
    pub fn read_with_mapping(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let was_mapped = self.is_mapped();
        self.map()?;
        let result = self.read_directly(offset, len);
        if !was_mapped {
            self.unmap();
        }
        result
    }
}

impl<H: AllocatedHandle> Drop for Allocated<H> {
    fn drop(&mut self) {
        self.unmap();
        let mut allocator = self.allocator.lock();
        if let Err(e) = self.handle.destroy(&mut *allocator, self.allocation) {
            tracing::error!("Failed to destroy {:?}: {e}", self.handle);
        }
    }
}

impl<H: AllocatedHandle> std::fmt::Debug for Allocated<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocated")
            .field("handle", &self.handle)
            .field("allocation", &self.allocation)
            .field("size", &self.size)
            .field("is_coherent", &self.is_coherent)
            .field("is_persistent", &self.is_persistent)
            .field("mapped", &self.mapped.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::buffer::BufferBuilder;
    use crate::error::GpuError;
    use crate::testing::MockAllocator;
    use ash::vk;
    use gpu_allocator::MemoryLocation;

    fn host_buffer(mock: &MockAllocator, size: u64) -> crate::buffer::Buffer {
        BufferBuilder::new(size)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .location(MemoryLocation::CpuToGpu)
            .build(&mock.shared())
            .unwrap()
    }

    #[test]
    fn map_twice_returns_cached_pointer() {
        let mock = MockAllocator::new().persistent(false);
        let mut buffer = host_buffer(&mock, 64);

        let first = buffer.map().unwrap();
        let second = buffer.map().unwrap();
        assert_eq!(first, second);
        assert_eq!(mock.stats().maps, 1);
    }

    #[test]
    fn unmap_is_noop_when_never_mapped() {
        let mock = MockAllocator::new().persistent(false);
        let mut buffer = host_buffer(&mock, 64);

        buffer.unmap();
        assert!(!buffer.is_mapped());
        assert_eq!(mock.stats().unmaps, 0);
    }

    #[test]
    fn unmap_is_noop_when_persistent() {
        let mock = MockAllocator::new().persistent(true);
        let mut buffer = host_buffer(&mock, 64);
        let ptr = buffer.mapped_ptr();
        assert!(ptr.is_some());

        buffer.unmap();
        assert_eq!(buffer.mapped_ptr(), ptr);
        assert_eq!(mock.stats().unmaps, 0);
    }

    #[test]
    fn update_with_mapping_round_trips() {
        let mock = MockAllocator::new().persistent(false).coherent(false);
        for size in [0usize, 1, 4096, 4099, 12_345] {
            let payload: Vec<u8> = (0..size).map(|i| (i * 31 % 251) as u8).collect();
            let mut buffer = host_buffer(&mock, size.max(1) as u64);

            buffer.update_with_mapping(&payload, 0).unwrap();
            assert!(!buffer.is_mapped());

            buffer.map().unwrap();
            assert_eq!(buffer.read_directly(0, size).unwrap(), payload);
        }
    }

    #[test]
    fn update_with_mapping_restores_mapping_state() {
        let mock = MockAllocator::new().persistent(false);
        let mut buffer = host_buffer(&mock, 16);

        buffer.map().unwrap();
        buffer.update_with_mapping(&[1, 2, 3], 4).unwrap();
        assert!(buffer.is_mapped());
        assert_eq!(mock.stats().maps, 1);
        assert_eq!(mock.stats().unmaps, 0);
    }

    #[test]
    fn update_directly_requires_mapping() {
        let mock = MockAllocator::new().persistent(false);
        let buffer = host_buffer(&mock, 16);

        let err = buffer.update_directly(&[1], 0).unwrap_err();
        assert!(matches!(err, GpuError::NotMapped));
    }

    #[test]
    fn update_directly_rejects_out_of_bounds() {
        let mock = MockAllocator::new().persistent(true);
        let buffer = host_buffer(&mock, 16);

        let err = buffer.update_directly(&[0; 8], 12).unwrap_err();
        assert!(matches!(
            err,
            GpuError::OutOfBounds {
                offset: 12,
                end: 20,
                size: 16
            }
        ));
    }

    #[test]
    fn flush_skipped_on_coherent_memory() {
        let mock = MockAllocator::new().persistent(true).coherent(true);
        let buffer = host_buffer(&mock, 16);
        buffer.update_directly(&[7; 16], 0).unwrap();
        assert_eq!(mock.stats().flushes, 0);

        let mock = MockAllocator::new().persistent(true).coherent(false);
        let buffer = host_buffer(&mock, 16);
        buffer.update_directly(&[7; 16], 0).unwrap();
        assert_eq!(mock.stats().flushes, 1);
    }

    #[test]
    fn flush_and_invalidate_reject_ranges_past_end() {
        let mock = MockAllocator::new().persistent(true).coherent(false);
        let buffer = host_buffer(&mock, 64);

        assert!(matches!(
            buffer.flush(128, 16),
            Err(GpuError::OutOfBounds {
                offset: 128,
                end: 144,
                size: 64
            })
        ));
        assert!(matches!(
            buffer.invalidate(60, 8),
            Err(GpuError::OutOfBounds { .. })
        ));
        assert!(matches!(
            buffer.flush(65, vk::WHOLE_SIZE),
            Err(GpuError::OutOfBounds { .. })
        ));
        assert_eq!(mock.stats().flushes, 0);
        assert_eq!(mock.stats().invalidates, 0);

        buffer.flush(0, vk::WHOLE_SIZE).unwrap();
        buffer.invalidate(48, 16).unwrap();
        assert_eq!(mock.stats().flushes, 1);
        assert_eq!(mock.stats().invalidates, 1);
    }

    #[test]
    fn drop_unmaps_then_destroys() {
        let mock = MockAllocator::new().persistent(false);
        {
            let mut buffer = host_buffer(&mock, 16);
            buffer.map().unwrap();
        }
        let stats = mock.stats();
        assert_eq!(stats.unmaps, 1);
        assert_eq!(stats.buffers_destroyed, 1);
        assert_eq!(mock.live_allocations(), 0);
        assert_eq!(
            mock.events(),
            ["create_buffer", "map", "unmap", "destroy_buffer"]
        );
    }

    #[test]
    fn move_transfers_ownership() {
        let mock = MockAllocator::new();
        let buffer = host_buffer(&mock, 16);
        let handle = buffer.handle();

        let moved = buffer;
        assert_eq!(moved.handle(), handle);
        assert_eq!(mock.live_allocations(), 1);

        drop(moved);
        assert_eq!(mock.stats().buffers_destroyed, 1);
    }
}
