//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Vulkan loader could not be found or initialised.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// A required queue family is missing on the selected device.
    #[error("Missing queue family: {0}")]
    MissingQueueFamily(&'static str),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// The allocator ran out of device or host memory.
    #[error("Out of GPU memory: {0}")]
    OutOfMemory(String),

    /// No memory type matches the requested filter and properties.
    #[error("No memory type matches filter {type_filter:#b} with properties {required:?}")]
    NoSuitableMemoryType {
        type_filter: u32,
        required: vk::MemoryPropertyFlags,
    },

    /// No candidate format supports the requested features.
    #[error("No supported format among {0:?}")]
    NoSupportedFormat(Vec<vk::Format>),

    /// Format the operation cannot size or handle.
    #[error("Unsupported format: {0:?}")]
    UnsupportedFormat(vk::Format),

    /// Layout pair missing from the transition table.
    #[error("Unsupported layout transition: {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// Direct update on a resource that is not mapped.
    #[error("Resource is not mapped")]
    NotMapped,

    /// Attempt to map memory that is not host visible.
    #[error("Allocation is not host visible")]
    NotHostVisible,

    /// Byte range outside of a resource.
    #[error("Range {offset}..{end} is outside of a {size} byte resource")]
    OutOfBounds { offset: u64, end: u64, size: u64 },

    /// Allocation id not known to the allocator.
    #[error("Unknown allocation {0}")]
    UnknownAllocation(u64),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<gpu_allocator::AllocationError> for GpuError {
    fn from(err: gpu_allocator::AllocationError) -> Self {
        match err {
            gpu_allocator::AllocationError::OutOfMemory => Self::OutOfMemory(err.to_string()),
            other => Self::AllocationFailed(other.to_string()),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_out_of_memory_is_distinct() {
        let err = GpuError::from(gpu_allocator::AllocationError::OutOfMemory);
        assert!(matches!(err, GpuError::OutOfMemory(_)));

        let err = GpuError::from(gpu_allocator::AllocationError::InvalidAllocationCreateDesc);
        assert!(matches!(err, GpuError::AllocationFailed(_)));
    }
}
