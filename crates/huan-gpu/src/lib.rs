//! Vulkan core of the Huan renderer.
//!
//! This crate provides:
//! - Device memory allocation behind the [`ResourceAllocator`] facade
//! - Owning buffer and image wrappers with host mapping helpers
//! - Staging uploads and read-backs through one-shot submissions
//! - Image views, samplers and the layout transition table
//! - Frame pacing, swapchain handling, and the device context

pub mod allocator;
pub mod buffer;
pub mod capabilities;
pub mod command;
pub mod context;
pub mod deferred;
pub mod error;
pub mod format;
pub mod frame;
pub mod image;
pub mod image_view;
pub mod instance;
pub mod layout;
pub mod resource;
pub mod sampler;
pub mod staging;
pub mod surface;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
mod testing;

pub use allocator::{
    AllocationId, AllocationInfo, GpuAllocator, ResourceAllocator, SharedAllocator,
};
pub use buffer::{Buffer, BufferBuilder};
pub use capabilities::{GpuCapabilities, GpuVendor};
pub use command::{
    CommandPool, CommandRecorder, ImmediateSubmitter, OneShotSubmitter, TransferRecorder,
};
pub use context::{GpuContext, GpuContextBuilder, QueueFamilyIndices};
pub use deferred::{DeferredDeletionQueue, Retired};
pub use error::{GpuError, Result};
pub use frame::{AcquireOutcome, FrameLoop, PresentOutcome, PresentationBackend, TickOutcome};
pub use gpu_allocator::MemoryLocation;
pub use image::{Image, ImageBuilder, ImageSubresource};
pub use image_view::{ImageView, ImageViewDesc};
pub use layout::{layout_transition, transition_image_layout, LayoutTransition};
pub use resource::Allocated;
pub use sampler::{Sampler, SamplerBuilder};
pub use staging::{
    create_device_local_buffer, create_image_with_data, create_staging_buffer, download_buffer,
    download_image, StagingBatch,
};
pub use surface::SurfaceContext;
pub use swapchain::{replace_swapchain, SurfaceCapabilities, Swapchain, SwapchainLifecycle};
pub use sync::{create_fence, create_semaphore, FrameSync};
