//! GPU images.

use crate::allocator::SharedAllocator;
use crate::error::Result;
use crate::format::aspect_mask_for_format;
use crate::image_view::{resolve_view, ImageView, ImageViewDesc, ViewTarget};
use crate::resource::Allocated;
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::ops::{Deref, DerefMut};

/// Aspect, mip and layer extent of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSubresource {
    pub aspect_mask: vk::ImageAspectFlags,
    pub mip_levels: u32,
    pub array_layers: u32,
}

impl ImageSubresource {
    /// Range covering every mip level and layer.
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect_mask,
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: self.array_layers,
        }
    }

    /// All layers of one mip level.
    pub fn layers(&self, mip_level: u32) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers {
            aspect_mask: self.aspect_mask,
            mip_level,
            base_array_layer: 0,
            layer_count: self.array_layers,
        }
    }
}

/// An image that owns its memory and the views created over it.
#[derive(Debug)]
pub struct Image {
    inner: Allocated<vk::Image>,
    image_type: vk::ImageType,
    format: vk::Format,
    extent: vk::Extent3D,
    samples: vk::SampleCountFlags,
    usage: vk::ImageUsageFlags,
    tiling: vk::ImageTiling,
    flags: vk::ImageCreateFlags,
    subresource: ImageSubresource,
    views: Vec<ImageView>,
}

impl Image {
    pub fn image_type(&self) -> vk::ImageType {
        self.image_type
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    /// Width and height.
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    pub fn sample_count(&self) -> vk::SampleCountFlags {
        self.samples
    }

    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    pub fn tiling(&self) -> vk::ImageTiling {
        self.tiling
    }

    pub fn mip_level_count(&self) -> u32 {
        self.subresource.mip_levels
    }

    pub fn array_layer_count(&self) -> u32 {
        self.subresource.array_layers
    }

    pub fn subresource(&self) -> ImageSubresource {
        self.subresource
    }

    /// Views currently alive over this image.
    pub fn views(&self) -> &[ImageView] {
        &self.views
    }

    /// Create a view over this image.
    ///
    /// The view lives until [`destroy_views`](Self::destroy_views) or until
    /// the image is dropped.
    pub fn create_view(&mut self, desc: &ImageViewDesc) -> Result<&ImageView> {
        let resolved = resolve_view(
            desc,
            &ViewTarget {
                image_type: self.image_type,
                format: self.format,
                mip_levels: self.subresource.mip_levels,
                array_layers: self.subresource.array_layers,
                flags: self.flags,
            },
        );

        let create_info = vk::ImageViewCreateInfo::default()
            .image(self.inner.handle())
            .view_type(resolved.view_type)
            .format(resolved.format)
            .components(desc.components)
            .subresource_range(resolved.range);

        let handle = self.inner.allocator().lock().create_image_view(&create_info)?;

        let index = self.views.len();
        self.views.push(ImageView::new(handle, resolved));
        Ok(&self.views[index])
    }

    /// Destroy every view created over this image.
    pub fn destroy_views(&mut self) {
        if self.views.is_empty() {
            return;
        }
        let mut allocator = self.inner.allocator().lock();
        for view in self.views.drain(..) {
            allocator.destroy_image_view(view.handle());
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        // Views go first; the allocation is released when `inner` drops.
        self.destroy_views();
    }
}

impl Deref for Image {
    type Target = Allocated<vk::Image>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for Image {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

/// Image type implied by an extent.
pub fn image_type_for_extent(extent: vk::Extent3D) -> vk::ImageType {
    if extent.depth > 1 {
        vk::ImageType::TYPE_3D
    } else if extent.height > 1 {
        vk::ImageType::TYPE_2D
    } else {
        vk::ImageType::TYPE_1D
    }
}

/// Builder for [`Image`].
#[derive(Debug, Clone)]
pub struct ImageBuilder<'a> {
    extent: vk::Extent3D,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
    flags: vk::ImageCreateFlags,
    image_type: Option<vk::ImageType>,
    mip_levels: u32,
    array_layers: u32,
    samples: vk::SampleCountFlags,
    tiling: vk::ImageTiling,
    queue_family_indices: Vec<u32>,
    initial_layout: vk::ImageLayout,
    location: MemoryLocation,
    name: &'a str,
}

impl<'a> ImageBuilder<'a> {
    /// Start describing an image of the given extent.
    pub fn new(extent: vk::Extent3D) -> Self {
        Self {
            extent,
            format: vk::Format::R8G8B8A8_UNORM,
            usage: vk::ImageUsageFlags::empty(),
            flags: vk::ImageCreateFlags::empty(),
            image_type: None,
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            queue_family_indices: Vec::new(),
            initial_layout: vk::ImageLayout::UNDEFINED,
            location: MemoryLocation::GpuOnly,
            name: "image",
        }
    }

    /// Start describing a 2D image.
    pub fn new_2d(width: u32, height: u32) -> Self {
        Self::new(vk::Extent3D {
            width,
            height,
            depth: 1,
        })
    }

    pub fn format(mut self, format: vk::Format) -> Self {
        self.format = format;
        self
    }

    pub fn usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    pub fn add_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage |= usage;
        self
    }

    pub fn flags(mut self, flags: vk::ImageCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Override the image type derived from the extent.
    pub fn image_type(mut self, image_type: vk::ImageType) -> Self {
        self.image_type = Some(image_type);
        self
    }

    pub fn mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn tiling(mut self, tiling: vk::ImageTiling) -> Self {
        self.tiling = tiling;
        self
    }

    /// Share the image between queue families.
    pub fn queue_families(mut self, families: &[u32]) -> Self {
        let mut unique = families.to_vec();
        unique.sort_unstable();
        unique.dedup();
        self.queue_family_indices = unique;
        self
    }

    pub fn initial_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.initial_layout = layout;
        self
    }

    pub fn location(mut self, location: MemoryLocation) -> Self {
        self.location = location;
        self
    }

    pub fn name(mut self, name: &'a str) -> Self {
        self.name = name;
        self
    }

    /// Create the image.
    ///
    /// # Panics
    /// Panics when mip levels or array layers are zero, or usage is empty.
    pub fn build(&self, allocator: &SharedAllocator) -> Result<Image> {
        let image_type = self
            .image_type
            .unwrap_or_else(|| image_type_for_extent(self.extent));

        let (sharing_mode, families): (_, &[u32]) = if self.queue_family_indices.len() > 1 {
            (vk::SharingMode::CONCURRENT, self.queue_family_indices.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[])
        };

        let create_info = vk::ImageCreateInfo::default()
            .flags(self.flags)
            .image_type(image_type)
            .format(self.format)
            .extent(self.extent)
            .mip_levels(self.mip_levels)
            .array_layers(self.array_layers)
            .samples(self.samples)
            .tiling(self.tiling)
            .usage(self.usage)
            .sharing_mode(sharing_mode)
            .queue_family_indices(families)
            .initial_layout(self.initial_layout);

        let (handle, allocation, info) =
            allocator
                .lock()
                .create_image(&create_info, self.location, self.name)?;

        Ok(Image {
            inner: Allocated::new(handle, allocation, info, allocator.clone(), info.size),
            image_type,
            format: self.format,
            extent: self.extent,
            samples: self.samples,
            usage: self.usage,
            tiling: self.tiling,
            flags: self.flags,
            subresource: ImageSubresource {
                aspect_mask: aspect_mask_for_format(self.format),
                mip_levels: self.mip_levels,
                array_layers: self.array_layers,
            },
            views: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockAllocator;

    fn sampled_image(mock: &MockAllocator) -> Image {
        ImageBuilder::new_2d(64, 32)
            .usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST)
            .mip_levels(3)
            .build(&mock.shared())
            .unwrap()
    }

    #[test]
    fn image_type_follows_extent() {
        let extent = |width, height, depth| vk::Extent3D {
            width,
            height,
            depth,
        };
        assert_eq!(image_type_for_extent(extent(16, 1, 1)), vk::ImageType::TYPE_1D);
        assert_eq!(image_type_for_extent(extent(16, 16, 1)), vk::ImageType::TYPE_2D);
        assert_eq!(image_type_for_extent(extent(16, 16, 4)), vk::ImageType::TYPE_3D);
    }

    #[test]
    fn builder_defaults() {
        let mock = MockAllocator::new();
        let image = sampled_image(&mock);

        assert_eq!(image.format(), vk::Format::R8G8B8A8_UNORM);
        assert_eq!(image.image_type(), vk::ImageType::TYPE_2D);
        assert_eq!(image.sample_count(), vk::SampleCountFlags::TYPE_1);
        assert_eq!(image.tiling(), vk::ImageTiling::OPTIMAL);
        assert_eq!(image.array_layer_count(), 1);
        assert_eq!(image.mip_level_count(), 3);
        assert_eq!(
            image.subresource().full_range().aspect_mask,
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn depth_image_subresource_uses_depth_aspect() {
        let mock = MockAllocator::new();
        let image = ImageBuilder::new_2d(8, 8)
            .format(vk::Format::D32_SFLOAT)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .build(&mock.shared())
            .unwrap();
        assert_eq!(image.subresource().aspect_mask, vk::ImageAspectFlags::DEPTH);
    }

    #[test]
    fn views_are_tracked_and_destroyed_before_image() {
        let mock = MockAllocator::new();
        let mut image = sampled_image(&mock);

        let full = image.create_view(&ImageViewDesc::new()).unwrap();
        assert_eq!(full.subresource_range().level_count, 3);
        image
            .create_view(&ImageViewDesc::new().mip_levels(1, 1))
            .unwrap();
        assert_eq!(image.views().len(), 2);

        drop(image);

        let events = mock.events();
        let last_view = events
            .iter()
            .rposition(|e| *e == "destroy_image_view")
            .unwrap();
        let destroy = events.iter().position(|e| *e == "destroy_image").unwrap();
        assert!(last_view < destroy);
        assert_eq!(mock.stats().views_destroyed, 2);
        assert_eq!(mock.live_views(), 0);
    }

    #[test]
    fn destroy_views_keeps_image() {
        let mock = MockAllocator::new();
        let mut image = sampled_image(&mock);
        image.create_view(&ImageViewDesc::new()).unwrap();

        image.destroy_views();
        assert!(image.views().is_empty());
        assert_eq!(mock.live_views(), 0);
        assert_eq!(mock.live_allocations(), 1);
    }

    #[test]
    #[should_panic(expected = "mip levels")]
    fn zero_mip_levels_panics() {
        let mock = MockAllocator::new();
        let _ = ImageBuilder::new_2d(4, 4)
            .usage(vk::ImageUsageFlags::SAMPLED)
            .mip_levels(0)
            .build(&mock.shared());
    }
}
