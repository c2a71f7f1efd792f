//! Image views.
//!
//! Views are created through [`Image::create_view`](crate::image::Image::create_view)
//! and owned by their image, which destroys them before itself.

use crate::format::aspect_mask_for_format;
use ash::vk;

/// Description of a view to create.
///
/// Unset fields are derived from the image: the view type from the image
/// type and layer count, the format from the image format, the aspect from
/// the format. A level or layer count of zero covers the rest of the image.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageViewDesc {
    pub view_type: Option<vk::ImageViewType>,
    pub format: Option<vk::Format>,
    pub aspect_mask: Option<vk::ImageAspectFlags>,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
    pub components: vk::ComponentMapping,
}

impl ImageViewDesc {
    /// View over the whole image with derived defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view_type(mut self, view_type: vk::ImageViewType) -> Self {
        self.view_type = Some(view_type);
        self
    }

    pub fn format(mut self, format: vk::Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn aspect_mask(mut self, aspect_mask: vk::ImageAspectFlags) -> Self {
        self.aspect_mask = Some(aspect_mask);
        self
    }

    pub fn mip_levels(mut self, base: u32, count: u32) -> Self {
        self.base_mip_level = base;
        self.level_count = count;
        self
    }

    pub fn array_layers(mut self, base: u32, count: u32) -> Self {
        self.base_array_layer = base;
        self.layer_count = count;
        self
    }

    pub fn components(mut self, components: vk::ComponentMapping) -> Self {
        self.components = components;
        self
    }
}

/// Image properties a view description is resolved against.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ViewTarget {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub flags: vk::ImageCreateFlags,
}

/// Fully resolved view parameters.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedView {
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub range: vk::ImageSubresourceRange,
}

/// View type matching an image's dimensionality and layer count.
pub fn default_view_type(
    image_type: vk::ImageType,
    array_layers: u32,
    flags: vk::ImageCreateFlags,
) -> vk::ImageViewType {
    match image_type {
        vk::ImageType::TYPE_1D if array_layers > 1 => vk::ImageViewType::TYPE_1D_ARRAY,
        vk::ImageType::TYPE_1D => vk::ImageViewType::TYPE_1D,
        vk::ImageType::TYPE_3D => vk::ImageViewType::TYPE_3D,
        _ if flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE) && array_layers == 6 => {
            vk::ImageViewType::CUBE
        }
        _ if flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE)
            && array_layers % 6 == 0 =>
        {
            vk::ImageViewType::CUBE_ARRAY
        }
        _ if array_layers > 1 => vk::ImageViewType::TYPE_2D_ARRAY,
        _ => vk::ImageViewType::TYPE_2D,
    }
}

pub(crate) fn resolve_view(desc: &ImageViewDesc, target: &ViewTarget) -> ResolvedView {
    assert!(
        desc.base_mip_level < target.mip_levels,
        "base mip level {} out of range for {} levels",
        desc.base_mip_level,
        target.mip_levels
    );
    assert!(
        desc.base_array_layer < target.array_layers,
        "base array layer {} out of range for {} layers",
        desc.base_array_layer,
        target.array_layers
    );

    let format = desc.format.unwrap_or(target.format);
    let level_count = if desc.level_count == 0 {
        target.mip_levels - desc.base_mip_level
    } else {
        desc.level_count
    };
    let layer_count = if desc.layer_count == 0 {
        target.array_layers - desc.base_array_layer
    } else {
        desc.layer_count
    };

    ResolvedView {
        view_type: desc.view_type.unwrap_or_else(|| {
            default_view_type(target.image_type, layer_count, target.flags)
        }),
        format,
        range: vk::ImageSubresourceRange {
            aspect_mask: desc
                .aspect_mask
                .unwrap_or_else(|| aspect_mask_for_format(format)),
            base_mip_level: desc.base_mip_level,
            level_count,
            base_array_layer: desc.base_array_layer,
            layer_count,
        },
    }
}

/// A view onto one image.
///
/// The view does not own the underlying image; it is destroyed by the image.
#[derive(Debug)]
pub struct ImageView {
    handle: vk::ImageView,
    view_type: vk::ImageViewType,
    format: vk::Format,
    range: vk::ImageSubresourceRange,
}

impl ImageView {
    pub(crate) fn new(handle: vk::ImageView, resolved: ResolvedView) -> Self {
        Self {
            handle,
            view_type: resolved.view_type,
            format: resolved.format,
            range: resolved.range,
        }
    }

    /// Raw handle, for descriptor writes and attachments.
    pub fn handle(&self) -> vk::ImageView {
        self.handle
    }

    pub fn view_type(&self) -> vk::ImageViewType {
        self.view_type
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Subresource range covered by this view.
    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        self.range
    }

    /// Layers of one mip level of this view, for copy regions.
    ///
    /// `mip_level` is relative to the view's base level.
    pub fn subresource_layers(&self, mip_level: u32) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers {
            aspect_mask: self.range.aspect_mask,
            mip_level: self.range.base_mip_level + mip_level,
            base_array_layer: self.range.base_array_layer,
            layer_count: self.range.layer_count,
        }
    }
}
