//! Swapchain-sized depth buffer.

use ash::vk;
use huan_gpu::format::has_stencil_component;
use huan_gpu::{
    transition_image_layout, GpuContext, Image, ImageBuilder, ImageViewDesc, ImmediateSubmitter,
};

/// Depth image and view, recreated with the swapchain.
pub struct DepthResources {
    image: Image,
}

impl DepthResources {
    /// Create a depth image matching `extent`, ready for attachment use.
    pub fn new(
        gpu: &GpuContext,
        submitter: &dyn ImmediateSubmitter,
        extent: vk::Extent2D,
    ) -> anyhow::Result<Self> {
        let format = gpu.depth_format()?;
        let mut image = ImageBuilder::new_2d(extent.width, extent.height)
            .format(format)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .name("depth")
            .build(&gpu.allocator())?;
        image.create_view(&ImageViewDesc::new())?;

        transition_image_layout(
            submitter,
            &image,
            vk::ImageLayout::UNDEFINED,
            attachment_layout(format),
        )?;

        tracing::debug!(
            width = extent.width,
            height = extent.height,
            ?format,
            "Created depth buffer"
        );
        Ok(Self { image })
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn format(&self) -> vk::Format {
        self.image.format()
    }

    /// Layout the image is left in, for render pass and rendering info setup.
    pub fn layout(&self) -> vk::ImageLayout {
        attachment_layout(self.format())
    }

    pub fn view(&self) -> vk::ImageView {
        self.image
            .views()
            .first()
            .map_or(vk::ImageView::null(), |view| view.handle())
    }
}

/// Attachment layout covering every aspect of `format`.
fn attachment_layout(format: vk::Format) -> vk::ImageLayout {
    if has_stencil_component(format) {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    } else {
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
    }
}
