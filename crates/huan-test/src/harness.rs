//! Headless GPU harness and visual regression testing.
//!
//! Tests in this module need a Vulkan device and are ignored by default.

use ash::vk;
use image::{ImageBuffer, Rgba};
use std::path::Path;

use huan_gpu::{
    create_device_local_buffer, create_image_with_data, download_buffer, download_image,
    GpuContext, GpuContextBuilder, Image, ImageBuilder, OneShotSubmitter, SharedAllocator,
};

use crate::{Result, TestError, VisualTestConfig};

/// RGBA8 image held in host memory.
pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Headless GPU context with transfer helpers.
pub struct HeadlessGpu {
    // Dropped before the context
    submitter: OneShotSubmitter,
    context: GpuContext,
}

impl HeadlessGpu {
    /// Create a headless context with validation layers enabled.
    pub fn new() -> Result<Self> {
        let context = GpuContextBuilder::new()
            .app_name("huan-test")
            .validation(true)
            .build()?;
        let submitter = context.immediate_submitter()?;
        Ok(Self { submitter, context })
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn allocator(&self) -> SharedAllocator {
        self.context.allocator()
    }

    pub fn submitter(&self) -> &OneShotSubmitter {
        &self.submitter
    }

    /// Upload RGBA8 pixels into a sampled image in `SHADER_READ_ONLY_OPTIMAL`.
    pub fn upload_texture(&self, width: u32, height: u32, pixels: &[u8]) -> Result<Image> {
        let builder = ImageBuilder::new_2d(width, height)
            .format(vk::Format::R8G8B8A8_UNORM)
            .usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC)
            .name("test texture");
        let image = create_image_with_data(
            &self.allocator(),
            &self.submitter,
            builder,
            pixels,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;
        Ok(image)
    }

    /// Read a sampled RGBA8 image back to the host.
    pub fn read_texture(&self, image: &Image) -> Result<RgbaImage> {
        let data = download_image(
            &self.allocator(),
            &self.submitter,
            image,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;
        let extent = image.extent_2d();
        let expected = extent.width as usize * extent.height as usize * 4;
        let actual = data.len();
        ImageBuffer::from_raw(extent.width, extent.height, data)
            .ok_or(TestError::ReadbackSize { expected, actual })
    }

    /// Stage `data` into a device-local buffer and read it back.
    pub fn round_trip_buffer(&self, data: &[u8]) -> Result<Vec<u8>> {
        let allocator = self.allocator();
        let buffer = create_device_local_buffer(
            &allocator,
            &self.submitter,
            data,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
            "round trip",
        )?;
        Ok(download_buffer(&allocator, &self.submitter, &buffer)?)
    }
}

/// Visual regression test runner.
///
/// Compares images against baseline images and reports differences.
pub struct VisualRegressionTest {
    config: VisualTestConfig,
}

impl VisualRegressionTest {
    pub fn new(config: VisualTestConfig) -> Self {
        Self { config }
    }

    /// Save `image` and compare it with the baseline called `name`.
    ///
    /// A missing baseline is created from `image`.
    pub fn check(&self, name: &str, image: &RgbaImage) -> Result<()> {
        std::fs::create_dir_all(&self.config.baseline_dir)?;
        std::fs::create_dir_all(&self.config.output_dir)?;

        let baseline_path = format!("{}/{}.png", self.config.baseline_dir, name);
        let output_path = format!("{}/{}.png", self.config.output_dir, name);

        image.save(&output_path)?;

        if !Path::new(&baseline_path).exists() {
            image.save(&baseline_path)?;
            tracing::info!("Created new baseline: {}", baseline_path);
            return Ok(());
        }

        let baseline = image::open(&baseline_path)?.to_rgba8();
        let diff = compare_images(&baseline, image)?;
        if diff > self.config.threshold {
            let diff_path = format!("{}/{}_diff.png", self.config.output_dir, name);
            create_diff_image(&baseline, image).save(&diff_path)?;

            return Err(TestError::ImageComparison(format!(
                "Image difference {:.4} exceeds threshold {:.4} (see {})",
                diff, self.config.threshold, diff_path
            )));
        }

        Ok(())
    }
}

/// Normalized RGB difference of two images (0.0-1.0).
pub fn compare_images(a: &RgbaImage, b: &RgbaImage) -> Result<f64> {
    if a.dimensions() != b.dimensions() {
        return Err(TestError::ImageComparison(format!(
            "Image dimensions don't match: {:?} vs {:?}",
            a.dimensions(),
            b.dimensions()
        )));
    }

    let total_diff: u64 = a
        .pixels()
        .zip(b.pixels())
        .map(|(pa, pb)| {
            (0..3)
                .map(|c| u64::from(pa[c].abs_diff(pb[c])))
                .sum::<u64>()
        })
        .sum();

    let max_diff = (u64::from(a.width()) * u64::from(a.height()) * 3 * 255) as f64;
    if max_diff == 0.0 {
        return Ok(0.0);
    }
    Ok(total_diff as f64 / max_diff)
}

/// Differences in red over a dimmed copy of `a`.
pub fn create_diff_image(a: &RgbaImage, b: &RgbaImage) -> RgbaImage {
    let (width, height) = a.dimensions();
    ImageBuffer::from_fn(width, height, |x, y| {
        let pa = a.get_pixel(x, y);
        let pb = b.get_pixel(x, y);
        let max_diff = (0..3).map(|c| pa[c].abs_diff(pb[c])).max().unwrap_or(0);
        if max_diff > 10 {
            Rgba([255, 0, 0, 255])
        } else {
            Rgba([pa[0] / 2, pa[1] / 2, pa[2] / 2, 255])
        }
    })
}
