//! Staged transfers between host memory and device-local resources.
//!
//! Uploads go through a transient host-visible staging buffer and a one-shot
//! command buffer. Several uploads can share one submission through a
//! [`StagingBatch`]; its staging buffers are released only after the
//! submission has completed.

use crate::allocator::SharedAllocator;
use crate::buffer::{Buffer, BufferBuilder};
use crate::command::{ImmediateSubmitter, TransferRecorder};
use crate::deferred::DeferredDeletionQueue;
use crate::error::{GpuError, Result};
use crate::format::texel_size;
use crate::image::{Image, ImageBuilder};
use crate::layout::{layout_transition, record_layout_transition};
use ash::vk;
use gpu_allocator::MemoryLocation;

/// Create a host-visible transfer source holding `data`.
///
/// # Panics
/// Panics when `data` is empty.
pub fn create_staging_buffer(
    allocator: &SharedAllocator,
    data: &[u8],
    name: &str,
) -> Result<Buffer> {
    let mut buffer = BufferBuilder::new(data.len() as u64)
        .usage(vk::BufferUsageFlags::TRANSFER_SRC)
        .location(MemoryLocation::CpuToGpu)
        .name(name)
        .build(allocator)?;
    buffer.update_with_mapping(data, 0)?;
    Ok(buffer)
}

/// Size in bytes of mip 0 of every layer, when the format has a known texel size.
fn image_upload_size(image: &Image) -> Option<u64> {
    let extent = image.extent();
    texel_size(image.format()).map(|texel| {
        u64::from(extent.width)
            * u64::from(extent.height)
            * u64::from(extent.depth)
            * u64::from(image.array_layer_count())
            * texel
    })
}

fn full_image_copy(image: &Image) -> vk::BufferImageCopy {
    vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: image.subresource().layers(0),
        image_offset: vk::Offset3D::default(),
        image_extent: image.extent(),
    }
}

enum PendingCopy {
    Buffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    },
    Image {
        src: vk::Buffer,
        dst: vk::Image,
        range: vk::ImageSubresourceRange,
        region: vk::BufferImageCopy,
        final_layout: vk::ImageLayout,
    },
}

impl PendingCopy {
    fn record(&self, recorder: &mut dyn TransferRecorder) -> Result<()> {
        match *self {
            Self::Buffer { src, dst, region } => {
                recorder.copy_buffer(src, dst, &[region]);
            }
            Self::Image {
                src,
                dst,
                range,
                region,
                final_layout,
            } => {
                record_layout_transition(
                    recorder,
                    dst,
                    range,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                )?;
                recorder.copy_buffer_to_image(
                    src,
                    dst,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
                record_layout_transition(
                    recorder,
                    dst,
                    range,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    final_layout,
                )?;
            }
        }
        Ok(())
    }
}

/// Uploads recorded into a single one-shot submission.
pub struct StagingBatch {
    allocator: SharedAllocator,
    copies: Vec<PendingCopy>,
    staging: DeferredDeletionQueue,
    bytes: u64,
}

impl StagingBatch {
    /// Start an empty batch.
    pub fn new(allocator: &SharedAllocator) -> Self {
        Self {
            allocator: allocator.clone(),
            copies: Vec::new(),
            staging: DeferredDeletionQueue::new(1),
            bytes: 0,
        }
    }

    /// Number of copies waiting for submission.
    pub fn len(&self) -> usize {
        self.copies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    /// Write `data` into `dst` at `offset`.
    ///
    /// Host-visible destinations are written immediately; device-local ones
    /// are staged and copied on [`submit`](Self::submit).
    pub fn upload_to_buffer(&mut self, dst: &Buffer, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset.saturating_add(data.len() as u64);
        if end > dst.size() {
            return Err(GpuError::OutOfBounds {
                offset,
                end,
                size: dst.size(),
            });
        }
        if data.is_empty() {
            return Ok(());
        }
        if dst.is_persistent() {
            return dst.update_directly(data, offset);
        }
        debug_assert!(
            dst.usage().contains(vk::BufferUsageFlags::TRANSFER_DST),
            "staged buffer uploads need TRANSFER_DST usage"
        );

        let staging = create_staging_buffer(&self.allocator, data, "staging buffer")?;
        self.copies.push(PendingCopy::Buffer {
            src: staging.handle(),
            dst: dst.handle(),
            region: vk::BufferCopy {
                src_offset: 0,
                dst_offset: offset,
                size: data.len() as u64,
            },
        });
        self.staging.queue(0, staging);
        self.bytes += data.len() as u64;
        Ok(())
    }

    /// Fill mip 0 of every layer of `dst` and leave the image in `final_layout`.
    ///
    /// The image's previous contents are discarded.
    pub fn upload_to_image(
        &mut self,
        dst: &Image,
        data: &[u8],
        final_layout: vk::ImageLayout,
    ) -> Result<()> {
        layout_transition(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
        layout_transition(vk::ImageLayout::TRANSFER_DST_OPTIMAL, final_layout)?;

        let expected = image_upload_size(dst).ok_or(GpuError::UnsupportedFormat(dst.format()))?;
        if data.len() as u64 != expected {
            return Err(GpuError::InvalidState(format!(
                "image upload needs {expected} bytes, got {}",
                data.len()
            )));
        }
        if data.is_empty() {
            return Err(GpuError::InvalidState("empty image upload".to_string()));
        }
        debug_assert!(
            dst.usage().contains(vk::ImageUsageFlags::TRANSFER_DST),
            "image uploads need TRANSFER_DST usage"
        );

        let staging = create_staging_buffer(&self.allocator, data, "staging image data")?;
        self.copies.push(PendingCopy::Image {
            src: staging.handle(),
            dst: dst.handle(),
            range: dst.subresource().full_range(),
            region: full_image_copy(dst),
            final_layout,
        });
        self.staging.queue(0, staging);
        self.bytes += data.len() as u64;
        Ok(())
    }

    /// Record every copy into one submission and wait for it to finish.
    ///
    /// Staging buffers are released after the wait.
    pub fn submit(mut self, submitter: &dyn ImmediateSubmitter) -> Result<()> {
        if self.copies.is_empty() {
            return Ok(());
        }

        let copies = &self.copies;
        submitter.execute(&mut |recorder| {
            for copy in copies {
                copy.record(recorder)?;
            }
            Ok(())
        })?;

        let released = self.staging.process(0);
        tracing::debug!(
            copies = self.copies.len(),
            bytes = self.bytes,
            released,
            "Staging batch complete"
        );
        Ok(())
    }
}

/// Create a device-local buffer filled with `data`.
///
/// `TRANSFER_DST` is added to `usage`.
pub fn create_device_local_buffer(
    allocator: &SharedAllocator,
    submitter: &dyn ImmediateSubmitter,
    data: &[u8],
    usage: vk::BufferUsageFlags,
    name: &str,
) -> Result<Buffer> {
    let buffer = BufferBuilder::new(data.len() as u64)
        .usage(usage | vk::BufferUsageFlags::TRANSFER_DST)
        .location(MemoryLocation::GpuOnly)
        .name(name)
        .build(allocator)?;

    let mut batch = StagingBatch::new(allocator);
    batch.upload_to_buffer(&buffer, 0, data)?;
    batch.submit(submitter)?;
    Ok(buffer)
}

/// Create an image from `builder` and fill it with `data`.
///
/// `TRANSFER_DST` is added to the usage; the image ends in `final_layout`.
pub fn create_image_with_data(
    allocator: &SharedAllocator,
    submitter: &dyn ImmediateSubmitter,
    builder: ImageBuilder<'_>,
    data: &[u8],
    final_layout: vk::ImageLayout,
) -> Result<Image> {
    let image = builder
        .add_usage(vk::ImageUsageFlags::TRANSFER_DST)
        .build(allocator)?;

    let mut batch = StagingBatch::new(allocator);
    batch.upload_to_image(&image, data, final_layout)?;
    batch.submit(submitter)?;
    Ok(image)
}

/// Copy the whole of `src` back to host memory.
///
/// `src` needs `TRANSFER_SRC` usage.
pub fn download_buffer(
    allocator: &SharedAllocator,
    submitter: &dyn ImmediateSubmitter,
    src: &Buffer,
) -> Result<Vec<u8>> {
    let mut readback = BufferBuilder::new(src.size())
        .usage(vk::BufferUsageFlags::TRANSFER_DST)
        .location(MemoryLocation::GpuToCpu)
        .name("readback buffer")
        .build(allocator)?;

    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size: src.size(),
    };
    let (src, dst) = (src.handle(), readback.handle());
    submitter.execute(&mut |recorder| {
        recorder.copy_buffer(src, dst, &[region]);
        Ok(())
    })?;

    let len = readback.size() as usize;
    readback.read_with_mapping(0, len)
}

/// Copy mip 0 of `src` back to host memory.
///
/// The image is moved from `current_layout` to `TRANSFER_SRC_OPTIMAL` and
/// left there. Needs a format with a known texel size.
pub fn download_image(
    allocator: &SharedAllocator,
    submitter: &dyn ImmediateSubmitter,
    src: &Image,
    current_layout: vk::ImageLayout,
) -> Result<Vec<u8>> {
    let size = image_upload_size(src).ok_or(GpuError::UnsupportedFormat(src.format()))?;
    if current_layout != vk::ImageLayout::TRANSFER_SRC_OPTIMAL {
        layout_transition(current_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)?;
    }

    let mut readback = BufferBuilder::new(size)
        .usage(vk::BufferUsageFlags::TRANSFER_DST)
        .location(MemoryLocation::GpuToCpu)
        .name("image readback buffer")
        .build(allocator)?;

    let image = src.handle();
    let range = src.subresource().full_range();
    let region = full_image_copy(src);
    let dst = readback.handle();
    submitter.execute(&mut |recorder| {
        if current_layout != vk::ImageLayout::TRANSFER_SRC_OPTIMAL {
            record_layout_transition(
                recorder,
                image,
                range,
                current_layout,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            )?;
        }
        recorder.copy_image_to_buffer(
            image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            dst,
            &[region],
        );
        Ok(())
    })?;

    readback.read_with_mapping(0, size as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockAllocator, MockSubmitter};

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn staging_round_trip_sizes() {
        let mock = MockAllocator::new();
        let submitter = MockSubmitter::new(&mock);
        let allocator = mock.shared();

        for len in [1usize, 4096, 3 * 4096 + 17] {
            let data = payload(len);
            let buffer = create_device_local_buffer(
                &allocator,
                &submitter,
                &data,
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
                "vertices",
            )
            .unwrap();

            assert!(!buffer.is_persistent());
            assert!(buffer
                .usage()
                .contains(vk::BufferUsageFlags::TRANSFER_DST));
            assert_eq!(download_buffer(&allocator, &submitter, &buffer).unwrap(), data);
        }
    }

    #[test]
    fn staging_buffers_released_after_submission() {
        let mock = MockAllocator::new();
        let submitter = MockSubmitter::new(&mock);
        let allocator = mock.shared();

        let a = BufferBuilder::new(32)
            .usage(vk::BufferUsageFlags::TRANSFER_DST)
            .build(&allocator)
            .unwrap();
        let b = BufferBuilder::new(64)
            .usage(vk::BufferUsageFlags::TRANSFER_DST)
            .build(&allocator)
            .unwrap();

        let mut batch = StagingBatch::new(&allocator);
        batch.upload_to_buffer(&a, 0, &[1; 32]).unwrap();
        batch.upload_to_buffer(&b, 16, &[2; 48]).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(mock.live_allocations(), 4);

        batch.submit(&submitter).unwrap();
        assert_eq!(submitter.submissions(), 1);
        assert_eq!(mock.live_allocations(), 2);
        assert_eq!(mock.buffer_contents(b.handle()).unwrap()[16..], [2; 48]);
    }

    #[test]
    fn host_visible_destination_skips_staging() {
        let mock = MockAllocator::new().persistent(true);
        let submitter = MockSubmitter::new(&mock);
        let allocator = mock.shared();

        let buffer = BufferBuilder::new(8)
            .usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
            .location(MemoryLocation::CpuToGpu)
            .build(&allocator)
            .unwrap();

        let mut batch = StagingBatch::new(&allocator);
        batch.upload_to_buffer(&buffer, 0, &[9; 8]).unwrap();
        assert!(batch.is_empty());
        batch.submit(&submitter).unwrap();

        assert_eq!(submitter.submissions(), 0);
        assert_eq!(buffer.read_directly(0, 8).unwrap(), [9; 8]);
    }

    #[test]
    fn upload_past_end_is_rejected() {
        let mock = MockAllocator::new();
        let allocator = mock.shared();
        let buffer = BufferBuilder::new(8)
            .usage(vk::BufferUsageFlags::TRANSFER_DST)
            .build(&allocator)
            .unwrap();

        let mut batch = StagingBatch::new(&allocator);
        let err = batch.upload_to_buffer(&buffer, 4, &[0; 8]).unwrap_err();
        assert!(matches!(err, GpuError::OutOfBounds { .. }));
        assert!(batch.is_empty());
    }

    #[test]
    fn white_texture_reads_back_white() {
        let mock = MockAllocator::new();
        let submitter = MockSubmitter::new(&mock);
        let allocator = mock.shared();
        let pixels = vec![0xFF_u8; 256 * 256 * 4];

        let image = create_image_with_data(
            &allocator,
            &submitter,
            ImageBuilder::new_2d(256, 256)
                .format(vk::Format::R8G8B8A8_UNORM)
                .usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC),
            &pixels,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(
            mock.image_layout(image.handle()),
            Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        );

        let bytes = download_image(
            &allocator,
            &submitter,
            &image,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(bytes.len(), 256 * 256 * 4);
        assert!(bytes.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn image_upload_records_transitions_around_copy() {
        let mock = MockAllocator::new();
        let submitter = MockSubmitter::new(&mock);
        let allocator = mock.shared();

        let image = create_image_with_data(
            &allocator,
            &submitter,
            ImageBuilder::new_2d(2, 2).usage(vk::ImageUsageFlags::SAMPLED),
            &[0; 16],
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();

        assert_eq!(
            submitter.commands(),
            [
                "barrier UNDEFINED -> TRANSFER_DST_OPTIMAL",
                "copy_buffer_to_image",
                "barrier TRANSFER_DST_OPTIMAL -> SHADER_READ_ONLY_OPTIMAL",
            ]
        );
        assert!(image.usage().contains(vk::ImageUsageFlags::TRANSFER_DST));
    }

    #[test]
    fn unsupported_final_layout_fails_before_staging() {
        let mock = MockAllocator::new();
        let allocator = mock.shared();
        let image = ImageBuilder::new_2d(2, 2)
            .usage(vk::ImageUsageFlags::TRANSFER_DST)
            .build(&allocator)
            .unwrap();

        let mut batch = StagingBatch::new(&allocator);
        let err = batch
            .upload_to_image(&image, &[0; 16], vk::ImageLayout::GENERAL)
            .unwrap_err();
        assert!(matches!(err, GpuError::UnsupportedLayoutTransition { .. }));
        assert_eq!(mock.live_allocations(), 1);
    }

    #[test]
    fn image_upload_size_must_match() {
        let mock = MockAllocator::new();
        let allocator = mock.shared();
        let image = ImageBuilder::new_2d(2, 2)
            .usage(vk::ImageUsageFlags::TRANSFER_DST)
            .build(&allocator)
            .unwrap();

        let mut batch = StagingBatch::new(&allocator);
        let err = batch
            .upload_to_image(&image, &[0; 15], vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .unwrap_err();
        assert!(matches!(err, GpuError::InvalidState(_)));
    }

    #[test]
    fn unsized_format_upload_is_rejected() {
        let mock = MockAllocator::new();
        let allocator = mock.shared();
        let image = ImageBuilder::new_2d(4, 4)
            .format(vk::Format::BC1_RGBA_UNORM_BLOCK)
            .usage(vk::ImageUsageFlags::TRANSFER_DST)
            .build(&allocator)
            .unwrap();

        let mut batch = StagingBatch::new(&allocator);
        let err = batch
            .upload_to_image(&image, &[0; 1], vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .unwrap_err();
        assert!(matches!(
            err,
            GpuError::UnsupportedFormat(vk::Format::BC1_RGBA_UNORM_BLOCK)
        ));
        assert!(batch.is_empty());
        assert_eq!(mock.live_allocations(), 1);
    }

    #[test]
    fn two_channel_upload_checks_size() {
        let mock = MockAllocator::new();
        let allocator = mock.shared();
        let image = ImageBuilder::new_2d(4, 4)
            .format(vk::Format::R16G16_UNORM)
            .usage(vk::ImageUsageFlags::TRANSFER_DST)
            .build(&allocator)
            .unwrap();

        let mut batch = StagingBatch::new(&allocator);
        let err = batch
            .upload_to_image(&image, &[0; 1], vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .unwrap_err();
        assert!(matches!(err, GpuError::InvalidState(_)));
        batch
            .upload_to_image(&image, &[0; 64], vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .unwrap();
        assert_eq!(batch.len(), 1);
    }
}
