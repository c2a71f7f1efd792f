//! Viewer application.

use ash::vk;
use glam::{Vec2, Vec3};
use huan_app::{AppContext, FrameContext, HuanApp};
use huan_gpu::layout::{layout_barrier, record_layout_transition};
use huan_gpu::{LayoutTransition, TransferRecorder};
use tracing::info;

/// Side length of the bouncing square in pixels.
const SQUARE_SIZE: u32 = 32;

/// Square speed in pixels per second.
const SQUARE_SPEED: f32 = 240.0;

/// Seconds for the background to run through a full color cycle.
const COLOR_PERIOD: f32 = 8.0;

const SQUARE_COLOR: [u8; 4] = [255, 140, 0, 255];
const BORDER_COLOR: [u8; 4] = [255, 255, 255, 255];

/// Viewer application state.
pub struct Viewer {
    /// Top-left corner of the square.
    position: Vec2,
    velocity: Vec2,
    time: f32,
    /// Square pixels in the swapchain's byte order.
    square: Vec<u8>,
}

impl HuanApp for Viewer {
    const WAIT_STAGE: vk::PipelineStageFlags = vk::PipelineStageFlags::TRANSFER;
    const UNIFORM_BUFFER_SIZE: u64 = (SQUARE_SIZE * SQUARE_SIZE * 4) as u64;

    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let format = ctx.swapchain().format();
        info!(?format, "Viewer initialized");

        Ok(Self {
            position: Vec2::ZERO,
            velocity: Vec2::new(1.0, 0.75).normalize() * SQUARE_SPEED,
            time: 0.0,
            square: square_pixels(format),
        })
    }

    fn update(&mut self, ctx: &AppContext, dt: f32) {
        self.time += dt;
        let bounds = square_bounds(ctx.extent());
        (self.position, self.velocity) = bounce(self.position, self.velocity, dt, bounds);
    }

    fn render(&mut self, _ctx: &AppContext, frame: &mut FrameContext<'_>) -> anyhow::Result<()> {
        let image = frame.swapchain_image;
        let range = frame.swapchain_range();
        let extent = frame.extent;

        // The slot's previous submission has completed, so the buffer is free
        frame.uniforms().update_directly(&self.square, 0)?;
        let source = frame.uniforms().handle();
        let clear = background_color(self.time);

        let recorder = frame.recorder();
        let (barrier, transition) = acquire_barrier(image, range)?;
        recorder.pipeline_barrier(transition.src_stage, transition.dst_stage, &[barrier]);
        recorder.clear_color_image(image, clear, range);

        if extent.width >= SQUARE_SIZE && extent.height >= SQUARE_SIZE {
            // Order the copy after the clear
            let barrier = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(range)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);
            recorder.pipeline_barrier(
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                &[barrier],
            );

            let bounds = square_bounds(extent);
            let offset = self.position.clamp(Vec2::ZERO, bounds);
            let region = vk::BufferImageCopy::default()
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .layer_count(1),
                )
                .image_offset(vk::Offset3D {
                    x: offset.x as i32,
                    y: offset.y as i32,
                    z: 0,
                })
                .image_extent(vk::Extent3D {
                    width: SQUARE_SIZE,
                    height: SQUARE_SIZE,
                    depth: 1,
                });
            recorder.copy_buffer_to_image(
                source,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        record_layout_transition(
            recorder,
            image,
            range,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )?;
        Ok(())
    }

    fn on_resize(&mut self, _ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        let bounds = square_bounds(vk::Extent2D { width, height });
        self.position = self.position.clamp(Vec2::ZERO, bounds);
        Ok(())
    }
}

/// Barrier moving a freshly acquired swapchain image to `TRANSFER_DST_OPTIMAL`.
///
/// Starts at the stage the submission waits on the image-available
/// semaphore, so the layout change is ordered after the acquire.
fn acquire_barrier(
    image: vk::Image,
    range: vk::ImageSubresourceRange,
) -> huan_gpu::Result<(vk::ImageMemoryBarrier<'static>, LayoutTransition)> {
    let (barrier, mut transition) = layout_barrier(
        image,
        range,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    )?;
    transition.src_stage = Viewer::WAIT_STAGE;
    Ok((barrier, transition))
}

/// Largest top-left corner that keeps the square inside `extent`.
fn square_bounds(extent: vk::Extent2D) -> Vec2 {
    Vec2::new(
        extent.width.saturating_sub(SQUARE_SIZE) as f32,
        extent.height.saturating_sub(SQUARE_SIZE) as f32,
    )
}

/// Advance the square by `dt`, reflecting off the edges of `bounds`.
fn bounce(position: Vec2, velocity: Vec2, dt: f32, bounds: Vec2) -> (Vec2, Vec2) {
    let mut position = position + velocity * dt;
    let mut velocity = velocity;

    for axis in 0..2 {
        if position[axis] < 0.0 {
            position[axis] = -position[axis];
            velocity[axis] = velocity[axis].abs();
        } else if position[axis] > bounds[axis] {
            position[axis] = 2.0 * bounds[axis] - position[axis];
            velocity[axis] = -velocity[axis].abs();
        }
    }

    (position.clamp(Vec2::ZERO, bounds), velocity)
}

/// Background clear color at `time` seconds.
fn background_color(time: f32) -> [f32; 4] {
    let phase = time / COLOR_PERIOD * std::f32::consts::TAU;
    let offsets = Vec3::new(0.0, 1.0 / 3.0, 2.0 / 3.0) * std::f32::consts::TAU;
    let rgb = (Vec3::splat(phase) + offsets).to_array().map(f32::cos);
    let rgb = (Vec3::from(rgb) * 0.5 + 0.5) * 0.35 + 0.05;
    [rgb.x, rgb.y, rgb.z, 1.0]
}

/// Square pixels with a one pixel border, laid out for `format`.
fn square_pixels(format: vk::Format) -> Vec<u8> {
    let bgra = matches!(
        format,
        vk::Format::B8G8R8A8_SRGB | vk::Format::B8G8R8A8_UNORM
    );

    let mut pixels = Vec::with_capacity((SQUARE_SIZE * SQUARE_SIZE * 4) as usize);
    for y in 0..SQUARE_SIZE {
        for x in 0..SQUARE_SIZE {
            let edge = x == 0 || y == 0 || x == SQUARE_SIZE - 1 || y == SQUARE_SIZE - 1;
            let [r, g, b, a] = if edge { BORDER_COLOR } else { SQUARE_COLOR };
            if bgra {
                pixels.extend_from_slice(&[b, g, r, a]);
            } else {
                pixels.extend_from_slice(&[r, g, b, a]);
            }
        }
    }
    pixels
}
