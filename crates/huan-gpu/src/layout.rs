//! Image layout transitions.
//!
//! Transitions are looked up in a fixed table of `(old, new)` layout pairs.
//! A pair missing from the table is an error, never a silent no-op.

use crate::command::{ImmediateSubmitter, TransferRecorder};
use crate::error::{GpuError, Result};
use crate::image::Image;
use ash::vk;

/// Access and stage masks for one layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Look up the masks for a layout change.
pub fn layout_transition(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<LayoutTransition> {
    use vk::ImageLayout as L;

    let (src_access, dst_access, src_stage, dst_stage) = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        (L::TRANSFER_DST_OPTIMAL, L::PRESENT_SRC_KHR) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::MEMORY_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ),
        (L::UNDEFINED, L::DEPTH_ATTACHMENT_OPTIMAL | L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ),
        // Read-back of a sampled image.
        (L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => (
            vk::AccessFlags::SHADER_READ,
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::PipelineStageFlags::TRANSFER,
        ),
        _ => return Err(GpuError::UnsupportedLayoutTransition { old, new }),
    };

    Ok(LayoutTransition {
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    })
}

/// Barrier for a layout change with no queue ownership transfer.
pub fn layout_barrier(
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<(vk::ImageMemoryBarrier<'static>, LayoutTransition)> {
    let transition = layout_transition(old, new)?;
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .src_access_mask(transition.src_access)
        .dst_access_mask(transition.dst_access);
    Ok((barrier, transition))
}

/// Record a layout change into an open command buffer.
pub fn record_layout_transition(
    recorder: &mut dyn TransferRecorder,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<()> {
    let (barrier, transition) = layout_barrier(image, range, old, new)?;
    recorder.pipeline_barrier(transition.src_stage, transition.dst_stage, &[barrier]);
    Ok(())
}

/// Transition every subresource of `image` in a one-shot submission.
///
/// Blocks until the queue is idle.
pub fn transition_image_layout(
    submitter: &dyn ImmediateSubmitter,
    image: &Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<()> {
    // Fail before anything is recorded.
    let (barrier, transition) =
        layout_barrier(image.handle(), image.subresource().full_range(), old, new)?;

    tracing::debug!(?old, ?new, image = ?image.handle(), "Transitioning image layout");
    submitter.execute(&mut |recorder| {
        recorder.pipeline_barrier(transition.src_stage, transition.dst_stage, &[barrier]);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageBuilder;
    use crate::testing::{MockAllocator, MockSubmitter};

    #[test]
    fn table_covers_core_transitions() {
        use vk::ImageLayout as L;

        let t = layout_transition(L::UNDEFINED, L::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(t.src_access, vk::AccessFlags::empty());
        assert_eq!(t.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(t.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let t = layout_transition(L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(t.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(t.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(t.src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);

        let t = layout_transition(L::TRANSFER_DST_OPTIMAL, L::PRESENT_SRC_KHR).unwrap();
        assert_eq!(t.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(t.dst_access, vk::AccessFlags::MEMORY_READ);
        assert_eq!(t.src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);

        let t = layout_transition(L::UNDEFINED, L::DEPTH_ATTACHMENT_OPTIMAL).unwrap();
        assert_eq!(t.src_access, vk::AccessFlags::empty());
        assert_eq!(
            t.dst_access,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
        assert_eq!(t.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);

        let stencil = layout_transition(L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL).unwrap();
        assert_eq!(stencil, t);
    }

    #[test]
    fn unknown_pairs_are_rejected() {
        use vk::ImageLayout as L;

        for (old, new) in [
            (L::UNDEFINED, L::SHADER_READ_ONLY_OPTIMAL),
            (L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_DST_OPTIMAL),
            (L::PRESENT_SRC_KHR, L::TRANSFER_DST_OPTIMAL),
            (L::TRANSFER_DST_OPTIMAL, L::TRANSFER_DST_OPTIMAL),
            (L::UNDEFINED, L::GENERAL),
        ] {
            let err = layout_transition(old, new).unwrap_err();
            assert!(
                matches!(err, GpuError::UnsupportedLayoutTransition { old: o, new: n } if o == old && n == new)
            );
        }
    }

    #[test]
    fn barrier_ignores_queue_families() {
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let (barrier, _) = layout_barrier(
            vk::Image::null(),
            range,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.dst_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.subresource_range, range);
    }

    #[test]
    fn one_shot_transition_submits_once() {
        let mock = MockAllocator::new();
        let submitter = MockSubmitter::new(&mock);
        let image = ImageBuilder::new_2d(4, 4)
            .usage(vk::ImageUsageFlags::TRANSFER_DST)
            .build(&mock.shared())
            .unwrap();

        transition_image_layout(
            &submitter,
            &image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();

        assert_eq!(submitter.submissions(), 1);
        assert_eq!(
            mock.image_layout(image.handle()),
            Some(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        );
    }

    #[test]
    fn unsupported_transition_submits_nothing() {
        let mock = MockAllocator::new();
        let submitter = MockSubmitter::new(&mock);
        let image = ImageBuilder::new_2d(4, 4)
            .usage(vk::ImageUsageFlags::SAMPLED)
            .build(&mock.shared())
            .unwrap();

        let result = transition_image_layout(
            &submitter,
            &image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert!(matches!(
            result,
            Err(GpuError::UnsupportedLayoutTransition { .. })
        ));
        assert_eq!(submitter.submissions(), 0);
    }
}
