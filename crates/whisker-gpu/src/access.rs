//! Image access states.
//!
//! An image is always in exactly one `(layout, stage, access)` state. Moving
//! it to another state takes one pipeline barrier; asking for the state it is
//! already in takes none.

use ash::vk;

/// Layout, pipeline stage and access mask an image is currently used with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AccessState {
    pub layout: vk::ImageLayout,
    pub stage: vk::PipelineStageFlags,
    pub access: vk::AccessFlags,
}

impl AccessState {
    /// Freshly created image, contents undefined.
    pub const UNDEFINED: Self = Self::new(
        vk::ImageLayout::UNDEFINED,
        vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::AccessFlags::empty(),
    );

    /// Destination of a transfer.
    pub const TRANSFER_DST: Self = Self::new(
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::PipelineStageFlags::TRANSFER,
        vk::AccessFlags::TRANSFER_WRITE,
    );

    /// Source of a transfer.
    pub const TRANSFER_SRC: Self = Self::new(
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        vk::PipelineStageFlags::TRANSFER,
        vk::AccessFlags::TRANSFER_READ,
    );

    /// Sampled from fragment shaders.
    pub const SHADER_READ: Self = Self::new(
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        vk::PipelineStageFlags::FRAGMENT_SHADER,
        vk::AccessFlags::SHADER_READ,
    );

    /// Written as a color attachment.
    pub const COLOR_ATTACHMENT: Self = Self::new(
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
    );

    pub const fn new(
        layout: vk::ImageLayout,
        stage: vk::PipelineStageFlags,
        access: vk::AccessFlags,
    ) -> Self {
        Self {
            layout,
            stage,
            access,
        }
    }

    /// Whether an image may be moved into this state.
    ///
    /// `UNDEFINED` is only ever a source layout.
    pub fn is_valid_target(&self) -> bool {
        self.layout != vk::ImageLayout::UNDEFINED
    }
}

/// Full color subresource of a single-mip, single-layer image.
pub(crate) fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// Barrier moving `image` from `from` to `to`.
pub(crate) fn image_barrier(
    image: vk::Image,
    from: AccessState,
    to: AccessState,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .old_layout(from.layout)
        .new_layout(to.layout)
        .src_access_mask(from.access)
        .dst_access_mask(to.access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_subresource_range())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barrier_carries_both_states() {
        let barrier = image_barrier(
            vk::Image::null(),
            AccessState::TRANSFER_DST,
            AccessState::SHADER_READ,
        );
        assert_eq!(barrier.old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::SHADER_READ);
        assert_eq!(
            barrier.subresource_range.aspect_mask,
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn undefined_is_never_a_target() {
        assert!(!AccessState::UNDEFINED.is_valid_target());
        assert!(AccessState::SHADER_READ.is_valid_target());
        assert_ne!(AccessState::TRANSFER_DST, AccessState::TRANSFER_SRC);
    }
}
