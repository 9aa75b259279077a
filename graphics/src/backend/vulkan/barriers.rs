//! Image layout transitions.
//!
//! Every [`ResourceState`] maps to one image layout, so a state transition is a
//! single synchronization2 image barrier between the two layouts. Images whose
//! contents were never defined transition from `UNDEFINED`.

use ash::vk;

use crate::types::ResourceState;

use super::conversion::state_access;

/// Color subresource covering the single mip and layer of every image.
pub const COLOR_SUBRESOURCE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Build the barrier for moving `image` from `before` to `after`.
///
/// `initialized` is false for images whose current contents may be discarded.
pub fn transition_barrier(
    image: vk::Image,
    before: ResourceState,
    after: ResourceState,
    initialized: bool,
) -> vk::ImageMemoryBarrier2<'static> {
    let src = state_access(before);
    let dst = state_access(after);
    let (old_layout, src_stage, src_access) = if initialized {
        (src.layout, src.stage, src.access)
    } else {
        (
            vk::ImageLayout::UNDEFINED,
            vk::PipelineStageFlags2::TOP_OF_PIPE,
            vk::AccessFlags2::NONE,
        )
    };

    vk::ImageMemoryBarrier2::default()
        .src_stage_mask(src_stage)
        .src_access_mask(src_access)
        .dst_stage_mask(dst.stage)
        .dst_access_mask(dst.access)
        .old_layout(old_layout)
        .new_layout(dst.layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(COLOR_SUBRESOURCE)
}

/// Record `barrier` into `command_buffer`.
pub fn record(device: &ash::Device, command_buffer: vk::CommandBuffer, barrier: vk::ImageMemoryBarrier2<'_>) {
    let barriers = [barrier];
    let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
    unsafe { device.cmd_pipeline_barrier2(command_buffer, &dependency) };
}
