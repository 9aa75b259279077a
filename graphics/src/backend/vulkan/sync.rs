//! Timeline semaphores backing device fences.
//!
//! A fence is a timeline semaphore. Signals are queued as empty submissions so
//! they complete after every earlier submission on the graphics queue.

use std::time::Duration;

use ash::vk;

use crate::error::GraphicsError;

use super::conversion::vk_error;

pub fn create_timeline_semaphore(
    device: &ash::Device,
    initial_value: u64,
) -> Result<vk::Semaphore, GraphicsError> {
    let mut type_info = vk::SemaphoreTypeCreateInfo::default()
        .semaphore_type(vk::SemaphoreType::TIMELINE)
        .initial_value(initial_value);
    let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
    unsafe { device.create_semaphore(&create_info, None) }.map_err(vk_error("create fence"))
}

pub fn create_binary_semaphore(device: &ash::Device) -> Result<vk::Semaphore, GraphicsError> {
    unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
        .map_err(vk_error("create semaphore"))
}

/// Queue a signal of `semaphore` to `value` behind all prior work.
pub fn signal(
    device: &ash::Device,
    queue: vk::Queue,
    semaphore: vk::Semaphore,
    value: u64,
) -> Result<(), GraphicsError> {
    let signal_infos = [vk::SemaphoreSubmitInfo::default()
        .semaphore(semaphore)
        .value(value)
        .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
    let submit = vk::SubmitInfo2::default().signal_semaphore_infos(&signal_infos);
    unsafe { device.queue_submit2(queue, &[submit], vk::Fence::null()) }
        .map_err(vk_error("signal fence"))
}

pub fn completed_value(
    device: &ash::Device,
    semaphore: vk::Semaphore,
) -> Result<u64, GraphicsError> {
    unsafe { device.get_semaphore_counter_value(semaphore) }.map_err(vk_error("read fence"))
}

/// Block until `semaphore` reaches `value`; `false` on timeout.
pub fn wait(
    device: &ash::Device,
    semaphore: vk::Semaphore,
    value: u64,
    timeout: Duration,
) -> Result<bool, GraphicsError> {
    let semaphores = [semaphore];
    let values = [value];
    let wait_info = vk::SemaphoreWaitInfo::default()
        .semaphores(&semaphores)
        .values(&values);
    let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
    match unsafe { device.wait_semaphores(&wait_info, timeout_ns) } {
        Ok(()) => Ok(true),
        Err(vk::Result::TIMEOUT) => Ok(false),
        Err(e) => Err(vk_error("wait for fence")(e)),
    }
}
