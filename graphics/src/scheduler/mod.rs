//! Frame scheduling across multiple frames in flight.
//!
//! [`FrameScheduler`] owns [`FRAMES_IN_FLIGHT`] frame slots and sequences the
//! command list through them, so the CPU records frame N+1 while the GPU still
//! executes frame N.
//!
//! # Frame slots
//!
//! Each [`FrameSlot`] owns a command allocator, a fence with a monotonically
//! increasing value, a transient buffer pool and a disposal queue. Slots cycle
//! through
//!
//! ```text
//! Idle ──begin──► Recording ──end──► Submitted ──┬─► Presented ──┐
//!                                                └─► Discarded ──┴─reclaim─► Idle
//! ```
//!
//! # Frame overlap
//!
//! ```text
//! Frame 0 (slot 0): [record] [submit] ─────────────────────────────────────►
//!                                     [GPU frame 0] ───────────────────────►
//!
//! Frame 1 (slot 1):                   [record] [submit] [wait slot 0] ─────►
//!                                                        └─ reclaim slot 0
//!
//! Frame 2 (slot 0):                                      [record] [submit] ►
//! ```
//!
//! `end(present = true)` waits on the *other* slot's fence before returning
//! and reclaims it: its transient buffers are truncated and its disposals
//! released. With two slots that is the slot the next `begin` records into,
//! so `begin` does not block in the common case. A slot whose submission was
//! never confirmed (after `end(present = false)`) is waited on and reclaimed by
//! the `begin` that selects it.
//!
//! # Shutdown
//!
//! [`FrameScheduler::wait_idle`] waits on every slot's last fence value, after
//! which [`FrameScheduler::shutdown`] can release every per-slot object.

mod disposal;

pub use disposal::DisposalQueue;

use std::time::Duration;

use crate::backend::{CommandAllocatorHandle, FenceHandle, GpuDevice, ResourceHandle};
use crate::config::{FRAMES_IN_FLIGHT, GraphicsConfig};
use crate::error::GraphicsError;
use crate::resources::TransientBufferPool;

/// Life-cycle state of a frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    /// Free to record.
    #[default]
    Idle,
    /// The command list is open against this slot's allocator.
    Recording,
    /// Submitted and signaled, not yet presented.
    Submitted,
    /// Submitted and presented.
    Presented,
    /// Submitted without presenting.
    Discarded,
}

/// Per-slot recording resources.
#[derive(Debug)]
pub struct FrameSlot {
    allocator: CommandAllocatorHandle,
    fence: FenceHandle,
    /// Last value signaled on `fence`.
    fence_value: u64,
    state: SlotState,
    /// Submitted work has not been confirmed complete and reclaimed yet.
    needs_reclaim: bool,
    transients: TransientBufferPool,
    disposals: DisposalQueue,
}

impl FrameSlot {
    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn fence(&self) -> FenceHandle {
        self.fence
    }

    /// Last value signaled on this slot's fence.
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    pub fn needs_reclaim(&self) -> bool {
        self.needs_reclaim
    }

    pub fn transients(&self) -> &TransientBufferPool {
        &self.transients
    }

    pub fn disposals(&self) -> &DisposalQueue {
        &self.disposals
    }
}

/// Sequences command recording, submission and presentation over the frame slots.
///
/// Owned by the recording thread; there is no internal locking.
#[derive(Debug)]
pub struct FrameScheduler {
    slots: Vec<FrameSlot>,
    current: usize,
    next_slot: usize,
    recording: bool,
    /// Frames begun so far; the serial of the frame being recorded.
    frame_serial: u64,
    fence_timeout: Duration,
}

impl FrameScheduler {
    /// Create every slot's allocator and fence.
    ///
    /// On failure the objects created so far are released.
    pub fn new(device: &mut dyn GpuDevice, config: &GraphicsConfig) -> Result<Self, GraphicsError> {
        let mut slots = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for index in 0..FRAMES_IN_FLIGHT {
            match Self::create_slot(device, index, config) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    for slot in slots {
                        device.release(slot.allocator.into());
                        device.release(slot.fence.into());
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self {
            slots,
            current: 0,
            next_slot: 0,
            recording: false,
            frame_serial: 0,
            fence_timeout: config.fence_timeout,
        })
    }

    fn create_slot(
        device: &mut dyn GpuDevice,
        index: usize,
        config: &GraphicsConfig,
    ) -> Result<FrameSlot, GraphicsError> {
        let allocator = device.create_command_allocator()?;
        let fence = match device.create_fence(0) {
            Ok(fence) => fence,
            Err(e) => {
                device.release(allocator.into());
                return Err(e);
            }
        };
        Ok(FrameSlot {
            allocator,
            fence,
            fence_value: 0,
            state: SlotState::Idle,
            needs_reclaim: false,
            transients: TransientBufferPool::new(index, config.max_transient_buffers_per_slot),
            disposals: DisposalQueue::new(),
        })
    }

    /// Start recording a frame.
    ///
    /// Selects the slot of the acquired swap chain `back_buffer`, or the next
    /// slot round-robin without a swap chain, then resets its allocator and
    /// opens the command list. Returns the selected slot.
    ///
    /// A swap chain may hold more back buffers than there are slots, so two
    /// consecutive frames can map to the same slot; that slot is then waited
    /// on before it is reused.
    pub fn begin(
        &mut self,
        device: &mut dyn GpuDevice,
        back_buffer: Option<usize>,
    ) -> Result<usize, GraphicsError> {
        if self.recording {
            return Err(GraphicsError::state(
                "begin_frame called while a frame is already recording",
            ));
        }

        let slot = back_buffer.map_or(self.next_slot, |index| index % FRAMES_IN_FLIGHT);

        if self.slots[slot].needs_reclaim {
            log::trace!("Slot {slot} was not reclaimed at end_frame, waiting now");
            self.wait_slot(device, slot)?;
            self.reclaim(device, slot);
        }

        let allocator = self.slots[slot].allocator;
        device.reset_command_allocator(allocator)?;
        device.reset_command_list(allocator)?;

        self.frame_serial += 1;
        self.current = slot;
        self.recording = true;
        self.slots[slot].state = SlotState::Recording;
        log::trace!("Begin frame {} (slot {slot})", self.frame_serial);
        Ok(slot)
    }

    /// Close, submit and signal the recorded frame.
    ///
    /// When `present` is set the current back buffer is presented and the
    /// other slot is waited on and reclaimed before returning. The caller must
    /// already have recorded the back buffer's transition to the present state.
    pub fn end(
        &mut self,
        device: &mut dyn GpuDevice,
        present: bool,
        vsync: bool,
    ) -> Result<(), GraphicsError> {
        if !self.recording {
            return Err(GraphicsError::state(
                "end_frame called without a matching begin_frame",
            ));
        }
        let slot = self.current;
        self.recording = false;

        self.submit(device, slot)?;
        self.next_slot = (slot + 1) % FRAMES_IN_FLIGHT;

        if !present {
            self.slots[slot].state = SlotState::Discarded;
            log::trace!("End frame {} (slot {slot}, not presented)", self.frame_serial);
            return Ok(());
        }

        device.present(vsync)?;
        self.slots[slot].state = SlotState::Presented;
        log::trace!("End frame {} (slot {slot}, presented)", self.frame_serial);

        let other = (slot + 1) % FRAMES_IN_FLIGHT;
        if self.slots[other].needs_reclaim {
            self.wait_slot(device, other)?;
            self.reclaim(device, other);
        }
        Ok(())
    }

    /// Submit what was recorded so far, wait for it and reopen the command list.
    ///
    /// Used when the CPU needs results of the current frame's GPU work, such as
    /// a read-back. The slot keeps recording afterwards.
    pub fn flush_and_wait(&mut self, device: &mut dyn GpuDevice) -> Result<(), GraphicsError> {
        if !self.recording {
            return Err(GraphicsError::state("flush requires a recording frame"));
        }
        let slot = self.current;
        self.submit(device, slot)?;
        self.wait_slot(device, slot)?;

        let allocator = self.slots[slot].allocator;
        device.reset_command_allocator(allocator)?;
        device.reset_command_list(allocator)?;
        self.slots[slot].state = SlotState::Recording;
        log::trace!(
            "Flushed slot {slot} at fence value {}",
            self.slots[slot].fence_value
        );
        Ok(())
    }

    /// Wait until every slot's last submission completed, then reclaim the slots.
    ///
    /// An open frame is submitted without presenting.
    pub fn wait_idle(&mut self, device: &mut dyn GpuDevice) -> Result<(), GraphicsError> {
        if self.recording {
            log::warn!(
                "Frame {} is still recording; submitting it without presenting",
                self.frame_serial
            );
            self.recording = false;
            let slot = self.current;
            self.submit(device, slot)?;
            self.slots[slot].state = SlotState::Discarded;
        }
        for slot in 0..self.slots.len() {
            self.wait_slot(device, slot)?;
            self.reclaim(device, slot);
        }
        Ok(())
    }

    /// Release every per-slot object. Call after a successful [`wait_idle`](Self::wait_idle).
    pub fn shutdown(&mut self, device: &mut dyn GpuDevice) {
        for slot in self.slots.drain(..) {
            let FrameSlot {
                allocator,
                fence,
                mut transients,
                mut disposals,
                ..
            } = slot;
            disposals.drain(device);
            transients.release_all(device);
            device.release(allocator.into());
            device.release(fence.into());
        }
    }

    /// Queue `resource` for release once the GPU is done with the current slot.
    pub fn defer_release(&mut self, resource: impl Into<ResourceHandle>) {
        let resource = resource.into();
        let slot = self.current;
        log::trace!("Queued {resource:?} for release on slot {slot}");
        self.slots[slot].disposals.push(resource);
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Slot being recorded, or the last recorded one between frames.
    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Serial of the current (or last) frame. Starts at 1 for the first frame.
    pub fn frame_serial(&self) -> u64 {
        self.frame_serial
    }

    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }

    /// Transient buffers of the slot being recorded.
    pub fn transients_mut(&mut self) -> &mut TransientBufferPool {
        &mut self.slots[self.current].transients
    }

    pub fn fence_timeout(&self) -> Duration {
        self.fence_timeout
    }

    fn submit(&mut self, device: &mut dyn GpuDevice, slot: usize) -> Result<(), GraphicsError> {
        device.close_command_list()?;
        device.execute_command_list()?;

        let frame = &mut self.slots[slot];
        frame.fence_value += 1;
        device.signal_fence(frame.fence, frame.fence_value)?;
        frame.state = SlotState::Submitted;
        frame.needs_reclaim = true;
        Ok(())
    }

    /// Block until `slot`'s last signaled value is reached, bounded by the fence timeout.
    fn wait_slot(&mut self, device: &mut dyn GpuDevice, slot: usize) -> Result<(), GraphicsError> {
        let frame = &self.slots[slot];
        if device.fence_completed_value(frame.fence)? >= frame.fence_value {
            return Ok(());
        }
        if device.wait_fence(frame.fence, frame.fence_value, self.fence_timeout)? {
            return Ok(());
        }
        log::error!(
            "Timed out after {:?} waiting for slot {slot} to reach fence value {}",
            self.fence_timeout,
            frame.fence_value
        );
        Err(GraphicsError::SyncTimeout {
            slot,
            value: frame.fence_value,
            timeout: self.fence_timeout,
        })
    }

    /// Recycle `slot`'s transient buffers and release its disposals.
    ///
    /// Only call after [`wait_slot`](Self::wait_slot) succeeded for `slot`.
    fn reclaim(&mut self, device: &mut dyn GpuDevice, slot: usize) {
        let frame = &mut self.slots[slot];
        frame.transients.truncate();
        let released = frame.disposals.drain(device);
        frame.needs_reclaim = false;
        if frame.state != SlotState::Recording {
            frame.state = SlotState::Idle;
        }
        if released > 0 {
            log::debug!("Slot {slot}: released {released} deferred objects");
        }
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyDevice, FailurePoint, Hazard, TimelineMode};
    use crate::resources::TransientKind;
    use rstest::rstest;

    fn scheduler(device: &mut DummyDevice) -> FrameScheduler {
        FrameScheduler::new(device, &GraphicsConfig::default()).unwrap()
    }

    #[test]
    fn test_round_robin_without_swap_chain() {
        let mut device = DummyDevice::new();
        let mut frames = scheduler(&mut device);
        let mut slots = Vec::new();
        for _ in 0..4 {
            slots.push(frames.begin(&mut device, None).unwrap());
            frames.end(&mut device, false, true).unwrap();
        }
        assert_eq!(slots, vec![0, 1, 0, 1]);
        assert_eq!(frames.frame_serial(), 4);
    }

    #[test]
    fn test_slot_follows_back_buffer() {
        let mut device = DummyDevice::new().with_timeline_mode(TimelineMode::Deferred);
        let mut frames = scheduler(&mut device);
        let mut slots = Vec::new();
        // A three-buffer swap chain cycles 0, 1, 2, 0.
        for back_buffer in [0, 1, 2, 0] {
            slots.push(frames.begin(&mut device, Some(back_buffer)).unwrap());
            frames.end(&mut device, false, true).unwrap();
        }
        assert_eq!(slots, vec![0, 1, 0, 0]);
        assert!(device.hazards().is_empty());
    }

    #[rstest]
    #[case::begin_twice(true)]
    #[case::end_without_begin(false)]
    fn test_out_of_order_calls(#[case] begin_twice: bool) {
        let mut device = DummyDevice::new();
        let mut frames = scheduler(&mut device);
        let err = if begin_twice {
            frames.begin(&mut device, None).unwrap();
            frames.begin(&mut device, None).unwrap_err()
        } else {
            frames.end(&mut device, false, true).unwrap_err()
        };
        assert!(matches!(err, GraphicsError::State(_)));
    }

    #[test]
    fn test_end_signals_increasing_values() {
        let mut device = DummyDevice::new();
        let mut frames = scheduler(&mut device);
        for _ in 0..3 {
            frames.begin(&mut device, None).unwrap();
            frames.end(&mut device, false, true).unwrap();
        }
        assert_eq!(frames.slot(0).fence_value(), 2);
        assert_eq!(frames.slot(1).fence_value(), 1);
        assert_eq!(frames.slot(0).state(), SlotState::Discarded);
    }

    #[test]
    fn test_begin_reclaims_unconfirmed_slot() {
        let mut device = DummyDevice::new().with_timeline_mode(TimelineMode::Deferred);
        let mut frames = scheduler(&mut device);

        frames.begin(&mut device, None).unwrap();
        frames
            .transients_mut()
            .acquire(&mut device, TransientKind::Constant, 256)
            .unwrap();
        frames.end(&mut device, false, true).unwrap();
        assert!(frames.slot(0).needs_reclaim());

        frames.begin(&mut device, None).unwrap();
        frames.end(&mut device, false, true).unwrap();
        // Slot 0 comes around again; its work must be waited on first.
        frames.begin(&mut device, None).unwrap();
        assert!(!frames.slot(0).needs_reclaim());
        assert!(frames.slot(0).transients().is_empty());
        assert!(device.hazards().is_empty());
    }

    #[test]
    fn test_timeout_is_sync_error() {
        let mut device = DummyDevice::new().with_timeline_mode(TimelineMode::Hung);
        let mut frames = scheduler(&mut device);
        frames.begin(&mut device, None).unwrap();
        frames.end(&mut device, false, true).unwrap();
        frames.begin(&mut device, None).unwrap();
        frames.end(&mut device, false, true).unwrap();

        let err = frames.begin(&mut device, None).unwrap_err();
        assert_eq!(
            err,
            GraphicsError::SyncTimeout {
                slot: 0,
                value: 1,
                timeout: GraphicsConfig::default().fence_timeout,
            }
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn test_deferred_release_waits_for_slot() {
        let mut device = DummyDevice::new().with_timeline_mode(TimelineMode::Deferred);
        let mut frames = scheduler(&mut device);
        let texture = device
            .create_texture(
                4,
                4,
                crate::types::TextureFormat::Rgba8Unorm,
                crate::types::ResourceState::ShaderReadable,
            )
            .unwrap();

        frames.begin(&mut device, None).unwrap();
        frames.defer_release(texture);
        frames.end(&mut device, false, true).unwrap();
        assert!(device.is_live(texture));

        frames.wait_idle(&mut device).unwrap();
        assert!(!device.is_live(texture));
        assert_eq!(device.release_count(texture), 1);
        assert!(device.hazards().is_empty());
    }

    #[test]
    fn test_flush_and_wait_keeps_recording() {
        let mut device = DummyDevice::new().with_timeline_mode(TimelineMode::Deferred);
        let mut frames = scheduler(&mut device);
        frames.begin(&mut device, None).unwrap();
        frames.flush_and_wait(&mut device).unwrap();
        assert!(frames.is_recording());
        assert_eq!(frames.slot(0).state(), SlotState::Recording);
        assert_eq!(device.pending_work(), 0);
        frames.end(&mut device, false, true).unwrap();
        assert_eq!(frames.slot(0).fence_value(), 2);
        assert!(
            !device
                .hazards()
                .iter()
                .any(|h| matches!(h, Hazard::AllocatorResetWhileInFlight(_)))
        );
    }

    #[test]
    fn test_construction_rollback() {
        let mut device = DummyDevice::new();
        device.fail_next(FailurePoint::Fence);
        let err = FrameScheduler::new(&mut device, &GraphicsConfig::default()).unwrap_err();
        assert!(matches!(err, GraphicsError::Device { .. }));
        // The allocator created before the fence failed is released.
        assert_eq!(device.live_object_count(), 0);
        assert_eq!(device.released().len(), 1);
    }

    #[test]
    fn test_wait_idle_submits_open_frame() {
        let mut device = DummyDevice::new().with_timeline_mode(TimelineMode::Deferred);
        let mut frames = scheduler(&mut device);
        frames.begin(&mut device, None).unwrap();
        frames.wait_idle(&mut device).unwrap();
        assert!(!frames.is_recording());
        assert_eq!(frames.slot(0).state(), SlotState::Idle);
        frames.shutdown(&mut device);
        assert!(device.hazards().is_empty());
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut device = DummyDevice::new();
        let mut frames = scheduler(&mut device);
        frames.begin(&mut device, None).unwrap();
        frames
            .transients_mut()
            .acquire(&mut device, TransientKind::Vertex, 64)
            .unwrap();
        frames.end(&mut device, false, true).unwrap();
        frames.wait_idle(&mut device).unwrap();
        frames.shutdown(&mut device);
        assert_eq!(device.live_object_count(), 0);
        assert!(device.hazards().is_empty());
    }
}
