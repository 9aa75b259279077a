//! Deferred release of device objects.
//!
//! The GPU executes a frame's commands after the CPU has moved on, so an
//! object the CPU is done with may still be read by queued work. Instead of
//! releasing it, the renderer queues it on a frame slot; the queue is drained
//! only after that slot's fence proves the GPU finished the slot's work.
//!
//! ```text
//! dispose_image(img)           slot 1 queue: [img]
//!     │
//! end_frame(present)           wait fence(slot 1) ──► release img
//! ```

use crate::backend::{GpuDevice, ResourceHandle};

/// Objects waiting for a frame slot's work to complete.
#[derive(Debug, Default)]
pub struct DisposalQueue {
    pending: Vec<ResourceHandle>,
}

impl DisposalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `resource` for release at the next drain.
    pub fn push(&mut self, resource: impl Into<ResourceHandle>) {
        self.pending.push(resource.into());
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Release everything queued, in queue order. Returns how many objects were released.
    ///
    /// Only call once the GPU has completed every submission that could
    /// reference the queued objects.
    pub fn drain(&mut self, device: &mut dyn GpuDevice) -> usize {
        let count = self.pending.len();
        for resource in self.pending.drain(..) {
            device.release(resource);
        }
        count
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyDevice;
    use crate::types::{ResourceState, TextureFormat};

    #[test]
    fn test_drain_releases_once() {
        let mut device = DummyDevice::new();
        let texture = device
            .create_texture(4, 4, TextureFormat::Rgba8Unorm, ResourceState::ShaderReadable)
            .unwrap();
        let mut queue = DisposalQueue::new();
        queue.push(texture);
        assert!(device.is_live(texture));

        assert_eq!(queue.drain(&mut device), 1);
        assert_eq!(queue.drain(&mut device), 0);
        assert!(queue.is_empty());
        assert_eq!(device.release_count(texture), 1);
    }
}
